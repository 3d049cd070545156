//! EAP-style relay authentication.
//!
//! A joiner that is not yet admitted talks only to one neighbor, the
//! relay, which forwards the exchange to the leader acting as
//! authentication server:
//!
//! 1. joiner -> relay: `AuthStart {device_id}`
//! 2. relay -> leader: `AuthRelay {joiner, device_id}`
//! 3. leader -> relay -> joiner: `AuthChallenge`
//! 4. joiner -> relay -> leader: `AuthCode`, `AuthCodeRelay`
//! 5. leader -> relay -> joiner: `AuthResult`

use super::SecurityError;
use crate::identity::ExtAddr;
use crate::protocol::CHALLENGE_SIZE;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;

/// Progress of an authentication exchange.
///
/// Joiners move `Idle -> RequestStart -> RelayAuthCode -> Done`; relays
/// track each joiner as `RelayChallenge` then `RelayAuthCode`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    RequestStart,
    RelayChallenge,
    RelayAuthCode,
    Done,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthState::Idle => "idle",
            AuthState::RequestStart => "request_start",
            AuthState::RelayChallenge => "relay_challenge",
            AuthState::RelayAuthCode => "relay_auth_code",
            AuthState::Done => "done",
        };
        write!(f, "{}", s)
    }
}

/// Response a joiner proves knowledge of the secret with.
pub fn auth_code(
    psk: &[u8],
    challenge: &[u8; CHALLENGE_SIZE],
    device_id: &[u8],
) -> Result<[u8; CHALLENGE_SIZE], SecurityError> {
    let hk = Hkdf::<Sha256>::new(Some(challenge), psk);
    let mut code = [0u8; CHALLENGE_SIZE];
    hk.expand(device_id, &mut code)
        .map_err(|_| SecurityError::KeyDerivation)?;
    Ok(code)
}

/// Authentication server run by the leader.
pub trait AuthServer {
    /// Issue a challenge for `joiner`.
    fn challenge(
        &mut self,
        joiner: &ExtAddr,
        device_id: &[u8],
        rng: &mut dyn RngCore,
    ) -> [u8; CHALLENGE_SIZE];

    /// Check a joiner's code against its outstanding challenge.
    fn verify(&mut self, joiner: &ExtAddr, code: &[u8; CHALLENGE_SIZE]) -> bool;
}

/// Server that accepts any device holding the network's pre-shared secret.
#[derive(Debug)]
pub struct PskAuthServer {
    psk: Vec<u8>,
    pending: HashMap<ExtAddr, ([u8; CHALLENGE_SIZE], Vec<u8>)>,
}

impl PskAuthServer {
    pub fn new(psk: Vec<u8>) -> Self {
        Self {
            psk,
            pending: HashMap::new(),
        }
    }
}

impl AuthServer for PskAuthServer {
    fn challenge(
        &mut self,
        joiner: &ExtAddr,
        device_id: &[u8],
        rng: &mut dyn RngCore,
    ) -> [u8; CHALLENGE_SIZE] {
        let mut challenge = [0u8; CHALLENGE_SIZE];
        rng.fill_bytes(&mut challenge);
        self.pending
            .insert(*joiner, (challenge, device_id.to_vec()));
        challenge
    }

    fn verify(&mut self, joiner: &ExtAddr, code: &[u8; CHALLENGE_SIZE]) -> bool {
        let Some((challenge, device_id)) = self.pending.remove(joiner) else {
            return false;
        };
        match auth_code(&self.psk, &challenge, &device_id) {
            Ok(expected) => expected == *code,
            Err(_) => false,
        }
    }
}

/// Joiner-side state.
#[derive(Debug)]
pub struct JoinerAuth {
    pub state: AuthState,
    pub relay: Option<ExtAddr>,
    pub retries: u32,
    /// Last command body sent, replayed on retry.
    pub pending: Option<crate::protocol::CommandBody>,
}

impl JoinerAuth {
    pub fn new() -> Self {
        Self {
            state: AuthState::Idle,
            relay: None,
            retries: 0,
            pending: None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn in_progress(&self) -> bool {
        matches!(self.state, AuthState::RequestStart | AuthState::RelayAuthCode)
    }
}

impl Default for JoinerAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_psk_server_accepts_matching_code() {
        let mut server = PskAuthServer::new(b"secret".to_vec());
        let mut rng = StdRng::seed_from_u64(1);
        let joiner = ExtAddr::from_u64(9);
        let challenge = server.challenge(&joiner, b"dev-1", &mut rng);
        let code = auth_code(b"secret", &challenge, b"dev-1").unwrap();
        assert!(server.verify(&joiner, &code));
        // The challenge is consumed.
        assert!(!server.verify(&joiner, &code));
    }

    #[test]
    fn test_psk_server_rejects_wrong_secret() {
        let mut server = PskAuthServer::new(b"secret".to_vec());
        let mut rng = StdRng::seed_from_u64(2);
        let joiner = ExtAddr::from_u64(9);
        let challenge = server.challenge(&joiner, b"dev-1", &mut rng);
        let code = auth_code(b"guess", &challenge, b"dev-1").unwrap();
        assert!(!server.verify(&joiner, &code));
    }

    #[test]
    fn test_code_depends_on_device_id() {
        let challenge = [3u8; CHALLENGE_SIZE];
        let a = auth_code(b"k", &challenge, b"a").unwrap();
        let b = auth_code(b"k", &challenge, b"b").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_without_challenge() {
        let mut server = PskAuthServer::new(b"secret".to_vec());
        assert!(!server.verify(&ExtAddr::from_u64(1), &[0; CHALLENGE_SIZE]));
    }
}
