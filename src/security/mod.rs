//! Security and key management.
//!
//! Decides whether frames from a link neighbor are admitted: the
//! optional whitelist, the temporary blacklist, the static network key
//! with its epoch and per-frame MIC, and the state of the EAP-style
//! relay authentication.

pub mod auth;
mod blacklist;

pub use auth::{auth_code, AuthServer, AuthState, JoinerAuth, PskAuthServer};
pub use blacklist::Blacklist;

use crate::config::{SecurityConfig, SecurityMode};
use crate::identity::{ExtAddr, ExtNetId};
use crate::protocol::{MeshFrame, MIC_SIZE};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::info;

/// Derived network key length.
pub const NETWORK_KEY_SIZE: usize = 16;

const KEY_INFO: &[u8] = b"umesh-network-key";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("{0:?} mode requires a pre-shared secret")]
    MissingPsk(SecurityMode),

    #[error("key derivation failed")]
    KeyDerivation,
}

/// Why a frame or candidate was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    NotWhitelisted,
    Blacklisted,
    /// Secured with an older key epoch, or unsecured where a key is required.
    StaleEpoch,
    BadMic,
    /// Not admitted yet and the command is not allowed before admission.
    Unauthenticated,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::NotWhitelisted => "not whitelisted",
            RejectReason::Blacklisted => "blacklisted",
            RejectReason::StaleEpoch => "stale key epoch",
            RejectReason::BadMic => "bad mic",
            RejectReason::Unauthenticated => "unauthenticated",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of an admission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Admitted; carries the whitelist RSSI override if one is set.
    Admitted { rssi_override: Option<i8> },
    Rejected(RejectReason),
}

/// Allow-list of extended addresses.
#[derive(Debug, Default)]
pub struct Whitelist {
    enabled: bool,
    entries: BTreeMap<ExtAddr, Option<i8>>,
}

impl Whitelist {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn add(&mut self, ext: ExtAddr, rssi: Option<i8>) {
        self.entries.insert(ext, rssi);
    }

    pub fn remove(&mut self, ext: &ExtAddr) -> bool {
        self.entries.remove(ext).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> impl Iterator<Item = (&ExtAddr, &Option<i8>)> {
        self.entries.iter()
    }

    /// `Some(override)` when `ext` may pass, `None` when it is filtered.
    pub fn check(&self, ext: &ExtAddr) -> Option<Option<i8>> {
        if !self.enabled {
            return Some(None);
        }
        self.entries.get(ext).copied()
    }
}

/// Key, whitelist, blacklist and authentication state of one node.
pub struct SecurityManager {
    mode: SecurityMode,
    psk: Option<Vec<u8>>,
    device_id: Vec<u8>,
    ext_netid: ExtNetId,
    key: Option<[u8; NETWORK_KEY_SIZE]>,
    epoch: u8,
    whitelist: Whitelist,
    blacklist: Blacklist,
    authenticated: bool,
}

impl SecurityManager {
    pub fn new(
        config: &SecurityConfig,
        ext_netid: ExtNetId,
        own_ext: &ExtAddr,
    ) -> Result<Self, SecurityError> {
        let psk = config.psk.as_ref().map(|s| s.as_bytes().to_vec());
        if config.mode != SecurityMode::Open && psk.is_none() {
            return Err(SecurityError::MissingPsk(config.mode));
        }
        let device_id = config
            .device_id
            .clone()
            .unwrap_or_else(|| own_ext.to_string())
            .into_bytes();

        let mut whitelist = Whitelist::default();
        whitelist.set_enabled(config.whitelist_enabled);
        for entry in &config.whitelist {
            whitelist.add(entry.ext_addr, entry.rssi);
        }

        let mut manager = Self {
            mode: config.mode,
            psk,
            device_id,
            ext_netid,
            key: None,
            epoch: 0,
            whitelist,
            blacklist: Blacklist::new(config.blacklist_ms),
            authenticated: config.mode != SecurityMode::Eap,
        };
        manager.derive_key()?;
        Ok(manager)
    }

    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    pub fn epoch(&self) -> u8 {
        self.epoch
    }

    pub fn psk(&self) -> Option<&[u8]> {
        self.psk.as_deref()
    }

    pub fn device_id(&self) -> &[u8] {
        &self.device_id
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    pub fn whitelist_mut(&mut self) -> &mut Whitelist {
        &mut self.whitelist
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated || self.mode != SecurityMode::Eap;
    }

    /// A new extnetid changes the key salt.
    pub fn set_ext_netid(&mut self, ext_netid: ExtNetId) -> Result<(), SecurityError> {
        self.ext_netid = ext_netid;
        self.derive_key()
    }

    /// Advance the key epoch; callers un-admit every neighbor.
    pub fn rotate_key(&mut self) -> Result<u8, SecurityError> {
        self.epoch = self.epoch.wrapping_add(1);
        self.derive_key()?;
        info!(epoch = self.epoch, "Network key rotated");
        Ok(self.epoch)
    }

    /// Adopt the epoch a peer proved it holds the key for.
    pub fn set_epoch(&mut self, epoch: u8) -> Result<(), SecurityError> {
        if epoch != self.epoch {
            self.epoch = epoch;
            self.derive_key()?;
        }
        Ok(())
    }

    /// Epoch of a frame secured under a newer key whose MIC checks out
    /// under that key.
    pub fn newer_epoch(&self, frame: &MeshFrame) -> Option<u8> {
        if self.key.is_none() {
            return None;
        }
        let (epoch, mic) = (frame.header.key_epoch?, frame.mic?);
        let ahead = epoch.wrapping_sub(self.epoch) as i8;
        if ahead <= 0 {
            return None;
        }
        let key = self.key_for(epoch).ok().flatten()?;
        (Self::mic(&key, frame) == mic).then_some(epoch)
    }

    fn derive_key(&mut self) -> Result<(), SecurityError> {
        self.key = self.key_for(self.epoch)?;
        Ok(())
    }

    fn key_for(&self, epoch: u8) -> Result<Option<[u8; NETWORK_KEY_SIZE]>, SecurityError> {
        if self.mode != SecurityMode::StaticKey {
            return Ok(None);
        }
        let psk = self
            .psk
            .as_deref()
            .ok_or(SecurityError::MissingPsk(self.mode))?;
        let mut salt = Vec::with_capacity(ExtNetId::LEN + 1);
        salt.extend_from_slice(self.ext_netid.as_bytes());
        salt.push(epoch);
        let hk = Hkdf::<Sha256>::new(Some(&salt), psk);
        let mut key = [0u8; NETWORK_KEY_SIZE];
        hk.expand(KEY_INFO, &mut key)
            .map_err(|_| SecurityError::KeyDerivation)?;
        Ok(Some(key))
    }

    fn mic(key: &[u8; NETWORK_KEY_SIZE], frame: &MeshFrame) -> [u8; MIC_SIZE] {
        let mut hasher = Sha256::new();
        hasher.update(key);
        hasher.update(frame.authenticated_bytes());
        let digest = hasher.finalize();
        let mut mic = [0u8; MIC_SIZE];
        mic.copy_from_slice(&digest[..MIC_SIZE]);
        mic
    }

    /// Bytes `secure` adds to an encoded frame.
    pub fn overhead(&self) -> usize {
        if self.key.is_some() { 1 + MIC_SIZE } else { 0 }
    }

    /// Stamp the epoch and MIC on an outbound frame when a key is in use.
    pub fn secure(&self, frame: &mut MeshFrame) {
        if let Some(key) = &self.key {
            frame.header.key_epoch = Some(self.epoch);
            frame.mic = Some(Self::mic(key, frame));
        }
    }

    /// Check an inbound frame's epoch and MIC.
    pub fn verify(&self, frame: &MeshFrame) -> Result<(), RejectReason> {
        let Some(key) = &self.key else {
            return Ok(());
        };
        match (frame.header.key_epoch, frame.mic) {
            (Some(epoch), Some(mic)) if epoch == self.epoch => {
                if Self::mic(key, frame) == mic {
                    Ok(())
                } else {
                    Err(RejectReason::BadMic)
                }
            }
            _ => Err(RejectReason::StaleEpoch),
        }
    }

    /// Link-source filtering: whitelist then blacklist.
    pub fn check_source(&self, ext: &ExtAddr, now_ms: u64) -> Admission {
        let Some(rssi_override) = self.whitelist.check(ext) else {
            return Admission::Rejected(RejectReason::NotWhitelisted);
        };
        if self.blacklist.contains(ext, now_ms) {
            return Admission::Rejected(RejectReason::Blacklisted);
        }
        Admission::Admitted { rssi_override }
    }

    pub fn blacklist(&mut self, ext: ExtAddr, now_ms: u64) {
        self.blacklist.add(ext, now_ms);
    }

    pub fn is_blacklisted(&self, ext: &ExtAddr, now_ms: u64) -> bool {
        self.blacklist.contains(ext, now_ms)
    }

    pub fn expire_blacklist(&mut self, now_ms: u64) -> usize {
        self.blacklist.expire(now_ms)
    }
}

impl fmt::Debug for SecurityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityManager")
            .field("mode", &self.mode)
            .field("epoch", &self.epoch)
            .field("authenticated", &self.authenticated)
            .field("whitelist_enabled", &self.whitelist.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WhitelistEntryConfig;
    use crate::identity::{MeshNetId, Sid};
    use crate::protocol::{FrameKind, MeshHeader};

    fn static_key_config() -> SecurityConfig {
        SecurityConfig {
            mode: SecurityMode::StaticKey,
            psk: Some("hunter2".into()),
            ..SecurityConfig::default()
        }
    }

    fn frame() -> MeshFrame {
        MeshFrame::new(
            MeshHeader::new(FrameKind::Data, MeshNetId::new(1), Sid::LEADER, Sid::new(0x1000), 5),
            vec![1, 2, 3],
        )
    }

    fn manager(config: &SecurityConfig) -> SecurityManager {
        SecurityManager::new(config, ExtNetId::default(), &ExtAddr::from_u64(1)).unwrap()
    }

    #[test]
    fn test_open_mode_passes_frames() {
        let sec = manager(&SecurityConfig::default());
        let mut f = frame();
        sec.secure(&mut f);
        assert!(f.mic.is_none());
        assert_eq!(sec.verify(&f), Ok(()));
        assert!(sec.is_authenticated());
    }

    #[test]
    fn test_static_key_mic_round_trip() {
        let sec = manager(&static_key_config());
        let mut f = frame();
        sec.secure(&mut f);
        assert_eq!(f.header.key_epoch, Some(0));
        let decoded = MeshFrame::decode(&f.encode()).unwrap();
        assert_eq!(sec.verify(&decoded), Ok(()));
    }

    #[test]
    fn test_tampered_payload_fails_mic() {
        let sec = manager(&static_key_config());
        let mut f = frame();
        sec.secure(&mut f);
        f.payload[0] ^= 0xff;
        assert_eq!(sec.verify(&f), Err(RejectReason::BadMic));
    }

    #[test]
    fn test_rotation_makes_old_frames_stale() {
        let mut sec = manager(&static_key_config());
        let mut f = frame();
        sec.secure(&mut f);
        assert_eq!(sec.rotate_key().unwrap(), 1);
        assert_eq!(sec.verify(&f), Err(RejectReason::StaleEpoch));
        assert_eq!(sec.verify(&frame()), Err(RejectReason::StaleEpoch));
    }

    #[test]
    fn test_newer_epoch_is_adopted_only_with_valid_mic() {
        let mut ahead = manager(&static_key_config());
        let mut behind = manager(&static_key_config());
        ahead.rotate_key().unwrap();
        let mut f = frame();
        ahead.secure(&mut f);

        assert_eq!(behind.verify(&f), Err(RejectReason::StaleEpoch));
        assert_eq!(behind.newer_epoch(&f), Some(1));
        behind.set_epoch(1).unwrap();
        assert_eq!(behind.verify(&f), Ok(()));
        // Older frames never pull a node back.
        let mut old = frame();
        manager(&static_key_config()).secure(&mut old);
        assert_eq!(behind.newer_epoch(&old), None);

        let mut forged = frame();
        ahead.rotate_key().unwrap();
        ahead.secure(&mut forged);
        forged.payload[0] ^= 0xff;
        assert_eq!(behind.newer_epoch(&forged), None);
    }

    #[test]
    fn test_keys_differ_per_extnetid() {
        let a = manager(&static_key_config());
        let b = SecurityManager::new(
            &static_key_config(),
            ExtNetId::from_bytes([1, 2, 3, 4, 5, 6]),
            &ExtAddr::from_u64(1),
        )
        .unwrap();
        let mut f = frame();
        a.secure(&mut f);
        assert_eq!(b.verify(&f), Err(RejectReason::BadMic));
    }

    #[test]
    fn test_missing_psk_rejected() {
        let config = SecurityConfig {
            mode: SecurityMode::Eap,
            ..SecurityConfig::default()
        };
        assert_eq!(
            SecurityManager::new(&config, ExtNetId::default(), &ExtAddr::from_u64(1)).unwrap_err(),
            SecurityError::MissingPsk(SecurityMode::Eap)
        );
    }

    #[test]
    fn test_whitelist_filtering() {
        let config = SecurityConfig {
            whitelist_enabled: true,
            whitelist: vec![WhitelistEntryConfig {
                ext_addr: ExtAddr::from_u64(7),
                rssi: Some(-60),
            }],
            ..SecurityConfig::default()
        };
        let mut sec = manager(&config);
        assert_eq!(
            sec.check_source(&ExtAddr::from_u64(7), 0),
            Admission::Admitted { rssi_override: Some(-60) }
        );
        assert_eq!(
            sec.check_source(&ExtAddr::from_u64(8), 0),
            Admission::Rejected(RejectReason::NotWhitelisted)
        );
        sec.whitelist_mut().set_enabled(false);
        assert!(matches!(
            sec.check_source(&ExtAddr::from_u64(8), 0),
            Admission::Admitted { .. }
        ));
    }

    #[test]
    fn test_blacklist_admission() {
        let mut sec = manager(&SecurityConfig::default());
        let ext = ExtAddr::from_u64(3);
        sec.blacklist(ext, 0);
        assert_eq!(
            sec.check_source(&ext, 10),
            Admission::Rejected(RejectReason::Blacklisted)
        );
        assert_eq!(sec.expire_blacklist(30_000), 1);
        assert!(matches!(sec.check_source(&ext, 30_000), Admission::Admitted { .. }));
    }

    #[test]
    fn test_eap_starts_unauthenticated() {
        let config = SecurityConfig {
            mode: SecurityMode::Eap,
            psk: Some("k".into()),
            ..SecurityConfig::default()
        };
        let mut sec = manager(&config);
        assert!(!sec.is_authenticated());
        sec.set_authenticated(true);
        assert!(sec.is_authenticated());
    }
}
