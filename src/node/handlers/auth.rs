//! EAP relay authentication: joiner, relay and leader roles.
//!
//! A joiner talks only to its relay neighbor. A relay that is not the
//! leader passes the exchange on to the leader by SID; the leader
//! answers relayed requests the same way it answers its own neighbors.

use super::CommandDest;
use crate::config::SecurityMode;
use crate::identity::{ExtAddr, Sid};
use crate::node::{DeviceState, MeshNode, RelaySession};
use crate::protocol::{
    AuthChallenge, AuthCode, AuthRelay, AuthResult, AuthStart, CommandBody, MeshHeader,
};
use crate::security::{auth_code, AuthState};
use crate::timer::TimerKind;
use tracing::{debug, info, trace, warn};

impl MeshNode {
    // ========================================================================
    // Joiner
    // ========================================================================

    /// Begin authenticating through `relay`.
    pub(in crate::node) fn start_joiner_auth(&mut self, relay: ExtAddr) {
        self.joiner.reset();
        self.joiner.state = AuthState::RequestStart;
        self.joiner.relay = Some(relay);
        let body = CommandBody::AuthStart(AuthStart {
            device_id: self.security.device_id().to_vec(),
        });
        debug!(relay = %relay, "Starting authentication");
        self.send_joiner_message(body);
    }

    fn send_joiner_message(&mut self, body: CommandBody) {
        let Some(relay) = self.joiner.relay else {
            return;
        };
        self.joiner.pending = Some(body.clone());
        self.send_command(CommandDest::Neighbor(relay), body);
        let interval = self.config.security.auth_retry_interval_ms;
        self.timers
            .schedule(TimerKind::AuthRetry, self.now_ms + interval);
    }

    pub(in crate::node) fn on_auth_retry_timer(&mut self) {
        if !self.joiner.in_progress() {
            return;
        }
        if self.joiner.retries >= self.config.security.auth_retry_times {
            debug!(relay = ?self.joiner.relay, state = %self.joiner.state, "Authentication unanswered");
            self.joiner_auth_failed();
            return;
        }
        self.joiner.retries += 1;
        if let Some(body) = self.joiner.pending.clone() {
            trace!(attempt = self.joiner.retries, "Resending authentication message");
            self.send_joiner_message(body);
        }
    }

    fn joiner_auth_failed(&mut self) {
        let relay = self.joiner.relay;
        self.joiner.reset();
        self.timers.cancel(TimerKind::AuthRetry);
        if let Some(n) = relay.and_then(|r| self.neighbors.get_mut(&r)) {
            n.holddown_until_ms = self.now_ms + self.config.attach.candidate_holddown_ms;
        }
        if self.state.is_operational() && !self.device_state.is_attached() {
            self.schedule_attach();
        }
    }

    pub(in crate::node) fn handle_auth_challenge(&mut self, src: ExtAddr, challenge: AuthChallenge) {
        if challenge.joiner == self.ext {
            if self.joiner.state != AuthState::RequestStart || self.joiner.relay != Some(src) {
                trace!(src = %src, "Unexpected authentication challenge");
                return;
            }
            let code = match self.security.psk() {
                Some(psk) => auth_code(psk, &challenge.challenge, self.security.device_id()),
                None => {
                    warn!("Challenged without a pre-shared key");
                    self.joiner_auth_failed();
                    return;
                }
            };
            let code = match code {
                Ok(code) => code,
                Err(e) => {
                    warn!(error = %e, "Cannot answer authentication challenge");
                    self.joiner_auth_failed();
                    return;
                }
            };
            self.joiner.state = AuthState::RelayAuthCode;
            self.joiner.retries = 0;
            let body = CommandBody::AuthCode(AuthCode {
                joiner: self.ext,
                code,
            });
            self.send_joiner_message(body);
            return;
        }

        // Relay: pass the leader's challenge down to the joiner.
        let joiner = challenge.joiner;
        let Some(session) = self.relays.get_mut(&joiner) else {
            return;
        };
        session.state = AuthState::RelayAuthCode;
        trace!(joiner = %joiner, "Relaying challenge");
        self.send_command(CommandDest::Neighbor(joiner), CommandBody::AuthChallenge(challenge));
    }

    pub(in crate::node) fn handle_auth_result(&mut self, src: ExtAddr, result: AuthResult) {
        if result.joiner == self.ext {
            if self.joiner.state != AuthState::RelayAuthCode || self.joiner.relay != Some(src) {
                return;
            }
            self.timers.cancel(TimerKind::AuthRetry);
            if !result.success {
                warn!(relay = %src, "Authentication rejected");
                self.joiner_auth_failed();
                return;
            }
            info!(relay = %src, "Authenticated");
            self.joiner.state = AuthState::Done;
            self.joiner.pending = None;
            self.security.set_authenticated(true);
            if let Some(n) = self.neighbors.get_mut(&src) {
                n.admitted = true;
            }
            if !self.device_state.is_attached() {
                self.send_attach_request(src);
            }
            return;
        }

        if self.relays.remove(&result.joiner).is_none() {
            return;
        }
        self.conclude_relay(result);
    }

    /// Apply a verdict for a joiner at the relay and tell the joiner.
    fn conclude_relay(&mut self, result: AuthResult) {
        let joiner = result.joiner;
        if result.success {
            if let Some(n) = self.neighbors.get_mut(&joiner) {
                n.admitted = true;
            }
            info!(joiner = %joiner, "Joiner admitted");
        } else {
            self.security.blacklist(joiner, self.now_ms);
            warn!(joiner = %joiner, "Joiner rejected and blacklisted");
        }
        self.send_command(CommandDest::Neighbor(joiner), CommandBody::AuthResult(result));
    }

    // ========================================================================
    // Relay
    // ========================================================================

    fn can_relay(&self) -> bool {
        self.security.mode() == SecurityMode::Eap
            && self.device_state.is_attached()
            && self.sid.is_unique()
    }

    pub(in crate::node) fn handle_auth_start(&mut self, src: ExtAddr, start: AuthStart) {
        if !self.can_relay() {
            return;
        }
        self.relays.insert(
            src,
            RelaySession {
                state: AuthState::RelayChallenge,
                started_ms: self.now_ms,
            },
        );
        if self.device_state == DeviceState::Leader {
            if let Some(challenge) = self.issue_challenge(src, &start.device_id) {
                if let Some(session) = self.relays.get_mut(&src) {
                    session.state = AuthState::RelayAuthCode;
                }
                self.send_command(CommandDest::Neighbor(src), CommandBody::AuthChallenge(challenge));
            }
            return;
        }
        debug!(joiner = %src, "Relaying authentication start");
        let body = CommandBody::AuthRelay(AuthRelay {
            joiner: src,
            device_id: start.device_id,
        });
        self.send_command(CommandDest::Sid(Sid::LEADER), body);
    }

    pub(in crate::node) fn handle_auth_code(&mut self, src: ExtAddr, code: AuthCode) {
        if code.joiner != src || !self.relays.contains_key(&src) {
            return;
        }
        if self.device_state == DeviceState::Leader {
            self.relays.remove(&src);
            let result = self.judge(code);
            self.conclude_relay(result);
            return;
        }
        trace!(joiner = %src, "Relaying authentication code");
        self.send_command(CommandDest::Sid(Sid::LEADER), CommandBody::AuthCodeRelay(code));
    }

    // ========================================================================
    // Leader
    // ========================================================================

    fn issue_challenge(&mut self, joiner: ExtAddr, device_id: &[u8]) -> Option<AuthChallenge> {
        let Some(server) = self.auth_server.as_mut() else {
            warn!(joiner = %joiner, "No authentication server configured");
            return None;
        };
        let challenge = server.challenge(&joiner, device_id, &mut self.rng);
        debug!(joiner = %joiner, "Challenge issued");
        Some(AuthChallenge { joiner, challenge })
    }

    fn judge(&mut self, code: AuthCode) -> AuthResult {
        let success = self
            .auth_server
            .as_mut()
            .is_some_and(|server| server.verify(&code.joiner, &code.code));
        debug!(joiner = %code.joiner, success, "Authentication code checked");
        AuthResult {
            joiner: code.joiner,
            success,
        }
    }

    pub(in crate::node) fn handle_auth_relay(&mut self, header: &MeshHeader, relay: AuthRelay) {
        if self.device_state != DeviceState::Leader || self.security.mode() != SecurityMode::Eap {
            return;
        }
        if let Some(challenge) = self.issue_challenge(relay.joiner, &relay.device_id) {
            self.send_command(CommandDest::Sid(header.src), CommandBody::AuthChallenge(challenge));
        }
    }

    pub(in crate::node) fn handle_auth_code_relay(&mut self, header: &MeshHeader, code: AuthCode) {
        if self.device_state != DeviceState::Leader || self.security.mode() != SecurityMode::Eap {
            return;
        }
        let result = self.judge(code);
        if !result.success {
            self.security.blacklist(result.joiner, self.now_ms);
        }
        self.send_command(CommandDest::Sid(header.src), CommandBody::AuthResult(result));
    }

    /// Drop relay sessions the leader never finished.
    pub(in crate::node) fn expire_relay_sessions(&mut self) {
        let security = &self.config.security;
        let lifetime = security
            .auth_retry_interval_ms
            .saturating_mul(security.auth_retry_times as u64 + 1);
        let now = self.now_ms;
        self.relays.retain(|joiner, session| {
            let keep = now.saturating_sub(session.started_ms) < lifetime;
            if !keep {
                trace!(joiner = %joiner, state = %session.state, "Relay session expired");
            }
            keep
        });
    }
}
