//! Auth configuration and shared state.

use crate::otp::OtpVerifier;
use std::{fmt, sync::Arc};

const DEFAULT_LOCKOUT_THRESHOLD: u32 = 5;
const DEFAULT_LOCKOUT_WINDOW_SECONDS: i64 = 15 * 60;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthConfig {
    lockout_threshold: u32,
    lockout_window_seconds: i64,
    unlock_after_seconds: Option<i64>,
    device_trust_after: u32,
    session_ttl_seconds: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lockout_threshold: DEFAULT_LOCKOUT_THRESHOLD,
            lockout_window_seconds: DEFAULT_LOCKOUT_WINDOW_SECONDS,
            unlock_after_seconds: None,
            device_trust_after: 0,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_lockout_threshold(mut self, attempts: u32) -> Self {
        self.lockout_threshold = attempts;
        self
    }

    #[must_use]
    pub fn with_lockout_window_seconds(mut self, seconds: i64) -> Self {
        self.lockout_window_seconds = seconds;
        self
    }

    /// `None` keeps locks until they are cleared manually.
    #[must_use]
    pub fn with_unlock_after_seconds(mut self, seconds: Option<i64>) -> Self {
        self.unlock_after_seconds = seconds;
        self
    }

    /// `0` disables automatic trust.
    #[must_use]
    pub fn with_device_trust_after(mut self, logins: u32) -> Self {
        self.device_trust_after = logins;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn lockout_threshold(&self) -> u32 {
        self.lockout_threshold
    }

    #[must_use]
    pub fn lockout_window_seconds(&self) -> i64 {
        self.lockout_window_seconds
    }

    #[must_use]
    pub fn unlock_after_seconds(&self) -> Option<i64> {
        self.unlock_after_seconds
    }

    #[must_use]
    pub fn device_trust_after(&self) -> u32 {
        self.device_trust_after
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }
}

pub struct AuthState {
    config: AuthConfig,
    otp: Option<Arc<dyn OtpVerifier>>,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, otp: Option<Arc<dyn OtpVerifier>>) -> Self {
        Self { config, otp }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// `None` when no validation service is configured.
    #[must_use]
    pub fn otp(&self) -> Option<&dyn OtpVerifier> {
        self.otp.as_deref()
    }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("config", &self.config)
            .field("otp", &self.otp.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_override_defaults() {
        let config = AuthConfig::new()
            .with_lockout_threshold(3)
            .with_lockout_window_seconds(60)
            .with_unlock_after_seconds(Some(300))
            .with_device_trust_after(2)
            .with_session_ttl_seconds(3600);

        assert_eq!(config.lockout_threshold(), 3);
        assert_eq!(config.lockout_window_seconds(), 60);
        assert_eq!(config.unlock_after_seconds(), Some(300));
        assert_eq!(config.device_trust_after(), 2);
        assert_eq!(config.session_ttl_seconds(), 3600);
    }

    #[test]
    fn defaults_lock_manually_and_never_auto_trust() {
        let config = AuthConfig::default();
        assert_eq!(config.lockout_threshold(), 5);
        assert_eq!(config.lockout_window_seconds(), 900);
        assert_eq!(config.unlock_after_seconds(), None);
        assert_eq!(config.device_trust_after(), 0);
        assert_eq!(config.session_ttl_seconds(), 86_400);
    }
}
