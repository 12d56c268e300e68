//! YubiKey one-time passwords.
//!
//! A Yubico OTP is 32 to 48 modhex characters: the leading `len - 32`
//! characters are the key's public id, the trailing 32 are the encrypted
//! token. Validation is delegated to a YubiCloud-compatible service, see
//! [`YubicoClient`].

mod yubico;

use async_trait::async_trait;

pub use yubico::{YubicoClient, YubicoConfig, DEFAULT_API_URL};

const MODHEX: &str = "cbdefghijklnrtuv";
const TOKEN_LEN: usize = 32;
const MAX_OTP_LEN: usize = 48;

#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    /// The validation service could not be reached or gave no usable answer.
    #[error("OTP verification unavailable: {0}")]
    Unavailable(String),
    /// The service answered but its reply failed integrity checks.
    #[error("OTP verification response rejected: {0}")]
    InvalidResponse(String),
    /// The service refused the request itself (unknown client, bad key...).
    #[error("OTP verification misconfigured: {0}")]
    Misconfigured(String),
}

/// Anything able to answer "is this OTP valid right now".
#[async_trait]
pub trait OtpVerifier: Send + Sync {
    async fn verify(&self, otp: &str) -> Result<bool, OtpError>;
}

#[async_trait]
impl OtpVerifier for YubicoClient {
    async fn verify(&self, otp: &str) -> Result<bool, OtpError> {
        YubicoClient::verify(self, otp).await
    }
}

/// Check the OTP shape without contacting the validation service.
#[must_use]
pub fn is_well_formed(otp: &str) -> bool {
    (TOKEN_LEN..=MAX_OTP_LEN).contains(&otp.len()) && otp.chars().all(|c| MODHEX.contains(c))
}

/// Public id of the key that produced `otp`, `None` for malformed input or
/// OTPs carrying no id.
#[must_use]
pub fn public_id(otp: &str) -> Option<&str> {
    if !is_well_formed(otp) || otp.len() == TOKEN_LEN {
        return None;
    }
    Some(&otp[..otp.len() - TOKEN_LEN])
}
