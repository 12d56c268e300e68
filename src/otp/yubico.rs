//! YubiCloud validation protocol 2.0 client.
//!
//! Request: `GET <api_url>?id=<client>&nonce=<nonce>&otp=<otp>[&h=<sig>]`.
//! Response: `key=value` lines (`h`, `t`, `otp`, `nonce`, `status`, ...).
//! With an API key both directions are signed: HMAC-SHA1 over the
//! alphabetically sorted `key=value` pairs joined with `&`, base64 encoded.

use super::{is_well_formed, OtpError};
use anyhow::{anyhow, Context, Result};
use base64ct::{Base64, Encoding};
use hmac::{Hmac, Mac};
use rand::{distributions::Alphanumeric, Rng};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use sha1::Sha1;
use std::{collections::BTreeMap, time::Duration};
use tracing::{debug, instrument, warn};
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.yubico.com/wsapi/2.0/verify";
const NONCE_LEN: usize = 32;

type HmacSha1 = Hmac<Sha1>;

#[derive(Clone, Debug)]
pub struct YubicoConfig {
    pub client_id: String,
    /// Base64 API key issued with the client id; unsigned requests when `None`.
    pub api_key: Option<SecretString>,
    pub api_url: String,
    pub timeout: Duration,
}

impl YubicoConfig {
    #[must_use]
    pub fn new(client_id: String) -> Self {
        Self {
            client_id,
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    #[must_use]
    pub fn with_api_url(mut self, api_url: String) -> Self {
        self.api_url = api_url;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug)]
pub struct YubicoClient {
    client_id: String,
    api_key: Option<SecretString>,
    api_url: Url,
    http: Client,
}

impl YubicoClient {
    /// Build a client from validated configuration.
    ///
    /// # Errors
    /// Returns an error if the API URL or key cannot be parsed or the HTTP client cannot be built.
    pub fn new(config: YubicoConfig) -> Result<Self> {
        if config.client_id.trim().is_empty() {
            return Err(anyhow!("Yubico client id must not be empty"));
        }

        let api_url = Url::parse(&config.api_url)
            .with_context(|| format!("Invalid Yubico API URL: {}", config.api_url))?;

        if let Some(key) = &config.api_key {
            Base64::decode_vec(key.expose_secret().trim())
                .map_err(|_| anyhow!("Yubico API key must be base64"))?;
        }

        let http = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(config.timeout)
            .build()
            .context("Failed to build Yubico HTTP client")?;

        Ok(Self {
            client_id: config.client_id,
            api_key: config.api_key,
            api_url,
            http,
        })
    }

    /// Ask the validation service whether `otp` is valid.
    ///
    /// Returns `Ok(false)` for malformed, rejected or replayed OTPs.
    ///
    /// # Errors
    /// Any failure to obtain a trustworthy answer is an [`OtpError`], never `Ok(false)`.
    #[instrument(skip(self, otp))]
    pub async fn verify(&self, otp: &str) -> Result<bool, OtpError> {
        if !is_well_formed(otp) {
            debug!("malformed OTP, skipping validation request");
            return Ok(false);
        }

        let nonce = generate_nonce();
        let mut params = BTreeMap::new();
        params.insert("id".to_string(), self.client_id.clone());
        params.insert("nonce".to_string(), nonce.clone());
        params.insert("otp".to_string(), otp.to_string());

        if let Some(key) = self.key_bytes()? {
            let signature = sign(&key, &params)?;
            params.insert("h".to_string(), signature);
        }

        let response = self
            .http
            .get(self.api_url.clone())
            .query(&params)
            .send()
            .await
            .map_err(|err| OtpError::Unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OtpError::Unavailable(format!(
                "validation service returned {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|err| OtpError::Unavailable(err.to_string()))?;

        self.interpret(&parse_response(&body), otp, &nonce)
    }

    fn key_bytes(&self) -> Result<Option<Vec<u8>>, OtpError> {
        self.api_key
            .as_ref()
            .map(|key| {
                Base64::decode_vec(key.expose_secret().trim())
                    .map_err(|_| OtpError::Misconfigured("API key is not base64".to_string()))
            })
            .transpose()
    }

    fn interpret(
        &self,
        fields: &BTreeMap<String, String>,
        otp: &str,
        nonce: &str,
    ) -> Result<bool, OtpError> {
        if let Some(key) = self.key_bytes()? {
            verify_signature(&key, fields)?;
        }

        let status = fields
            .get("status")
            .map(String::as_str)
            .ok_or_else(|| OtpError::InvalidResponse("missing status".to_string()))?;

        match status {
            "OK" => {
                if fields.get("otp").map(String::as_str) != Some(otp) {
                    return Err(OtpError::InvalidResponse("otp mismatch".to_string()));
                }
                if fields.get("nonce").map(String::as_str) != Some(nonce) {
                    return Err(OtpError::InvalidResponse("nonce mismatch".to_string()));
                }
                Ok(true)
            }
            "BAD_OTP" | "REPLAYED_OTP" => {
                debug!(status, "OTP rejected by validation service");
                Ok(false)
            }
            "BACKEND_ERROR" | "NOT_ENOUGH_ANSWERS" | "REPLAYED_REQUEST" => {
                warn!(status, "validation service could not answer");
                Err(OtpError::Unavailable(status.to_string()))
            }
            "BAD_SIGNATURE" | "NO_SUCH_CLIENT" | "MISSING_PARAMETER" | "OPERATION_NOT_ALLOWED" => {
                Err(OtpError::Misconfigured(status.to_string()))
            }
            other => Err(OtpError::InvalidResponse(format!("unknown status {other}"))),
        }
    }
}

fn generate_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

/// Canonical form signed by both sides: sorted pairs, `h` excluded.
fn signing_payload(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .filter(|(key, _)| key.as_str() != "h")
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn mac_for(key: &[u8], params: &BTreeMap<String, String>) -> Result<HmacSha1, OtpError> {
    let mut mac = HmacSha1::new_from_slice(key)
        .map_err(|_| OtpError::Misconfigured("invalid API key length".to_string()))?;
    mac.update(signing_payload(params).as_bytes());
    Ok(mac)
}

fn sign(key: &[u8], params: &BTreeMap<String, String>) -> Result<String, OtpError> {
    let mac = mac_for(key, params)?;
    Ok(Base64::encode_string(&mac.finalize().into_bytes()))
}

fn verify_signature(key: &[u8], fields: &BTreeMap<String, String>) -> Result<(), OtpError> {
    let signature = fields
        .get("h")
        .ok_or_else(|| OtpError::InvalidResponse("missing signature".to_string()))?;
    let signature = Base64::decode_vec(signature)
        .map_err(|_| OtpError::InvalidResponse("signature is not base64".to_string()))?;
    mac_for(key, fields)?
        .verify_slice(&signature)
        .map_err(|_| OtpError::InvalidResponse("signature mismatch".to_string()))
}

fn parse_response(body: &str) -> BTreeMap<String, String> {
    body.lines()
        .filter_map(|line| line.trim().split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}
