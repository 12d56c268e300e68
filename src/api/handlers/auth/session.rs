//! Session tokens, cookies and header extraction.
//!
//! The raw token only ever travels in the cookie (or bearer header); the
//! database stores its SHA-256.

use super::state::AuthConfig;
use crate::store::{Session, Store, StoreError};
use anyhow::{Context, Result};
use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE},
    HeaderMap, HeaderValue,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

pub const SESSION_COOKIE_NAME: &str = "guestbook_session";

/// Create a new session token for the auth cookie.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

pub fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Persist a session for `user_id` on `device_id` and return the raw token.
/// The user's expired sessions are deleted first.
///
/// # Errors
/// Returns an error if the token cannot be generated or stored.
pub async fn create_session(
    store: &Store,
    config: &AuthConfig,
    user_id: Uuid,
    device_id: Uuid,
    now: DateTime<Utc>,
) -> Result<String> {
    let swept = store
        .sessions
        .delete_expired(user_id, now)
        .await
        .context("failed to delete expired sessions")?;
    if swept > 0 {
        debug!(%user_id, swept, "Deleted expired sessions");
    }

    let token = generate_session_token()?;
    let session = Session {
        id: Uuid::new_v4(),
        user_id,
        device_id,
        token_hash: hash_session_token(&token),
        created_at: now,
        expires_at: now + Duration::seconds(config.session_ttl_seconds()),
    };
    store
        .sessions
        .create(&session)
        .await
        .context("failed to store session")?;
    Ok(token)
}

/// # Errors
/// Returns an error if the lookup fails.
pub async fn delete_session(store: &Store, token: &str) -> Result<(), StoreError> {
    store.sessions.delete(&hash_session_token(token)).await
}

pub fn session_cookie(config: &AuthConfig, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.session_ttl_seconds();
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    ))
}

pub fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("guestbook_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Session token from the bearer header, falling back to the cookie.
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let value = headers.get(COOKIE)?.to_str().ok()?;
    value.split(';').find_map(|pair| {
        let (key, val) = pair.trim().split_once('=')?;
        (key.trim() == SESSION_COOKIE_NAME && !val.trim().is_empty())
            .then(|| val.trim().to_string())
    })
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Client IP from common proxy headers.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
