//! Authenticated principal extraction.
//!
//! Flow: read the session token, resolve it to an active session and its
//! user, then touch the session's device so `last_used` follows activity.

use super::session::{extract_session_token, hash_session_token};
use crate::{api::error::AppError, store::Store};
use axum::http::HeaderMap;
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: Uuid,
    pub username: String,
    pub device_id: Uuid,
}

/// Resolve the request's session into a principal, or 401.
///
/// # Errors
/// [`AppError::Unauthorized`] for missing, unknown or expired sessions; store
/// failures are passed through.
pub async fn require_auth(headers: &HeaderMap, store: &Store) -> Result<Principal, AppError> {
    let token = extract_session_token(headers).ok_or(AppError::Unauthorized)?;
    let now = Utc::now();
    let session = store
        .sessions
        .find_active(&hash_session_token(&token), now)
        .await?
        .ok_or(AppError::Unauthorized)?;
    let user = store
        .users
        .find_by_id(session.user_id)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if let Err(err) = store.devices.touch(session.device_id, now).await {
        warn!(device_id = %session.device_id, "Failed to touch device: {err}");
    }

    Ok(Principal {
        user_id: user.id,
        username: user.username,
        device_id: session.device_id,
    })
}
