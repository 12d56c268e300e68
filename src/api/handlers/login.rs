//! `POST /login`.
//!
//! Order of checks: client lock, account lookup, account lock, password,
//! then the YubiKey OTP when the account has one bound. Every rejection
//! after the lock checks counts as a failed attempt.

use super::auth::{
    device::{register_login, ClientInfo},
    lockout::{self, LockoutPolicy},
    password::verify_password,
    session::{create_session, session_cookie},
    AuthState,
};
use crate::{
    api::error::AppError,
    otp::{self, OtpError},
    store::{AttemptKey, Device, Store, User},
};
use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize)]
pub struct UserLogin {
    username: String,
    password: String,
    /// Required when the account has a YubiKey bound.
    otp: Option<String>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct LoginResponse {
    pub message: String,
    pub device: Device,
}

#[utoipa::path(
    post,
    path = "/login",
    request_body = UserLogin,
    responses(
        (status = 200, description = "Login successful, session cookie set", body = LoginResponse),
        (status = 400, description = "Missing or empty fields", body = super::Message),
        (status = 401, description = "Invalid credentials", body = super::Message),
        (status = 423, description = "Account locked", body = super::Message),
        (status = 503, description = "OTP verification unavailable", body = super::Message),
    ),
    tag = "auth"
)]
#[instrument(skip(headers, store, auth_state, payload))]
pub async fn login(
    headers: HeaderMap,
    store: Extension<Store>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<UserLogin>>,
) -> Result<impl IntoResponse, AppError> {
    let Some(Json(request)) = payload else {
        return Err(AppError::Validation("Missing payload".to_string()));
    };

    let username = request.username.trim();
    if username.is_empty() || request.password.is_empty() {
        return Err(AppError::Validation(
            "Username and password are required".to_string(),
        ));
    }

    let client = ClientInfo::from_headers(&headers);
    let ip_address = client
        .ip_address
        .clone()
        .unwrap_or_else(|| "unknown".to_string());
    let client_key = AttemptKey::Client {
        ip_address: ip_address.clone(),
        user_agent: client.user_agent.clone(),
    };
    let policy = LockoutPolicy::from(auth_state.config());
    let now = Utc::now();

    if lockout::client_locked(&store, &policy, &client_key, now).await? {
        debug!("Rejected login from locked client");
        return Err(AppError::Locked);
    }

    let Some(user) = store.users.find_by_username(username).await? else {
        lockout::record_failure(
            &store,
            &policy,
            &client_key,
            &ip_address,
            &client.user_agent,
            now,
        )
        .await?;
        return Err(AppError::InvalidCredentials);
    };

    if lockout::account_locked(&store, &policy, &user, now).await? {
        debug!(user_id = %user.id, "Rejected login for locked account");
        return Err(AppError::Locked);
    }

    let checked = check_credentials(&auth_state, &user, &request).await;
    if let Err(err) = checked {
        if matches!(err, AppError::InvalidCredentials) {
            lockout::record_failure(
                &store,
                &policy,
                &AttemptKey::Account(user.id),
                &ip_address,
                &client.user_agent,
                now,
            )
            .await?;
        }
        return Err(err);
    }

    lockout::record_success(&store, &user).await?;
    let device = register_login(
        &store,
        user.id,
        &client,
        auth_state.config().device_trust_after(),
        now,
    )
    .await?;

    let token = create_session(&store, auth_state.config(), user.id, device.id, now).await?;
    let cookie = session_cookie(auth_state.config(), &token)
        .map_err(|err| AppError::Internal(anyhow::anyhow!(err)))?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, cookie);

    info!(user_id = %user.id, device_id = %device.id, "Login succeeded");

    Ok((
        StatusCode::OK,
        response_headers,
        Json(LoginResponse {
            message: "Login successful".to_string(),
            device,
        }),
    ))
}

async fn check_credentials(
    auth_state: &AuthState,
    user: &User,
    request: &UserLogin,
) -> Result<(), AppError> {
    if !verify_password(&request.password, &user.password_hash) {
        return Err(AppError::InvalidCredentials);
    }

    let Some(bound) = user.yubikey_id.as_deref() else {
        return Ok(());
    };

    let otp = request.otp.as_deref().map(str::trim).unwrap_or_default();
    if otp::public_id(otp) != Some(bound) {
        return Err(AppError::InvalidCredentials);
    }

    let verifier = auth_state.otp().ok_or_else(|| {
        AppError::OtpUnavailable(OtpError::Misconfigured(
            "no validation service configured".to_string(),
        ))
    })?;

    if verifier.verify(otp).await? {
        Ok(())
    } else {
        Err(AppError::InvalidCredentials)
    }
}
