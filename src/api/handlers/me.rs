//! Routes for the signed-in user: profile, devices, YubiKey and password.

use super::{
    auth::{
        password::{hash_password, password_problem, verify_password},
        principal::require_auth,
        AuthState,
    },
    Message,
};
use crate::{
    api::error::AppError,
    otp::{self, OtpError},
    store::{Device, Store},
};
use axum::{
    extract::{Extension, Path},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub yubikey_id: Option<String>,
    pub current_device_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(ToSchema, Deserialize)]
pub struct BindYubikey {
    otp: String,
}

#[derive(ToSchema, Deserialize)]
pub struct ChangePassword {
    current_password: String,
    new_password: String,
    confirm_password: Option<String>,
}

#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Profile of the signed-in user", body = Profile),
        (status = 401, description = "No active session", body = Message),
    ),
    tag = "me"
)]
pub async fn profile(headers: HeaderMap, store: Extension<Store>) -> Result<Json<Profile>, AppError> {
    let principal = require_auth(&headers, &store).await?;
    let user = store
        .users
        .find_by_id(principal.user_id)
        .await?
        .ok_or(AppError::Unauthorized)?;

    Ok(Json(Profile {
        id: user.id,
        username: user.username,
        email: user.email,
        yubikey_id: user.yubikey_id,
        current_device_id: principal.device_id,
        created_at: user.created_at,
    }))
}

#[utoipa::path(
    get,
    path = "/me/devices",
    responses(
        (status = 200, description = "Devices used by the signed-in user, most recent first", body = [Device]),
        (status = 401, description = "No active session", body = Message),
    ),
    tag = "me"
)]
pub async fn devices(
    headers: HeaderMap,
    store: Extension<Store>,
) -> Result<Json<Vec<Device>>, AppError> {
    let principal = require_auth(&headers, &store).await?;
    Ok(Json(store.devices.list_for_user(principal.user_id).await?))
}

#[utoipa::path(
    post,
    path = "/me/devices/{id}/trust",
    params(("id" = Uuid, Path, description = "Device id")),
    responses(
        (status = 200, description = "Device marked as trusted", body = Device),
        (status = 401, description = "No active session", body = Message),
        (status = 404, description = "No such device for this user", body = Message),
    ),
    tag = "me"
)]
pub async fn trust_device(
    headers: HeaderMap,
    store: Extension<Store>,
    Path(id): Path<Uuid>,
) -> Result<Json<Device>, AppError> {
    let principal = require_auth(&headers, &store).await?;

    // Other users' devices are reported as missing.
    let mut device = store
        .devices
        .find(id)
        .await?
        .filter(|device| device.user_id == principal.user_id)
        .ok_or(AppError::NotFound)?;

    if !device.is_trusted {
        device.is_trusted = true;
        device = store.devices.update(&device).await?;
        info!(device_id = %device.id, "Device trusted by user");
    }

    Ok(Json(device))
}

#[utoipa::path(
    post,
    path = "/me/yubikey",
    request_body = BindYubikey,
    responses(
        (status = 200, description = "YubiKey bound to the account", body = Message),
        (status = 400, description = "Malformed or rejected OTP", body = Message),
        (status = 401, description = "No active session", body = Message),
        (status = 503, description = "OTP verification unavailable", body = Message),
    ),
    tag = "me"
)]
pub async fn bind_yubikey(
    headers: HeaderMap,
    store: Extension<Store>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<BindYubikey>>,
) -> Result<Json<Message>, AppError> {
    let principal = require_auth(&headers, &store).await?;
    let Some(Json(request)) = payload else {
        return Err(AppError::Validation("Missing payload".to_string()));
    };

    let otp = request.otp.trim();
    let public_id =
        otp::public_id(otp).ok_or_else(|| AppError::Validation("Invalid OTP".to_string()))?;

    let verifier = auth_state.otp().ok_or_else(|| {
        AppError::OtpUnavailable(OtpError::Misconfigured(
            "no validation service configured".to_string(),
        ))
    })?;

    if !verifier.verify(otp).await? {
        return Err(AppError::Validation("Invalid OTP".to_string()));
    }

    store
        .users
        .set_yubikey(principal.user_id, Some(public_id))
        .await?;
    info!(user_id = %principal.user_id, "YubiKey bound");

    Ok(Json(Message::new("YubiKey registered")))
}

#[utoipa::path(
    post,
    path = "/me/password",
    request_body = ChangePassword,
    responses(
        (status = 200, description = "Password updated", body = Message),
        (status = 400, description = "New password rejected", body = Message),
        (status = 401, description = "No session or wrong current password", body = Message),
    ),
    tag = "me"
)]
pub async fn change_password(
    headers: HeaderMap,
    store: Extension<Store>,
    payload: Option<Json<ChangePassword>>,
) -> Result<Json<Message>, AppError> {
    let principal = require_auth(&headers, &store).await?;
    let Some(Json(request)) = payload else {
        return Err(AppError::Validation("Missing payload".to_string()));
    };

    let user = store
        .users
        .find_by_id(principal.user_id)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if !verify_password(&request.current_password, &user.password_hash) {
        return Err(AppError::InvalidCredentials);
    }
    if let Some(problem) = password_problem(&request.new_password) {
        return Err(AppError::Validation(problem.to_string()));
    }
    if request
        .confirm_password
        .as_deref()
        .is_some_and(|confirm| confirm != request.new_password)
    {
        return Err(AppError::Validation("Passwords do not match".to_string()));
    }

    let password_hash = hash_password(&request.new_password)?;
    store
        .users
        .update_password(user.id, &password_hash)
        .await?;
    info!(user_id = %user.id, "Password updated");

    Ok(Json(Message::new("Password updated")))
}
