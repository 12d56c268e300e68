use super::{
    auth::password::{hash_password, normalize_email, password_problem, valid_email, valid_username},
    Message,
};
use crate::store::{NewUser, Store, StoreError};
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{Html, IntoResponse},
    Json,
};
use serde::Deserialize;
use tracing::{error, info, instrument};
use utoipa::ToSchema;

const REGISTER_PAGE: &str = include_str!("../../../assets/register.html");

#[derive(ToSchema, Deserialize)]
pub struct UserRegister {
    username: String,
    email: String,
    password: String,
    confirm_password: Option<String>,
}

#[utoipa::path(
    get,
    path = "/register",
    responses(
        (status = 200, description = "Registration form", body = String, content_type = "text/html")
    ),
    tag = "register"
)]
pub async fn register_page() -> Html<&'static str> {
    Html(REGISTER_PAGE)
}

fn reply(status: StatusCode, message: &str) -> (StatusCode, Json<Message>) {
    (status, Json(Message::new(message)))
}

#[utoipa::path(
    post,
    path = "/register",
    request_body = UserRegister,
    responses (
        (status = 201, description = "Registration successful", body = Message, content_type = "application/json"),
        (status = 400, description = "Missing or invalid fields", body = Message),
        (status = 409, description = "Username or email already exists", body = Message),
        (status = 500, description = "Storage failure", body = Message),
    ),
    tag = "register"
)]
#[instrument(skip(store, payload))]
pub async fn register(
    store: Extension<Store>,
    payload: Option<Json<UserRegister>>,
) -> impl IntoResponse {
    let user: UserRegister = match payload {
        Some(Json(payload)) => payload,
        None => return reply(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    let username = user.username.trim();
    let email = normalize_email(&user.email);

    if !valid_username(username) {
        return reply(StatusCode::BAD_REQUEST, "Invalid username");
    }

    if !valid_email(&email) {
        return reply(StatusCode::BAD_REQUEST, "Invalid email");
    }

    if let Some(problem) = password_problem(&user.password) {
        return reply(StatusCode::BAD_REQUEST, problem);
    }

    if user
        .confirm_password
        .as_deref()
        .is_some_and(|confirm| confirm != user.password)
    {
        return reply(StatusCode::BAD_REQUEST, "Passwords do not match");
    }

    let password_hash = match hash_password(&user.password) {
        Ok(hash) => hash,
        Err(e) => {
            error!("Error hashing password: {:?}", e);
            return reply(StatusCode::INTERNAL_SERVER_ERROR, "Error registering user");
        }
    };

    match store
        .users
        .create(NewUser {
            username: username.to_string(),
            email,
            password_hash,
        })
        .await
    {
        Ok(user) => {
            info!(user_id = %user.id, "User registered");
            reply(StatusCode::CREATED, "User registered successfully")
        }
        Err(StoreError::Conflict(_)) => {
            info!("Registration rejected: duplicate username or email");
            reply(StatusCode::CONFLICT, "Username or email already exists")
        }
        Err(e) => {
            error!("Error inserting user: {:?}", e);
            reply(StatusCode::INTERNAL_SERVER_ERROR, "Error registering user")
        }
    }
}
