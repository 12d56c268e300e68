use super::auth::session::{clear_session_cookie, delete_session, extract_session_token};
use crate::store::Store;
use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
};
use tracing::error;

#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, store: Extension<Store>) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers) {
        if let Err(err) = delete_session(&store, &token).await {
            error!("Failed to delete session: {err}");
        }
    }

    // The cookie is cleared even when no session was found.
    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, clear_session_cookie());
    (StatusCode::NO_CONTENT, response_headers)
}
