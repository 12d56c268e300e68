use crate::{
    api::handlers::{auth::AuthState, health, login, logout, me, register, test_route},
    cache::Cache,
    store::Store,
};
use anyhow::Result;
use axum::{
    body::Body,
    extract::{Extension, MatchedPath},
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

pub mod error;
pub mod handlers;
mod openapi;

pub use openapi::{openapi, ApiDoc};

/// Build the application router with its shared state attached.
#[must_use]
pub fn router(store: Store, auth_state: Arc<AuthState>, cache: Option<Cache>) -> Router {
    Router::new()
        .route("/test", get(test_route))
        .route("/health", get(health).options(health))
        .route("/register", get(register::register_page).post(register::register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me::profile))
        .route("/me/devices", get(me::devices))
        .route("/me/devices/:id/trust", post(me::trust_device))
        .route("/me/yubikey", post(me::bind_yubikey))
        .route("/me/password", post(me::change_password))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(store))
                .layer(Extension(auth_state))
                .layer(Extension(cache)),
        )
}

/// Serve `app` until Ctrl-C.
///
/// # Errors
/// Returns an error if the port cannot be bound or the server fails.
pub async fn serve(port: u16, app: Router) -> Result<()> {
    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
