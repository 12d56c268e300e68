use crate::{cache::Cache, store::Store, GIT_COMMIT_HASH};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
    redis: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Database (and Redis when configured) are healthy", body = Health),
        (status = 503, description = "A dependency is unhealthy", body = Health)
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(
    method: Method,
    store: Extension<Store>,
    cache: Extension<Option<Cache>>,
) -> impl IntoResponse {
    let database = match store.health.ping().await {
        Ok(()) => "ok",
        Err(err) => {
            error!("Failed to ping database: {err}");
            "error"
        }
    };

    let redis = match cache.0.as_ref() {
        Some(cache) => match cache.ping().await {
            Ok(()) => "ok",
            Err(err) => {
                error!("Failed to ping Redis: {err}");
                "error"
            }
        },
        None => "disabled",
    };

    let is_healthy = database == "ok" && redis != "error";

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: database.to_string(),
        redis: redis.to_string(),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();

            headers.insert("X-App", x_app_header_value);

            headers
        })
        .map_err(|err| {
            error!("Failed to parse X-App header: {}", err);
        });

    let headers = headers.unwrap_or_else(|()| HeaderMap::new());

    if is_healthy {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::to_bytes, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/health", get(health).options(health))
            .layer(Extension(Store::memory()))
            .layer(Extension(None::<Cache>))
    }

    #[tokio::test]
    async fn get_reports_dependencies() -> Result<(), Box<dyn std::error::Error>> {
        let response = app()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(Body::empty())?,
            )
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        let x_app = response
            .headers()
            .get("X-App")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        assert!(x_app.is_some_and(|value| value.starts_with("guestbook:")));

        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let health: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(health["database"], "ok");
        assert_eq!(health["redis"], "disabled");
        assert_eq!(health["name"], "guestbook");
        Ok(())
    }

    #[tokio::test]
    async fn options_has_no_body() -> Result<(), Box<dyn std::error::Error>> {
        let response = app()
            .oneshot(
                axum::http::Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/health")
                    .body(Body::empty())?,
            )
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert!(body.is_empty());
        Ok(())
    }
}
