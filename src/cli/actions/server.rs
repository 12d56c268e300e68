use crate::{
    api::{
        self,
        handlers::auth::{AuthConfig, AuthState},
    },
    cache::Cache,
    otp::{OtpVerifier, YubicoClient, YubicoConfig},
    store::{PgStore, Store},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub redis_url: Option<String>,
    pub yubico_client_id: Option<String>,
    pub yubico_api_key: Option<SecretString>,
    pub yubico_api_url: String,
    pub lockout_threshold: u32,
    pub lockout_window_seconds: i64,
    pub unlock_after_seconds: Option<i64>,
    pub device_trust_after: u32,
    pub session_ttl_seconds: i64,
}

/// Connect to `PostgreSQL` and apply the embedded migrations.
///
/// # Errors
/// Returns an error if the database is unreachable or a migration fails.
pub async fn connect_database(dsn: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    PgStore::migrate(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(pool)
}

/// Execute the server action.
/// # Errors
/// Returns an error if a dependency cannot be reached or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let pool = connect_database(&args.dsn).await?;
    let store = Store::postgres(pool);

    let cache = match &args.redis_url {
        Some(url) => {
            let cache = Cache::connect(url).await?;
            if let Err(err) = cache.smoke_test().await {
                error!("Redis set/get round-trip failed: {err:?}");
            }
            Some(cache)
        }
        None => {
            info!("Redis not configured");
            None
        }
    };

    let otp: Option<Arc<dyn OtpVerifier>> = match args.yubico_client_id {
        Some(client_id) => {
            let mut config = YubicoConfig::new(client_id).with_api_url(args.yubico_api_url);
            if let Some(api_key) = args.yubico_api_key {
                config = config.with_api_key(api_key);
            } else {
                warn!("No Yubico API key configured, responses will not be signature-checked");
            }
            let client: Arc<dyn OtpVerifier> = Arc::new(YubicoClient::new(config)?);
            Some(client)
        }
        None => {
            warn!("No Yubico client id configured, YubiKey logins will be unavailable");
            None
        }
    };

    let auth_config = AuthConfig::new()
        .with_lockout_threshold(args.lockout_threshold)
        .with_lockout_window_seconds(args.lockout_window_seconds)
        .with_unlock_after_seconds(args.unlock_after_seconds)
        .with_device_trust_after(args.device_trust_after)
        .with_session_ttl_seconds(args.session_ttl_seconds);

    info!(?auth_config, "Auth policy");

    let auth_state = Arc::new(AuthState::new(auth_config, otp));

    api::serve(args.port, api::router(store, auth_state, cache)).await
}
