//! Redis client.
//!
//! Only a set/get round-trip at boot and a `PING` for `/health`; nothing in
//! the request path reads from or writes to Redis.

use anyhow::{Context, Result};
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{info, instrument};

const BOOT_KEY: &str = "guestbook:boot";

#[derive(Clone)]
pub struct Cache {
    connection: ConnectionManager,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").finish_non_exhaustive()
    }
}

impl Cache {
    /// Open a managed connection that reconnects on failure.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the first connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("Invalid Redis URL")?;
        let connection = client
            .get_connection_manager()
            .await
            .context("Failed to connect to Redis")?;

        Ok(Self { connection })
    }

    /// # Errors
    /// Returns an error if the command fails.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        let (): () = connection.set(key, value).await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the command fails.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut connection = self.connection.clone();
        let value: Option<String> = connection.get(key).await?;
        Ok(value)
    }

    /// # Errors
    /// Returns an error if Redis does not answer `PONG`.
    pub async fn ping(&self) -> Result<()> {
        let mut connection = self.connection.clone();
        let pong: String = redis::cmd("PING").query_async(&mut connection).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(anyhow::anyhow!("unexpected PING reply: {pong}"))
        }
    }

    /// Write the boot marker and read it back.
    ///
    /// # Errors
    /// Returns an error if either command fails or the value does not match.
    #[instrument(skip(self))]
    pub async fn smoke_test(&self) -> Result<()> {
        let marker = ulid::Ulid::new().to_string();
        self.set(BOOT_KEY, &marker).await?;
        let stored = self.get(BOOT_KEY).await?;
        if stored.as_deref() == Some(marker.as_str()) {
            info!("Redis set/get round-trip succeeded");
            Ok(())
        } else {
            Err(anyhow::anyhow!("Redis returned {stored:?} for {BOOT_KEY}"))
        }
    }
}
