//! Persistence for users, devices, failed login attempts and sessions.
//!
//! Rows are plain structs; each entity has a repository trait exposing the
//! `create`/`find`/`update` operations the handlers need. [`Store`] bundles
//! one implementation of every repository so it can be injected as a single
//! `Extension`. Two backends exist: PostgreSQL (`postgres`) and an in-memory
//! map (`memory`) used by the test-suite.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::{fmt, str::FromStr, sync::Arc};
use utoipa::ToSchema;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique constraint was violated (username, email, fingerprint...).
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("record not found")]
    NotFound,
    #[error("invalid stored value: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub yubikey_id: Option<String>,
    pub is_locked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Allowed values of `devices.device_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    Bot,
    Unknown,
}

impl DeviceType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
            Self::Bot => "bot",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "desktop" => Ok(Self::Desktop),
            "mobile" => Ok(Self::Mobile),
            "tablet" => Ok(Self::Tablet),
            "bot" => Ok(Self::Bot),
            "unknown" => Ok(Self::Unknown),
            other => Err(StoreError::Corrupt(format!("unknown device type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Device {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip)]
    pub fingerprint: String,
    pub device_name: String,
    pub device_type: DeviceType,
    pub os: String,
    pub browser: String,
    pub ip_address: Option<String>,
    pub is_trusted: bool,
    pub login_count: i32,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDevice {
    pub user_id: Uuid,
    pub fingerprint: String,
    pub device_name: String,
    pub device_type: DeviceType,
    pub os: String,
    pub browser: String,
    pub ip_address: Option<String>,
}

/// What a failed-attempt row counts against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttemptKey {
    /// An existing account.
    Account(Uuid),
    /// A client presenting an unknown username.
    Client {
        ip_address: String,
        user_agent: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedLoginAttempt {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub ip_address: String,
    pub user_agent: String,
    pub attempts: i32,
    pub last_attempt_at: DateTime<Utc>,
    pub is_locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FailedLoginAttempt {
    /// Row for `key` before its first failure.
    #[must_use]
    pub fn empty(key: &AttemptKey, now: DateTime<Utc>) -> Self {
        let (user_id, ip_address, user_agent) = match key {
            AttemptKey::Account(user_id) => (Some(*user_id), String::new(), String::new()),
            AttemptKey::Client {
                ip_address,
                user_agent,
            } => (None, ip_address.clone(), user_agent.clone()),
        };
        Self {
            id: Uuid::new_v4(),
            user_id,
            ip_address,
            user_agent,
            attempts: 0,
            last_attempt_at: now,
            is_locked: false,
            locked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn key(&self) -> AttemptKey {
        match self.user_id {
            Some(user_id) => AttemptKey::Account(user_id),
            None => AttemptKey::Client {
                ip_address: self.ip_address.clone(),
                user_agent: self.user_agent.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: Uuid,
    pub token_hash: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user; duplicates of username or email yield [`StoreError::Conflict`].
    async fn create(&self, user: NewUser) -> Result<User, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn set_locked(&self, id: Uuid, locked: bool) -> Result<(), StoreError>;
    async fn set_yubikey(&self, id: Uuid, yubikey_id: Option<&str>) -> Result<(), StoreError>;
    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn create(&self, device: NewDevice) -> Result<Device, StoreError>;
    async fn find(&self, id: Uuid) -> Result<Option<Device>, StoreError>;
    async fn find_by_fingerprint(
        &self,
        user_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Device>, StoreError>;
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Device>, StoreError>;
    /// Persist the mutable columns (`ip_address`, `is_trusted`, `login_count`, `last_used`).
    async fn update(&self, device: &Device) -> Result<Device, StoreError>;
    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Computes the next state of a failed-login row from the current one.
pub type AttemptUpdate<'a> = dyn Fn(FailedLoginAttempt) -> FailedLoginAttempt + Send + Sync + 'a;

#[async_trait]
pub trait FailedLoginRepository: Send + Sync {
    async fn find(&self, key: &AttemptKey) -> Result<Option<FailedLoginAttempt>, StoreError>;
    /// Apply `update` to the row for `key` and store the result.
    ///
    /// Concurrent calls for the same key are serialized: each one sees the
    /// row written by the previous. A missing row is passed to `update` as
    /// an empty one (`attempts == 0`, unlocked, `last_attempt_at == now`).
    async fn record(
        &self,
        key: &AttemptKey,
        now: DateTime<Utc>,
        update: &AttemptUpdate<'_>,
    ) -> Result<FailedLoginAttempt, StoreError>;
    /// Remove the row for `key`, returning whether one existed.
    async fn clear(&self, key: &AttemptKey) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &Session) -> Result<(), StoreError>;
    /// Only unexpired sessions are returned.
    async fn find_active(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError>;
    async fn delete(&self, token_hash: &[u8]) -> Result<(), StoreError>;
    /// Drop the user's sessions that expired at or before `now`.
    async fn delete_expired(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Liveness probe used by `/health`.
#[async_trait]
pub trait Ping: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;
}

/// One implementation of every repository, cheap to clone.
#[derive(Clone)]
pub struct Store {
    pub users: Arc<dyn UserRepository>,
    pub devices: Arc<dyn DeviceRepository>,
    pub failed_logins: Arc<dyn FailedLoginRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub health: Arc<dyn Ping>,
}

impl Store {
    #[must_use]
    pub fn postgres(pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            users: store.clone(),
            devices: store.clone(),
            failed_logins: store.clone(),
            sessions: store.clone(),
            health: store,
        }
    }

    #[must_use]
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::default());
        Self {
            users: store.clone(),
            devices: store.clone(),
            failed_logins: store.clone(),
            sessions: store.clone(),
            health: store,
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_type_round_trips_through_text() {
        for kind in [
            DeviceType::Desktop,
            DeviceType::Mobile,
            DeviceType::Tablet,
            DeviceType::Bot,
            DeviceType::Unknown,
        ] {
            assert_eq!(kind.as_str().parse::<DeviceType>().ok(), Some(kind));
        }
    }

    #[test]
    fn device_type_rejects_values_outside_enumeration() {
        assert!(matches!(
            "smartwatch".parse::<DeviceType>(),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn attempt_key_follows_user_id() {
        let now = Utc::now();
        let mut attempt = FailedLoginAttempt {
            id: Uuid::new_v4(),
            user_id: None,
            ip_address: "10.0.0.1".to_string(),
            user_agent: "curl/8".to_string(),
            attempts: 1,
            last_attempt_at: now,
            is_locked: false,
            locked_at: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(
            attempt.key(),
            AttemptKey::Client {
                ip_address: "10.0.0.1".to_string(),
                user_agent: "curl/8".to_string(),
            }
        );

        let user_id = Uuid::new_v4();
        attempt.user_id = Some(user_id);
        assert_eq!(attempt.key(), AttemptKey::Account(user_id));
    }
}
