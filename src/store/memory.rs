//! In-memory repositories used by tests and local experiments.

use super::{
    AttemptKey, AttemptUpdate, Device, DeviceRepository, FailedLoginAttempt,
    FailedLoginRepository, NewDevice, NewUser, Ping, Session, SessionRepository, StoreError, User,
    UserRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    devices: HashMap<Uuid, Device>,
    failed_logins: HashMap<Uuid, FailedLoginAttempt>,
    sessions: HashMap<Uuid, Session>,
}

/// All four repositories backed by hash maps behind a single lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ping for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let mut tables = self.tables.write().await;
        if tables
            .users
            .values()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(StoreError::Conflict("users".to_string()));
        }
        let now = Utc::now();
        let row = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            yubikey_id: None,
            is_locked: false,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn set_locked(&self, id: Uuid, locked: bool) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let user = tables.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.is_locked = locked;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn set_yubikey(&self, id: Uuid, yubikey_id: Option<&str>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let user = tables.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.yubikey_id = yubikey_id.map(str::to_string);
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let user = tables.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        password_hash.clone_into(&mut user.password_hash);
        user.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl DeviceRepository for MemoryStore {
    async fn create(&self, device: NewDevice) -> Result<Device, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&device.user_id) {
            return Err(StoreError::NotFound);
        }
        if tables
            .devices
            .values()
            .any(|d| d.user_id == device.user_id && d.fingerprint == device.fingerprint)
        {
            return Err(StoreError::Conflict("devices".to_string()));
        }
        let now = Utc::now();
        let row = Device {
            id: Uuid::new_v4(),
            user_id: device.user_id,
            fingerprint: device.fingerprint,
            device_name: device.device_name,
            device_type: device.device_type,
            os: device.os,
            browser: device.browser,
            ip_address: device.ip_address,
            is_trusted: false,
            login_count: 0,
            last_used: now,
            created_at: now,
            updated_at: now,
        };
        tables.devices.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Device>, StoreError> {
        Ok(self.tables.read().await.devices.get(&id).cloned())
    }

    async fn find_by_fingerprint(
        &self,
        user_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Device>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .devices
            .values()
            .find(|d| d.user_id == user_id && d.fingerprint == fingerprint)
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Device>, StoreError> {
        let mut devices: Vec<Device> = self
            .tables
            .read()
            .await
            .devices
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        devices.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        Ok(devices)
    }

    async fn update(&self, device: &Device) -> Result<Device, StoreError> {
        let mut tables = self.tables.write().await;
        let row = tables
            .devices
            .get_mut(&device.id)
            .ok_or(StoreError::NotFound)?;
        row.ip_address.clone_from(&device.ip_address);
        row.is_trusted = device.is_trusted;
        row.login_count = device.login_count;
        row.last_used = device.last_used;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let row = tables.devices.get_mut(&id).ok_or(StoreError::NotFound)?;
        row.last_used = at;
        row.updated_at = at;
        Ok(())
    }
}

#[async_trait]
impl FailedLoginRepository for MemoryStore {
    async fn find(&self, key: &AttemptKey) -> Result<Option<FailedLoginAttempt>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .failed_logins
            .values()
            .find(|row| &row.key() == key)
            .cloned())
    }

    async fn record(
        &self,
        key: &AttemptKey,
        now: DateTime<Utc>,
        update: &AttemptUpdate<'_>,
    ) -> Result<FailedLoginAttempt, StoreError> {
        // The write guard is held across read, update and insert.
        let mut tables = self.tables.write().await;
        let current = tables
            .failed_logins
            .values()
            .find(|row| &row.key() == key)
            .cloned()
            .unwrap_or_else(|| FailedLoginAttempt::empty(key, now));
        let next = update(current);
        tables.failed_logins.insert(next.id, next.clone());
        Ok(next)
    }

    async fn clear(&self, key: &AttemptKey) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.failed_logins.len();
        tables.failed_logins.retain(|_, row| &row.key() != key);
        Ok(tables.failed_logins.len() != before)
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .sessions
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn find_active(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .sessions
            .values()
            .find(|s| s.token_hash == token_hash && s.expires_at > now)
            .cloned())
    }

    async fn delete(&self, token_hash: &[u8]) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .sessions
            .retain(|_, s| s.token_hash != token_hash);
        Ok(())
    }

    async fn delete_expired(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.sessions.len();
        tables
            .sessions
            .retain(|_, s| s.user_id != user_id || s.expires_at > now);
        Ok((before - tables.sessions.len()) as u64)
    }
}
