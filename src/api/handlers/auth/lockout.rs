//! Failed-login tracking and account lockout.
//!
//! Each failure is counted against a row: the account's row when the
//! username exists, otherwise a row for the client (IP + user agent).
//! Failures further apart than the window restart the count at 1. Reaching
//! the threshold locks the row, and for accounts also `users.is_locked`.
//! A locked row rejects every login, including one with the correct
//! password, until it expires (`unlock_after`) or is cleared.

use super::state::AuthConfig;
use crate::store::{AttemptKey, FailedLoginAttempt, Store, StoreError, User};
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub threshold: u32,
    pub window: Duration,
    pub unlock_after: Option<Duration>,
}

impl From<&AuthConfig> for LockoutPolicy {
    fn from(config: &AuthConfig) -> Self {
        Self {
            threshold: config.lockout_threshold(),
            window: Duration::seconds(config.lockout_window_seconds()),
            unlock_after: config.unlock_after_seconds().map(Duration::seconds),
        }
    }
}

impl LockoutPolicy {
    /// Whether `row` blocks logins at `now`.
    #[must_use]
    pub fn is_locked(&self, row: &FailedLoginAttempt, now: DateTime<Utc>) -> bool {
        if !row.is_locked {
            return false;
        }
        match (self.unlock_after, row.locked_at) {
            (Some(after), Some(locked_at)) => now < locked_at + after,
            _ => true,
        }
    }

    /// Apply one more failure on top of `row`.
    ///
    /// An expired lock is released and the count restarts at 1, as does a
    /// failure further than `window` after the previous one.
    #[must_use]
    pub fn next_attempt(
        &self,
        mut row: FailedLoginAttempt,
        ip_address: &str,
        user_agent: &str,
        now: DateTime<Utc>,
    ) -> FailedLoginAttempt {
        let still_locked = self.is_locked(&row, now);
        if !still_locked && (row.is_locked || now - row.last_attempt_at > self.window) {
            row.attempts = 1;
            row.is_locked = false;
            row.locked_at = None;
        } else {
            row.attempts = row.attempts.saturating_add(1);
        }

        ip_address.clone_into(&mut row.ip_address);
        user_agent.clone_into(&mut row.user_agent);
        row.last_attempt_at = now;
        row.updated_at = now;

        let threshold = i32::try_from(self.threshold).unwrap_or(i32::MAX);
        if !row.is_locked && row.attempts >= threshold {
            row.is_locked = true;
            row.locked_at = Some(now);
        }

        row
    }

    /// Lock state of an account.
    ///
    /// The failure row decides when there is one; `users.is_locked` only
    /// covers accounts without a row.
    #[must_use]
    pub fn account_locked(
        &self,
        user: &User,
        row: Option<&FailedLoginAttempt>,
        now: DateTime<Utc>,
    ) -> bool {
        match row {
            Some(row) => self.is_locked(row, now),
            None => user.is_locked,
        }
    }
}

/// Whether the client key is currently locked.
///
/// # Errors
/// Returns an error if the store lookup fails.
pub async fn client_locked(
    store: &Store,
    policy: &LockoutPolicy,
    key: &AttemptKey,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    Ok(store
        .failed_logins
        .find(key)
        .await?
        .is_some_and(|row| policy.is_locked(&row, now)))
}

/// Whether the account is currently locked.
///
/// # Errors
/// Returns an error if the store lookup fails.
pub async fn account_locked(
    store: &Store,
    policy: &LockoutPolicy,
    user: &User,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let row = store
        .failed_logins
        .find(&AttemptKey::Account(user.id))
        .await?;
    Ok(policy.account_locked(user, row.as_ref(), now))
}

/// Record a failed login and lock when the threshold is reached.
///
/// # Errors
/// Returns an error if the store cannot be read or written.
pub async fn record_failure(
    store: &Store,
    policy: &LockoutPolicy,
    key: &AttemptKey,
    ip_address: &str,
    user_agent: &str,
    now: DateTime<Utc>,
) -> Result<FailedLoginAttempt, StoreError> {
    let was_locked = AtomicBool::new(false);
    let row = store
        .failed_logins
        .record(key, now, &|current| {
            was_locked.store(current.is_locked, Ordering::Relaxed);
            policy.next_attempt(current, ip_address, user_agent, now)
        })
        .await?;
    let was_locked = was_locked.into_inner();

    if row.is_locked && !was_locked {
        warn!(
            attempts = row.attempts,
            ip_address, "Locking after repeated failed logins"
        );
    }

    // Keep the user flag in step with the row, including expired locks.
    if let AttemptKey::Account(user_id) = key {
        if row.is_locked != was_locked {
            store.users.set_locked(*user_id, row.is_locked).await?;
        }
    }

    Ok(row)
}

/// Reset the account's counter after a successful login.
///
/// # Errors
/// Returns an error if the store cannot be written.
pub async fn record_success(store: &Store, user: &User) -> Result<(), StoreError> {
    store
        .failed_logins
        .clear(&AttemptKey::Account(user.id))
        .await?;
    if user.is_locked {
        store.users.set_locked(user.id, false).await?;
    }
    Ok(())
}

/// Clear the lock of `username`; `false` when no such user exists.
///
/// # Errors
/// Returns an error if the store cannot be read or written.
pub async fn unlock(store: &Store, username: &str) -> Result<bool, StoreError> {
    let Some(user) = store.users.find_by_username(username).await? else {
        return Ok(false);
    };
    let cleared = store
        .failed_logins
        .clear(&AttemptKey::Account(user.id))
        .await?;
    store.users.set_locked(user.id, false).await?;
    info!(username, cleared, "Account unlocked");
    Ok(true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::NewUser;
    use uuid::Uuid;

    fn policy(unlock_after: Option<i64>) -> LockoutPolicy {
        LockoutPolicy {
            threshold: 3,
            window: Duration::seconds(900),
            unlock_after: unlock_after.map(Duration::seconds),
        }
    }

    fn client() -> AttemptKey {
        AttemptKey::Client {
            ip_address: "10.0.0.1".to_string(),
            user_agent: "curl/8".to_string(),
        }
    }

    fn fail(
        policy: &LockoutPolicy,
        previous: Option<FailedLoginAttempt>,
        now: DateTime<Utc>,
    ) -> FailedLoginAttempt {
        let row = previous.unwrap_or_else(|| FailedLoginAttempt::empty(&client(), now));
        policy.next_attempt(row, "10.0.0.1", "curl/8", now)
    }

    #[test]
    fn counts_inside_window_and_locks_at_threshold() {
        let policy = policy(None);
        let start = Utc::now();
        let first = fail(&policy, None, start);
        assert_eq!(first.attempts, 1);
        assert_eq!(first.user_id, None);
        assert!(!first.is_locked);

        let second = fail(&policy, Some(first), start + Duration::seconds(10));
        assert_eq!(second.attempts, 2);
        assert!(!second.is_locked);

        let locked_at = start + Duration::seconds(20);
        let third = fail(&policy, Some(second), locked_at);
        assert_eq!(third.attempts, 3);
        assert!(third.is_locked);
        assert_eq!(third.locked_at, Some(locked_at));
        assert!(policy.is_locked(&third, locked_at + Duration::days(365)));
    }

    #[test]
    fn failure_after_window_restarts_count() {
        let policy = policy(None);
        let start = Utc::now();
        let first = fail(&policy, None, start);
        let second = fail(&policy, Some(first.clone()), start + Duration::seconds(901));
        assert_eq!(second.attempts, 1);
        assert_eq!(second.id, first.id);
    }

    #[test]
    fn lock_without_expiry_ignores_window() {
        let policy = policy(None);
        let start = Utc::now();
        let mut row = fail(&policy, None, start);
        row = fail(&policy, Some(row), start);
        row = fail(&policy, Some(row), start);
        assert!(row.is_locked);

        let later = fail(&policy, Some(row), start + Duration::days(2));
        assert!(later.is_locked);
        assert_eq!(later.locked_at, Some(start));
    }

    #[test]
    fn timed_unlock_expires() {
        let policy = policy(Some(600));
        let start = Utc::now();
        let mut row = fail(&policy, None, start);
        row = fail(&policy, Some(row), start);
        row = fail(&policy, Some(row), start);
        assert!(policy.is_locked(&row, start + Duration::seconds(599)));
        assert!(!policy.is_locked(&row, start + Duration::seconds(600)));

        let fresh = fail(&policy, Some(row), start + Duration::seconds(601));
        assert_eq!(fresh.attempts, 1);
        assert!(!fresh.is_locked);
        assert_eq!(fresh.locked_at, None);
    }

    #[test]
    fn account_rows_carry_user_id() {
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let row = policy(None).next_attempt(
            FailedLoginAttempt::empty(&AttemptKey::Account(user_id), now),
            "10.0.0.1",
            "curl/8",
            now,
        );
        assert_eq!(row.user_id, Some(user_id));
    }

    #[tokio::test]
    async fn account_lock_round_trip() {
        let store = Store::memory();
        let user = store
            .users
            .create(NewUser {
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap();
        let policy = policy(None);
        let key = AttemptKey::Account(user.id);
        let now = Utc::now();

        for _ in 0..3 {
            record_failure(&store, &policy, &key, "10.0.0.1", "curl/8", now)
                .await
                .unwrap();
        }

        let user = store.users.find_by_id(user.id).await.unwrap().unwrap();
        assert!(user.is_locked);
        assert!(account_locked(&store, &policy, &user, now).await.unwrap());

        assert!(unlock(&store, "alice").await.unwrap());
        let user = store.users.find_by_id(user.id).await.unwrap().unwrap();
        assert!(!user.is_locked);
        assert!(!account_locked(&store, &policy, &user, now).await.unwrap());
        assert!(!unlock(&store, "nobody").await.unwrap());
    }

    #[tokio::test]
    async fn success_clears_counter() {
        let store = Store::memory();
        let user = store
            .users
            .create(NewUser {
                username: "bob".to_string(),
                email: "bob@example.com".to_string(),
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap();
        let policy = policy(None);
        let key = AttemptKey::Account(user.id);
        let now = Utc::now();

        record_failure(&store, &policy, &key, "10.0.0.1", "curl/8", now)
            .await
            .unwrap();
        record_success(&store, &user).await.unwrap();
        assert!(store.failed_logins.find(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_usernames_lock_the_client() {
        let store = Store::memory();
        let policy = policy(None);
        let now = Utc::now();

        for _ in 0..3 {
            record_failure(&store, &policy, &client(), "10.0.0.1", "curl/8", now)
                .await
                .unwrap();
        }
        assert!(client_locked(&store, &policy, &client(), now).await.unwrap());

        let other = AttemptKey::Client {
            ip_address: "10.0.0.2".to_string(),
            user_agent: "curl/8".to_string(),
        };
        assert!(!client_locked(&store, &policy, &other, now).await.unwrap());
    }

    #[tokio::test]
    async fn failure_after_expired_lock_does_not_relock_account() {
        let store = Store::memory();
        let user = store
            .users
            .create(NewUser {
                username: "carol".to_string(),
                email: "carol@example.com".to_string(),
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap();
        let policy = policy(Some(600));
        let key = AttemptKey::Account(user.id);
        let start = Utc::now();

        for _ in 0..3 {
            record_failure(&store, &policy, &key, "10.0.0.1", "curl/8", start)
                .await
                .unwrap();
        }
        let locked = store.users.find_by_id(user.id).await.unwrap().unwrap();
        assert!(account_locked(&store, &policy, &locked, start).await.unwrap());

        let expired = start + Duration::seconds(601);
        assert!(!account_locked(&store, &policy, &locked, expired).await.unwrap());

        let row = record_failure(&store, &policy, &key, "10.0.0.1", "curl/8", expired)
            .await
            .unwrap();
        assert_eq!(row.attempts, 1);
        assert!(!row.is_locked);

        let user = store.users.find_by_id(user.id).await.unwrap().unwrap();
        assert!(!user.is_locked);
        let much_later = expired + Duration::days(30);
        assert!(!account_locked(&store, &policy, &user, much_later).await.unwrap());
    }

    #[test]
    fn unlocked_row_overrides_stale_user_flag() {
        let policy = policy(Some(600));
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: "dave".to_string(),
            email: "dave@example.com".to_string(),
            password_hash: "hash".to_string(),
            yubikey_id: None,
            is_locked: true,
            created_at: now,
            updated_at: now,
        };
        let row = FailedLoginAttempt::empty(&AttemptKey::Account(user.id), now);
        assert!(!policy.account_locked(&user, Some(&row), now));
        assert!(policy.account_locked(&user, None, now));
    }

    #[tokio::test]
    async fn concurrent_failures_all_count() {
        let store = Store::memory();
        let policy = LockoutPolicy {
            threshold: 10,
            window: Duration::seconds(900),
            unlock_after: None,
        };
        let now = Utc::now();

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    record_failure(&store, &policy, &client(), "10.0.0.1", "curl/8", now).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let row = store.failed_logins.find(&client()).await.unwrap().unwrap();
        assert_eq!(row.attempts, 10);
        assert!(row.is_locked);
    }
}
