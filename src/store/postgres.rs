//! `PostgreSQL` repositories.
//!
//! Every statement runs inside a `db.query` span carrying the SQL text, so
//! slow or failing queries show up in traces next to the HTTP request.

use super::{
    AttemptKey, AttemptUpdate, Device, DeviceRepository, FailedLoginAttempt,
    FailedLoginRepository, NewDevice, NewUser, Ping, Session, SessionRepository, StoreError, User,
    UserRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Connection, PgConnection, PgPool, Row};
use tracing::{info_span, Instrument, Span};
use uuid::Uuid;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const USER_COLUMNS: &str =
    "id, username, email, password_hash, yubikey_id, is_locked, created_at, updated_at";
const DEVICE_COLUMNS: &str = "id, user_id, fingerprint, device_name, device_type, os, browser, ip_address, is_trusted, login_count, last_used, created_at, updated_at";
const ATTEMPT_COLUMNS: &str = "id, user_id, ip_address, user_agent, attempts, last_attempt_at, is_locked, locked_at, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded migrations.
    ///
    /// # Errors
    /// Returns an error if a migration fails or the database is unreachable.
    pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
        MIGRATOR.run(pool).await
    }
}

fn query_span(operation: &'static str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

/// `23505` is `unique_violation`.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn map_write_error(err: sqlx::Error, table: &str) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Conflict(table.to_string())
    } else {
        StoreError::Database(err)
    }
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        yubikey_id: row.try_get("yubikey_id")?,
        is_locked: row.try_get("is_locked")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn device_from_row(row: &PgRow) -> Result<Device, StoreError> {
    let device_type: String = row.try_get("device_type")?;
    Ok(Device {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        fingerprint: row.try_get("fingerprint")?,
        device_name: row.try_get("device_name")?,
        device_type: device_type.parse()?,
        os: row.try_get("os")?,
        browser: row.try_get("browser")?,
        ip_address: row.try_get("ip_address")?,
        is_trusted: row.try_get("is_trusted")?,
        login_count: row.try_get("login_count")?,
        last_used: row.try_get("last_used")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn attempt_from_row(row: &PgRow) -> Result<FailedLoginAttempt, StoreError> {
    Ok(FailedLoginAttempt {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        attempts: row.try_get("attempts")?,
        last_attempt_at: row.try_get("last_attempt_at")?,
        is_locked: row.try_get("is_locked")?,
        locked_at: row.try_get("locked_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn expect_one_row(result: &sqlx::postgres::PgQueryResult) -> Result<(), StoreError> {
    if result.rows_affected() == 0 {
        Err(StoreError::NotFound)
    } else {
        Ok(())
    }
}

#[async_trait]
impl Ping for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self.pool.acquire().instrument(acquire_span).await?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping().instrument(ping_span).await?;
        Ok(())
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let query = format!(
            "INSERT INTO users (id, username, email, password_hash) VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", &query))
            .await
            .map_err(|err| map_write_error(err, "users"))?;
        user_from_row(&row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        let row = sqlx::query(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn set_locked(&self, id: Uuid, locked: bool) -> Result<(), StoreError> {
        let query = "UPDATE users SET is_locked = $2, updated_at = NOW() WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(locked)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await?;
        expect_one_row(&result)
    }

    async fn set_yubikey(&self, id: Uuid, yubikey_id: Option<&str>) -> Result<(), StoreError> {
        let query = "UPDATE users SET yubikey_id = $2, updated_at = NOW() WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(yubikey_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await?;
        expect_one_row(&result)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError> {
        let query = "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await?;
        expect_one_row(&result)
    }
}

#[async_trait]
impl DeviceRepository for PgStore {
    async fn create(&self, device: NewDevice) -> Result<Device, StoreError> {
        let query = format!(
            r"
            INSERT INTO devices
                (id, user_id, fingerprint, device_name, device_type, os, browser, ip_address)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {DEVICE_COLUMNS}
            "
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(device.user_id)
            .bind(&device.fingerprint)
            .bind(&device.device_name)
            .bind(device.device_type.as_str())
            .bind(&device.os)
            .bind(&device.browser)
            .bind(&device.ip_address)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", &query))
            .await
            .map_err(|err| map_write_error(err, "devices"))?;
        device_from_row(&row)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Device>, StoreError> {
        let query = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await?;
        row.as_ref().map(device_from_row).transpose()
    }

    async fn find_by_fingerprint(
        &self,
        user_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Device>, StoreError> {
        let query =
            format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE user_id = $1 AND fingerprint = $2");
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await?;
        row.as_ref().map(device_from_row).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Device>, StoreError> {
        let query = format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE user_id = $1 ORDER BY last_used DESC"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await?;
        rows.iter().map(device_from_row).collect()
    }

    async fn update(&self, device: &Device) -> Result<Device, StoreError> {
        let query = format!(
            r"
            UPDATE devices
            SET ip_address = $2, is_trusted = $3, login_count = $4, last_used = $5, updated_at = NOW()
            WHERE id = $1
            RETURNING {DEVICE_COLUMNS}
            "
        );
        let row = sqlx::query(&query)
            .bind(device.id)
            .bind(&device.ip_address)
            .bind(device.is_trusted)
            .bind(device.login_count)
            .bind(device.last_used)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", &query))
            .await?
            .ok_or(StoreError::NotFound)?;
        device_from_row(&row)
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let query = "UPDATE devices SET last_used = $2, updated_at = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await?;
        expect_one_row(&result)
    }
}

/// `SELECT` the row for `key`, optionally taking a row lock.
async fn select_attempt(
    conn: &mut PgConnection,
    key: &AttemptKey,
    for_update: bool,
) -> Result<Option<FailedLoginAttempt>, StoreError> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let row = match key {
        AttemptKey::Account(user_id) => {
            let query = format!(
                "SELECT {ATTEMPT_COLUMNS} FROM failed_login_attempts WHERE user_id = $1{lock}"
            );
            sqlx::query(&query)
                .bind(user_id)
                .fetch_optional(&mut *conn)
                .instrument(query_span("SELECT", &query))
                .await?
        }
        AttemptKey::Client {
            ip_address,
            user_agent,
        } => {
            let query = format!(
                "SELECT {ATTEMPT_COLUMNS} FROM failed_login_attempts WHERE user_id IS NULL AND ip_address = $1 AND user_agent = $2{lock}"
            );
            sqlx::query(&query)
                .bind(ip_address)
                .bind(user_agent)
                .fetch_optional(&mut *conn)
                .instrument(query_span("SELECT", &query))
                .await?
        }
    };
    row.as_ref().map(attempt_from_row).transpose()
}

#[async_trait]
impl FailedLoginRepository for PgStore {
    async fn find(&self, key: &AttemptKey) -> Result<Option<FailedLoginAttempt>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        select_attempt(&mut conn, key, false).await
    }

    async fn record(
        &self,
        key: &AttemptKey,
        now: DateTime<Utc>,
        update: &AttemptUpdate<'_>,
    ) -> Result<FailedLoginAttempt, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .instrument(info_span!("db.begin", db.system = "postgresql"))
            .await?;

        // Claim the row first; concurrent callers then queue on its lock.
        let empty = FailedLoginAttempt::empty(key, now);
        let conflict_target = match key {
            AttemptKey::Account(_) => "(user_id) WHERE user_id IS NOT NULL",
            AttemptKey::Client { .. } => "(ip_address, user_agent) WHERE user_id IS NULL",
        };
        let insert = format!(
            r"
            INSERT INTO failed_login_attempts
                (id, user_id, ip_address, user_agent, attempts, last_attempt_at, is_locked, locked_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT {conflict_target} DO NOTHING
            "
        );
        sqlx::query(&insert)
            .bind(empty.id)
            .bind(empty.user_id)
            .bind(&empty.ip_address)
            .bind(&empty.user_agent)
            .bind(empty.attempts)
            .bind(empty.last_attempt_at)
            .bind(empty.is_locked)
            .bind(empty.locked_at)
            .bind(empty.created_at)
            .bind(empty.updated_at)
            .execute(&mut *tx)
            .instrument(query_span("INSERT", &insert))
            .await
            .map_err(|err| map_write_error(err, "failed_login_attempts"))?;

        let current = select_attempt(&mut *tx, key, true)
            .await?
            .ok_or(StoreError::NotFound)?;
        let next = update(current);

        let query = r"
            UPDATE failed_login_attempts SET
                ip_address = $2,
                user_agent = $3,
                attempts = $4,
                last_attempt_at = $5,
                is_locked = $6,
                locked_at = $7,
                updated_at = $8
            WHERE id = $1
        ";
        let result = sqlx::query(query)
            .bind(next.id)
            .bind(&next.ip_address)
            .bind(&next.user_agent)
            .bind(next.attempts)
            .bind(next.last_attempt_at)
            .bind(next.is_locked)
            .bind(next.locked_at)
            .bind(next.updated_at)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await?;
        expect_one_row(&result)?;

        tx.commit()
            .instrument(info_span!("db.commit", db.system = "postgresql"))
            .await?;
        Ok(next)
    }

    async fn clear(&self, key: &AttemptKey) -> Result<bool, StoreError> {
        let result = match key {
            AttemptKey::Account(user_id) => {
                let query = "DELETE FROM failed_login_attempts WHERE user_id = $1";
                sqlx::query(query)
                    .bind(user_id)
                    .execute(&self.pool)
                    .instrument(query_span("DELETE", query))
                    .await?
            }
            AttemptKey::Client {
                ip_address,
                user_agent,
            } => {
                let query = "DELETE FROM failed_login_attempts WHERE user_id IS NULL AND ip_address = $1 AND user_agent = $2";
                sqlx::query(query)
                    .bind(ip_address)
                    .bind(user_agent)
                    .execute(&self.pool)
                    .instrument(query_span("DELETE", query))
                    .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SessionRepository for PgStore {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO sessions (id, user_id, device_id, token_hash, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        sqlx::query(query)
            .bind(session.id)
            .bind(session.user_id)
            .bind(session.device_id)
            .bind(&session.token_hash)
            .bind(session.created_at)
            .bind(session.expires_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(|err| map_write_error(err, "sessions"))?;
        Ok(())
    }

    async fn find_active(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let query = r"
            SELECT id, user_id, device_id, token_hash, created_at, expires_at
            FROM sessions
            WHERE token_hash = $1 AND expires_at > $2
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;

        row.map(|row| -> Result<Session, StoreError> {
            Ok(Session {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                device_id: row.try_get("device_id")?,
                token_hash: row.try_get("token_hash")?,
                created_at: row.try_get("created_at")?,
                expires_at: row.try_get("expires_at")?,
            })
        })
        .transpose()
    }

    async fn delete(&self, token_hash: &[u8]) -> Result<(), StoreError> {
        let query = "DELETE FROM sessions WHERE token_hash = $1";
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(())
    }

    async fn delete_expired(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let query = "DELETE FROM sessions WHERE user_id = $1 AND expires_at <= $2";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(now)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn unique_violation_maps_to_conflict() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(matches!(
            map_write_error(err, "users"),
            StoreError::Conflict(table) if table == "users"
        ));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23503"),
        }));
        assert!(matches!(
            map_write_error(err, "users"),
            StoreError::Database(_)
        ));

        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
