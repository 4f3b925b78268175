//! SQLite account store
//!
//! A single connection guarded by a mutex; every query runs on the blocking
//! pool so request tasks never hold the lock across an await point.

use super::{Account, AccountStore, NewAccount, ProfileUpdate, StoreError, StoreResult, page_offset};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    telegram_id TEXT    NOT NULL UNIQUE,
    username    TEXT,
    first_name  TEXT    NOT NULL,
    last_name   TEXT,
    avatar_url  TEXT,
    is_admin    INTEGER NOT NULL DEFAULT 0,
    is_blocked  INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT    NOT NULL,
    updated_at  TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS users_created_at ON users (created_at);
";

const SELECT_COLUMNS: &str = "id, telegram_id, username, first_name, last_name, avatar_url, \
                              is_admin, is_blocked, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct SqliteAccountStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteAccountStore {
    /// Open (or create) the database file and apply the schema
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let connection = Connection::open_with_flags(path, flags).map_err(db_error)?;
        connection
            .execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(db_error)?;
        Self::initialize(connection)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::initialize(Connection::open_in_memory().map_err(db_error)?)
    }

    fn initialize(connection: Connection) -> StoreResult<Self> {
        connection.busy_timeout(BUSY_TIMEOUT).map_err(db_error)?;
        connection.execute_batch(SCHEMA).map_err(db_error)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let guard = connection
                .lock()
                .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }
}

fn db_error(err: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

/// Only a `UNIQUE` failure means another writer got there first; NOT NULL
/// and CHECK failures are ordinary errors.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn timestamp(at: DateTime<Utc>) -> String {
    // fixed width so lexicographic order matches chronological order
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        telegram_id: row.get(1)?,
        username: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        avatar_url: row.get(5)?,
        is_admin: row.get(6)?,
        is_blocked: row.get(7)?,
        created_at: parse_timestamp(row, 8)?,
        updated_at: parse_timestamp(row, 9)?,
    })
}

fn select_by_id(connection: &Connection, id: i64) -> StoreResult<Option<Account>> {
    connection
        .query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            account_from_row,
        )
        .optional()
        .map_err(db_error)
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn find_by_telegram_id(&self, telegram_id: &str) -> StoreResult<Option<Account>> {
        let telegram_id = telegram_id.to_string();
        self.run(move |connection| {
            connection
                .query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM users WHERE telegram_id = ?1"),
                    params![telegram_id],
                    account_from_row,
                )
                .optional()
                .map_err(db_error)
        })
        .await
    }

    async fn create(&self, account: NewAccount) -> StoreResult<Account> {
        self.run(move |connection| {
            let now = timestamp(Utc::now());
            let inserted = connection.execute(
                "INSERT INTO users (telegram_id, username, first_name, last_name, avatar_url, \
                 is_admin, is_blocked, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)",
                params![
                    account.telegram_id,
                    account.profile.username,
                    account.profile.first_name,
                    account.profile.last_name,
                    account.profile.avatar_url,
                    account.is_admin,
                    now,
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(err) if is_unique_violation(&err) => {
                    return Err(StoreError::Conflict(account.telegram_id));
                }
                Err(err) => return Err(db_error(err)),
            }

            let id = connection.last_insert_rowid();
            select_by_id(connection, id)?.ok_or_else(|| {
                StoreError::Unavailable(format!("inserted account {id} not readable"))
            })
        })
        .await
    }

    async fn update_profile(
        &self,
        id: i64,
        profile: ProfileUpdate,
    ) -> StoreResult<Option<Account>> {
        self.run(move |connection| {
            let changed = connection
                .execute(
                    "UPDATE users SET username = ?2, first_name = ?3, last_name = ?4, \
                     avatar_url = ?5, updated_at = ?6 WHERE id = ?1",
                    params![
                        id,
                        profile.username,
                        profile.first_name,
                        profile.last_name,
                        profile.avatar_url,
                        timestamp(Utc::now()),
                    ],
                )
                .map_err(db_error)?;
            if changed == 0 {
                return Ok(None);
            }
            select_by_id(connection, id)
        })
        .await
    }

    async fn set_blocked(&self, id: i64, blocked: bool) -> StoreResult<Option<Account>> {
        self.run(move |connection| {
            let changed = connection
                .execute(
                    "UPDATE users SET is_blocked = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id, blocked, timestamp(Utc::now())],
                )
                .map_err(db_error)?;
            if changed == 0 {
                return Ok(None);
            }
            select_by_id(connection, id)
        })
        .await
    }

    async fn list_page(&self, page: u32, limit: u32) -> StoreResult<(Vec<Account>, u64)> {
        self.run(move |connection| {
            let total: i64 = connection
                .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
                .map_err(db_error)?;
            let offset = i64::try_from(page_offset(page, limit)).unwrap_or(i64::MAX);

            let mut stmt = connection
                .prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM users \
                     ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2"
                ))
                .map_err(db_error)?;
            let accounts = stmt
                .query_map(params![i64::from(limit), offset], account_from_row)
                .map_err(db_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_error)?;
            Ok((accounts, total.max(0) as u64))
        })
        .await
    }
}
