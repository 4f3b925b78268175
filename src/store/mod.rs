//! Account persistence
//!
//! The authentication core only talks to accounts through [`AccountStore`].
//! Two backends ship with the crate: an in-memory map for tests and local
//! development, and SQLite for real deployments. Both enforce uniqueness of
//! the external Telegram identity, which is what makes concurrent first
//! logins safe.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::MemoryAccountStore;
pub use sqlite::SqliteAccountStore;

/// Internal account record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub telegram_id: String,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_admin: bool,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Display fields carried by an identity claim
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl ProfileUpdate {
    /// Whether applying this update would change anything on `account`
    pub fn differs_from(&self, account: &Account) -> bool {
        self.username != account.username
            || self.first_name != account.first_name
            || self.last_name != account.last_name
            || self.avatar_url != account.avatar_url
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub telegram_id: String,
    pub profile: ProfileUpdate,
    pub is_admin: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An account with the same Telegram id already exists
    #[error("Account already exists for telegram id {0}")]
    Conflict(String),
    #[error("Account store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_telegram_id(&self, telegram_id: &str) -> StoreResult<Option<Account>>;

    /// Insert a new account. Must fail with [`StoreError::Conflict`] when the
    /// Telegram id is already taken.
    async fn create(&self, account: NewAccount) -> StoreResult<Account>;

    /// Overwrite display fields. Never touches `is_admin` or `is_blocked`.
    async fn update_profile(&self, id: i64, profile: ProfileUpdate)
    -> StoreResult<Option<Account>>;

    async fn set_blocked(&self, id: i64, blocked: bool) -> StoreResult<Option<Account>>;

    /// Newest accounts first. `page` is 1-based.
    async fn list_page(&self, page: u32, limit: u32) -> StoreResult<(Vec<Account>, u64)>;
}

/// Row offset for a 1-based page
pub(crate) fn page_offset(page: u32, limit: u32) -> u64 {
    u64::from(page.max(1) - 1) * u64::from(limit)
}
