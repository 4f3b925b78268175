//! In-memory account store

use super::{Account, AccountStore, NewAccount, ProfileUpdate, StoreError, StoreResult, page_offset};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    accounts: HashMap<i64, Account>,
    // unique index on telegram_id
    by_telegram_id: HashMap<String, i64>,
}

/// Accounts kept in a process-local map.
///
/// Insertion checks and writes the unique index under one write lock, so two
/// racing creates for the same Telegram id yield exactly one account and one
/// [`StoreError::Conflict`].
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    tables: RwLock<Tables>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored accounts
    pub async fn len(&self) -> usize {
        self.tables.read().await.accounts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_by_telegram_id(&self, telegram_id: &str) -> StoreResult<Option<Account>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_telegram_id
            .get(telegram_id)
            .and_then(|id| tables.accounts.get(id))
            .cloned())
    }

    async fn create(&self, account: NewAccount) -> StoreResult<Account> {
        let mut tables = self.tables.write().await;
        if tables.by_telegram_id.contains_key(&account.telegram_id) {
            return Err(StoreError::Conflict(account.telegram_id));
        }

        tables.next_id += 1;
        let id = tables.next_id;
        let now = Utc::now();
        let record = Account {
            id,
            telegram_id: account.telegram_id.clone(),
            username: account.profile.username,
            first_name: account.profile.first_name,
            last_name: account.profile.last_name,
            avatar_url: account.profile.avatar_url,
            is_admin: account.is_admin,
            is_blocked: false,
            created_at: now,
            updated_at: now,
        };
        tables.by_telegram_id.insert(account.telegram_id, id);
        tables.accounts.insert(id, record.clone());
        Ok(record)
    }

    async fn update_profile(
        &self,
        id: i64,
        profile: ProfileUpdate,
    ) -> StoreResult<Option<Account>> {
        let mut tables = self.tables.write().await;
        Ok(tables.accounts.get_mut(&id).map(|record| {
            record.username = profile.username;
            record.first_name = profile.first_name;
            record.last_name = profile.last_name;
            record.avatar_url = profile.avatar_url;
            record.updated_at = Utc::now();
            record.clone()
        }))
    }

    async fn set_blocked(&self, id: i64, blocked: bool) -> StoreResult<Option<Account>> {
        let mut tables = self.tables.write().await;
        Ok(tables.accounts.get_mut(&id).map(|record| {
            record.is_blocked = blocked;
            record.updated_at = Utc::now();
            record.clone()
        }))
    }

    async fn list_page(&self, page: u32, limit: u32) -> StoreResult<(Vec<Account>, u64)> {
        let tables = self.tables.read().await;
        let mut all: Vec<&Account> = tables.accounts.values().collect();
        // ids are monotonic, so they break created_at ties deterministically
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = all.len() as u64;
        let offset = usize::try_from(page_offset(page, limit)).unwrap_or(usize::MAX);
        let page_items = all
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok((page_items, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn new_account(telegram_id: &str) -> NewAccount {
        NewAccount {
            telegram_id: telegram_id.to_string(),
            profile: ProfileUpdate {
                first_name: format!("user {telegram_id}"),
                ..Default::default()
            },
            is_admin: false,
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = MemoryAccountStore::new();
        assert!(store.is_empty().await);

        let created = store.create(new_account("111")).await.unwrap();
        assert!(!created.is_blocked);

        let found = store.find_by_telegram_id("111").await.unwrap().unwrap();
        assert_eq!(found, created);
        assert!(store.find_by_telegram_id("222").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_telegram_id_conflicts() {
        let store = MemoryAccountStore::new();
        store.create(new_account("111")).await.unwrap();
        let err = store.create(new_account("111")).await.unwrap_err();
        assert_matches!(err, StoreError::Conflict(id) if id == "111");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_profile_keeps_flags() {
        let store = MemoryAccountStore::new();
        let mut new = new_account("111");
        new.is_admin = true;
        let created = store.create(new).await.unwrap();
        store.set_blocked(created.id, true).await.unwrap();

        let updated = store
            .update_profile(
                created.id,
                ProfileUpdate {
                    first_name: "Renamed".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.first_name, "Renamed");
        assert!(updated.is_admin);
        assert!(updated.is_blocked);

        assert!(store.set_blocked(999, true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_page_newest_first() {
        let store = MemoryAccountStore::new();
        for id in ["1", "2", "3"] {
            store.create(new_account(id)).await.unwrap();
        }

        let (first, total) = store.list_page(1, 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(
            first.iter().map(|a| a.telegram_id.as_str()).collect::<Vec<_>>(),
            vec!["3", "2"]
        );

        let (second, _) = store.list_page(2, 2).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].telegram_id, "1");
    }
}
