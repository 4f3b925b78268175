//! Identity resolution
//!
//! Maps a verified Telegram identity claim to an internal [`Account`],
//! provisioning one on first sight. Safe under concurrent first logins: the
//! store's unique constraint picks the winner and every loser re-reads.

use crate::store::{Account, AccountStore, NewAccount, ProfileUpdate, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Telegram user object as found in launch payloads and request bodies.
///
/// Unknown fields (`language_code`, `is_premium`, ...) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
}

/// An external identity plus the display fields it asserts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaim {
    pub telegram_id: String,
    pub profile: ProfileUpdate,
}

impl From<TelegramUser> for IdentityClaim {
    fn from(user: TelegramUser) -> Self {
        Self {
            telegram_id: user.id.to_string(),
            profile: ProfileUpdate {
                username: user.username,
                first_name: user.first_name,
                last_name: user.last_name,
                avatar_url: user.photo_url,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The store reported a duplicate but the account could not be re-read
    #[error("Account for telegram id {0} vanished during resolution")]
    Vanished(String),
}

#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn AccountStore>,
    bootstrap_admin_id: Option<String>,
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("bootstrap_admin_id", &self.bootstrap_admin_id)
            .finish_non_exhaustive()
    }
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn AccountStore>, bootstrap_admin_id: Option<String>) -> Self {
        Self {
            store,
            bootstrap_admin_id,
        }
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    fn is_bootstrap_admin(&self, telegram_id: &str) -> bool {
        self.bootstrap_admin_id.as_deref() == Some(telegram_id)
    }

    /// Find or provision the account for `claim`.
    ///
    /// Blocked accounts are returned as-is; rejecting them is the caller's job.
    pub async fn resolve(&self, claim: &IdentityClaim) -> Result<Account, ResolveError> {
        if let Some(existing) = self.store.find_by_telegram_id(&claim.telegram_id).await? {
            return self.refresh(existing, &claim.profile).await;
        }

        let new = NewAccount {
            telegram_id: claim.telegram_id.clone(),
            profile: claim.profile.clone(),
            is_admin: self.is_bootstrap_admin(&claim.telegram_id),
        };
        match self.store.create(new).await {
            Ok(account) => {
                info!(
                    telegram_id = %account.telegram_id,
                    account_id = account.id,
                    is_admin = account.is_admin,
                    "provisioned account"
                );
                Ok(account)
            }
            Err(StoreError::Conflict(_)) => {
                debug!(telegram_id = %claim.telegram_id, "lost first-login race, re-reading");
                let existing = self
                    .store
                    .find_by_telegram_id(&claim.telegram_id)
                    .await?
                    .ok_or_else(|| ResolveError::Vanished(claim.telegram_id.clone()))?;
                self.refresh(existing, &claim.profile).await
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Read-only lookup; never provisions
    pub async fn lookup(&self, telegram_id: &str) -> Result<Option<Account>, ResolveError> {
        Ok(self.store.find_by_telegram_id(telegram_id).await?)
    }

    async fn refresh(
        &self,
        existing: Account,
        profile: &ProfileUpdate,
    ) -> Result<Account, ResolveError> {
        if !profile.differs_from(&existing) {
            return Ok(existing);
        }
        match self.store.update_profile(existing.id, profile.clone()).await? {
            Some(updated) => Ok(updated),
            None => {
                warn!(account_id = existing.id, "account disappeared before profile refresh");
                Err(ResolveError::Vanished(existing.telegram_id))
            }
        }
    }
}
