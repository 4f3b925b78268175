//! Per-endpoint authorization checks
//!
//! Admin handlers call [`EndpointGuard::require_admin`] themselves even though
//! the gate already ran for their prefix. The guard reads the raw request
//! headers, never the gate's hints, so it holds on its own if a route is ever
//! mounted outside a gated prefix.

use crate::auth::carrier::TrustArtifacts;
use crate::auth::now_unix;
use crate::error::{ApiError, ApiResult};
use crate::gate::{DenyReason, IdentityProof, proof_matches_account};
use crate::identity::IdentityResolver;
use crate::store::Account;
use hyper::HeaderMap;
use tracing::info;

#[derive(Debug, Clone)]
pub struct EndpointGuard {
    resolver: IdentityResolver,
    proof: IdentityProof,
}

impl EndpointGuard {
    pub fn new(resolver: IdentityResolver, proof: IdentityProof) -> Self {
        Self { resolver, proof }
    }

    /// The proven, unblocked account behind the request
    pub async fn require_auth(&self, headers: &HeaderMap) -> ApiResult<Account> {
        let artifacts = TrustArtifacts::from_headers(headers)
            .map_err(|_| refuse(DenyReason::IdentityConflict))?;
        let telegram_id = artifacts
            .telegram_id
            .as_deref()
            .ok_or_else(|| refuse(DenyReason::MissingIdentity))?;

        let proof = self
            .proof
            .check(&artifacts, telegram_id, now_unix())
            .map_err(refuse)?;
        let account = self
            .resolver
            .lookup(telegram_id)
            .await?
            .ok_or_else(|| refuse(DenyReason::UnknownAccount))?;
        if !proof_matches_account(&proof, &account) {
            return Err(refuse(DenyReason::InvalidCredential));
        }
        if account.is_blocked {
            return Err(refuse(DenyReason::Blocked));
        }
        Ok(account)
    }

    pub async fn require_admin(&self, headers: &HeaderMap) -> ApiResult<Account> {
        let account = self.require_auth(headers).await?;
        if !account.is_admin {
            return Err(refuse(DenyReason::NotAdmin));
        }
        Ok(account)
    }

    /// Account named by the request's session credential.
    ///
    /// Requires a valid credential in every environment; blocked accounts
    /// read as unauthenticated.
    pub async fn current_account(&self, headers: &HeaderMap) -> ApiResult<Account> {
        let artifacts = TrustArtifacts::from_headers(headers)
            .map_err(|_| refuse(DenyReason::IdentityConflict))?;
        let token = artifacts
            .credential
            .as_deref()
            .ok_or_else(|| refuse(DenyReason::MissingProof))?;
        let credential = self
            .proof
            .sessions()
            .verify(token)
            .ok_or_else(|| refuse(DenyReason::InvalidCredential))?;
        if artifacts
            .telegram_id
            .as_deref()
            .is_some_and(|id| id != credential.telegram_id)
        {
            return Err(refuse(DenyReason::InvalidCredential));
        }

        match self.resolver.lookup(&credential.telegram_id).await? {
            Some(account) if account.id == credential.user_id && !account.is_blocked => {
                Ok(account)
            }
            _ => Err(refuse(DenyReason::UnknownAccount)),
        }
    }
}

fn refuse(reason: DenyReason) -> ApiError {
    info!(reason = reason.as_str(), "endpoint guard refused request");
    reason.to_api_error()
}
