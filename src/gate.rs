//! Authorization gate for protected route prefixes
//!
//! Runs ahead of every handler under `/admin` and `/api/admin`. The gate
//! never provisions accounts and never trusts the admin flag embedded in a
//! credential: block and admin decisions always come from a fresh store read.
//!
//! Evaluation order:
//!
//! 1. identity reference from header or cookie (disagreement denies)
//! 2. no identity: anonymous allow when relaxed, deny otherwise
//! 3. proof of identity via credential or launch payload
//! 4. read-only account lookup
//! 5. blocked check
//! 6. admin check for admin routes

use crate::auth::carrier::{IdentityConflict, TrustArtifacts};
use crate::auth::session::{Credential, SessionIssuer};
use crate::auth::{LaunchVerifier, now_unix};
use crate::config::Environment;
use crate::error::ApiError;
use crate::identity::{IdentityResolver, ResolveError};
use crate::store::Account;
use hyper::HeaderMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const ADMIN_PAGE_PREFIX: &str = "/admin";
pub const ADMIN_API_PREFIX: &str = "/api/admin";

/// How a denial is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// Browser navigation; denials redirect to the landing page
    Page,
    /// JSON API; denials return an error body
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement {
    pub kind: RouteKind,
    pub admin: bool,
}

/// Requirement for `path`, or `None` for unprotected paths
pub fn classify(path: &str) -> Option<Requirement> {
    if path.starts_with(ADMIN_API_PREFIX) {
        Some(Requirement {
            kind: RouteKind::Api,
            admin: true,
        })
    } else if path.starts_with(ADMIN_PAGE_PREFIX) {
        Some(Requirement {
            kind: RouteKind::Page,
            admin: true,
        })
    } else {
        None
    }
}

/// The account a request was allowed as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub account_id: i64,
    pub telegram_id: String,
    pub is_admin: bool,
}

impl From<&Account> for Principal {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.id,
            telegram_id: account.telegram_id.clone(),
            is_admin: account.is_admin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    IdentityConflict,
    MissingIdentity,
    InvalidCredential,
    InvalidLaunchPayload,
    MissingProof,
    UnknownAccount,
    Blocked,
    NotAdmin,
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenyReason::IdentityConflict => "identity_conflict",
            DenyReason::MissingIdentity => "missing_identity",
            DenyReason::InvalidCredential => "invalid_credential",
            DenyReason::InvalidLaunchPayload => "invalid_launch_payload",
            DenyReason::MissingProof => "missing_proof",
            DenyReason::UnknownAccount => "unknown_account",
            DenyReason::Blocked => "blocked",
            DenyReason::NotAdmin => "not_admin",
        }
    }

    pub fn to_api_error(self) -> ApiError {
        match self {
            DenyReason::Blocked => ApiError::AccountBlocked,
            DenyReason::NotAdmin => ApiError::Forbidden("Admin access required".to_string()),
            _ => ApiError::AuthenticationFailed("Authentication required".to_string()),
        }
    }
}

impl From<IdentityConflict> for DenyReason {
    fn from(_: IdentityConflict) -> Self {
        DenyReason::IdentityConflict
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// No identity presented and the environment allows that
    Anonymous,
    Allow(Principal),
    Deny(DenyReason),
}

/// What established the identity of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proof {
    Credential(Credential),
    LaunchPayload,
    /// Relaxed environments only
    Unproven,
}

/// Checks the cryptographic proof behind an identity reference.
///
/// Shared by the gate and the endpoint guard so both apply the same rules.
#[derive(Debug, Clone)]
pub struct IdentityProof {
    sessions: Arc<SessionIssuer>,
    launch: LaunchVerifier,
    environment: Environment,
}

impl IdentityProof {
    pub fn new(sessions: Arc<SessionIssuer>, launch: LaunchVerifier, environment: Environment) -> Self {
        Self {
            sessions,
            launch,
            environment,
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn sessions(&self) -> &SessionIssuer {
        &self.sessions
    }

    /// A presented credential must verify and name `telegram_id`. Without a
    /// credential, a presented launch payload must verify, be fresh and name
    /// `telegram_id`. With neither, only a relaxed environment lets the
    /// request continue.
    pub fn check(
        &self,
        artifacts: &TrustArtifacts,
        telegram_id: &str,
        now: i64,
    ) -> Result<Proof, DenyReason> {
        if let Some(token) = artifacts.credential.as_deref() {
            return match self.sessions.verify_at(token, now) {
                Some(credential) if credential.telegram_id == telegram_id => {
                    Ok(Proof::Credential(credential))
                }
                _ => Err(DenyReason::InvalidCredential),
            };
        }

        if let Some(payload) = artifacts.launch_payload.as_deref() {
            return match self.launch.check_at(payload, now) {
                Ok(claim) if claim.telegram_id == telegram_id => Ok(Proof::LaunchPayload),
                Ok(_) => Err(DenyReason::InvalidLaunchPayload),
                Err(rejection) => {
                    debug!(reason = %rejection, "launch payload carrier rejected");
                    Err(DenyReason::InvalidLaunchPayload)
                }
            };
        }

        if self.environment.allows_unproven_identity() {
            Ok(Proof::Unproven)
        } else {
            Err(DenyReason::MissingProof)
        }
    }
}

/// Credential must still point at the account it was issued for
pub(crate) fn proof_matches_account(proof: &Proof, account: &Account) -> bool {
    match proof {
        Proof::Credential(credential) => credential.user_id == account.id,
        Proof::LaunchPayload | Proof::Unproven => true,
    }
}

#[derive(Debug, Clone)]
pub struct AuthorizationGate {
    resolver: IdentityResolver,
    proof: IdentityProof,
}

impl AuthorizationGate {
    pub fn new(resolver: IdentityResolver, proof: IdentityProof) -> Self {
        Self { resolver, proof }
    }

    pub async fn evaluate(
        &self,
        headers: &HeaderMap,
        requirement: Requirement,
    ) -> Result<GateOutcome, ResolveError> {
        self.evaluate_at(headers, requirement, now_unix()).await
    }

    /// Store failures surface as `Err`; they never turn into an allow.
    pub async fn evaluate_at(
        &self,
        headers: &HeaderMap,
        requirement: Requirement,
        now: i64,
    ) -> Result<GateOutcome, ResolveError> {
        let artifacts = match TrustArtifacts::from_headers(headers) {
            Ok(artifacts) => artifacts,
            Err(conflict) => {
                warn!(
                    header = %conflict.header,
                    cookie = %conflict.cookie,
                    "identity header and cookie disagree"
                );
                return Ok(GateOutcome::Deny(conflict.into()));
            }
        };

        let Some(telegram_id) = artifacts.telegram_id.as_deref() else {
            if self.proof.environment().allows_anonymous() {
                debug!("no identity presented, allowing anonymously");
                return Ok(GateOutcome::Anonymous);
            }
            return Ok(deny(DenyReason::MissingIdentity, None));
        };

        let proof = match self.proof.check(&artifacts, telegram_id, now) {
            Ok(proof) => proof,
            Err(reason) => return Ok(deny(reason, Some(telegram_id))),
        };

        let Some(account) = self.resolver.lookup(telegram_id).await? else {
            return Ok(deny(DenyReason::UnknownAccount, Some(telegram_id)));
        };
        if !proof_matches_account(&proof, &account) {
            return Ok(deny(DenyReason::InvalidCredential, Some(telegram_id)));
        }
        if account.is_blocked {
            return Ok(deny(DenyReason::Blocked, Some(telegram_id)));
        }
        if requirement.admin && !account.is_admin {
            return Ok(deny(DenyReason::NotAdmin, Some(telegram_id)));
        }

        debug!(telegram_id = %telegram_id, account_id = account.id, "gate allowed request");
        Ok(GateOutcome::Allow(Principal::from(&account)))
    }
}

fn deny(reason: DenyReason, telegram_id: Option<&str>) -> GateOutcome {
    info!(
        reason = reason.as_str(),
        telegram_id = telegram_id.unwrap_or("-"),
        "gate denied request"
    );
    GateOutcome::Deny(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::signature;
    use crate::config::Secret;
    use crate::identity::IdentityClaim;
    use crate::store::{AccountStore, MemoryAccountStore, ProfileUpdate};
    use hyper::header::HeaderValue;

    const BOT_TOKEN: &str = "42:gate-test-bot";
    const NOW: i64 = 1_700_000_000;
    const ADMIN_API: Requirement = Requirement {
        kind: RouteKind::Api,
        admin: true,
    };

    struct Fixture {
        gate: AuthorizationGate,
        resolver: IdentityResolver,
        sessions: Arc<SessionIssuer>,
    }

    fn fixture(environment: Environment) -> Fixture {
        let store: Arc<dyn AccountStore> = Arc::new(MemoryAccountStore::new());
        let resolver = IdentityResolver::new(store, Some("1".to_string()));
        let sessions = Arc::new(SessionIssuer::new(&Secret::new("gate-test-secret")));
        let launch = LaunchVerifier::new(Some(Secret::new(BOT_TOKEN)), 86_400);
        let proof = IdentityProof::new(Arc::clone(&sessions), launch, environment);
        Fixture {
            gate: AuthorizationGate::new(resolver.clone(), proof),
            resolver,
            sessions,
        }
    }

    async fn account(resolver: &IdentityResolver, id: &str) -> Account {
        resolver
            .resolve(&IdentityClaim {
                telegram_id: id.to_string(),
                profile: ProfileUpdate {
                    first_name: "Test".to_string(),
                    ..Default::default()
                },
            })
            .await
            .unwrap()
    }

    fn headers(pairs: &[(&'static str, String)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("/api/admin/users"), Some(ADMIN_API));
        assert_eq!(classify("/admin").map(|r| r.kind), Some(RouteKind::Page));
        assert_eq!(classify("/administrator").map(|r| r.kind), Some(RouteKind::Page));
        assert_eq!(classify("/api/auth/telegram"), None);
        assert_eq!(classify("/"), None);
    }

    #[tokio::test]
    async fn test_admin_with_credential_allowed() {
        let fx = fixture(Environment::Production);
        let admin = account(&fx.resolver, "1").await;
        let token = fx.sessions.issue_at(&admin, NOW).unwrap();

        let outcome = fx
            .gate
            .evaluate_at(
                &headers(&[
                    ("x-telegram-id", "1".to_string()),
                    ("x-auth-token", token),
                ]),
                ADMIN_API,
                NOW,
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            GateOutcome::Allow(Principal {
                account_id: admin.id,
                telegram_id: "1".to_string(),
                is_admin: true,
            })
        );
    }

    #[tokio::test]
    async fn test_strict_requires_identity_and_proof() {
        let fx = fixture(Environment::Production);
        account(&fx.resolver, "1").await;

        let none = fx.gate.evaluate_at(&HeaderMap::new(), ADMIN_API, NOW).await.unwrap();
        assert_eq!(none, GateOutcome::Deny(DenyReason::MissingIdentity));

        let bare = fx
            .gate
            .evaluate_at(&headers(&[("x-telegram-id", "1".to_string())]), ADMIN_API, NOW)
            .await
            .unwrap();
        assert_eq!(bare, GateOutcome::Deny(DenyReason::MissingProof));
    }

    #[tokio::test]
    async fn test_relaxed_allows_anonymous_and_unproven() {
        let fx = fixture(Environment::Development);
        account(&fx.resolver, "1").await;

        let none = fx.gate.evaluate_at(&HeaderMap::new(), ADMIN_API, NOW).await.unwrap();
        assert_eq!(none, GateOutcome::Anonymous);

        let bare = fx
            .gate
            .evaluate_at(&headers(&[("x-telegram-id", "1".to_string())]), ADMIN_API, NOW)
            .await
            .unwrap();
        assert!(matches!(bare, GateOutcome::Allow(p) if p.is_admin));
    }

    #[tokio::test]
    async fn test_credential_for_other_identity_denied() {
        let fx = fixture(Environment::Development);
        let admin = account(&fx.resolver, "1").await;
        account(&fx.resolver, "2").await;
        let token = fx.sessions.issue_at(&admin, NOW).unwrap();

        let outcome = fx
            .gate
            .evaluate_at(
                &headers(&[
                    ("x-telegram-id", "2".to_string()),
                    ("authorization", format!("Bearer {token}")),
                ]),
                ADMIN_API,
                NOW,
            )
            .await
            .unwrap();
        assert_eq!(outcome, GateOutcome::Deny(DenyReason::InvalidCredential));
    }

    #[tokio::test]
    async fn test_launch_payload_proof() {
        let fx = fixture(Environment::Production);
        account(&fx.resolver, "1").await;
        let unsigned = format!(
            "auth_date={NOW}&user={}",
            urlencoding::encode(r#"{"id":1,"first_name":"Root"}"#)
        );
        let payload = format!(
            "{unsigned}&hash={}",
            signature::sign(&unsigned, BOT_TOKEN).unwrap()
        );

        let ok = fx
            .gate
            .evaluate_at(
                &headers(&[
                    ("x-telegram-id", "1".to_string()),
                    ("x-telegram-init-data", payload.clone()),
                ]),
                ADMIN_API,
                NOW + 60,
            )
            .await
            .unwrap();
        assert!(matches!(ok, GateOutcome::Allow(_)));

        let stale = fx
            .gate
            .evaluate_at(
                &headers(&[
                    ("x-telegram-id", "1".to_string()),
                    ("x-telegram-init-data", payload),
                ]),
                ADMIN_API,
                NOW + 86_401,
            )
            .await
            .unwrap();
        assert_eq!(stale, GateOutcome::Deny(DenyReason::InvalidLaunchPayload));
    }

    #[tokio::test]
    async fn test_blocked_admin_denied_before_admin_check() {
        let fx = fixture(Environment::Production);
        let admin = account(&fx.resolver, "1").await;
        let token = fx.sessions.issue_at(&admin, NOW).unwrap();
        fx.resolver.store().set_blocked(admin.id, true).await.unwrap();

        let outcome = fx
            .gate
            .evaluate_at(
                &headers(&[
                    ("x-telegram-id", "1".to_string()),
                    ("x-auth-token", token),
                ]),
                ADMIN_API,
                NOW,
            )
            .await
            .unwrap();
        assert_eq!(outcome, GateOutcome::Deny(DenyReason::Blocked));
    }

    #[tokio::test]
    async fn test_stale_admin_hint_ignored() {
        let fx = fixture(Environment::Production);
        let user = account(&fx.resolver, "2").await;
        let mut forged = user.clone();
        forged.is_admin = true;
        let token = fx.sessions.issue_at(&forged, NOW).unwrap();

        let outcome = fx
            .gate
            .evaluate_at(
                &headers(&[
                    ("x-telegram-id", "2".to_string()),
                    ("x-auth-token", token),
                ]),
                ADMIN_API,
                NOW,
            )
            .await
            .unwrap();
        assert_eq!(outcome, GateOutcome::Deny(DenyReason::NotAdmin));
    }

    #[tokio::test]
    async fn test_unknown_account_and_conflict() {
        let fx = fixture(Environment::Development);
        let unknown = fx
            .gate
            .evaluate_at(&headers(&[("x-telegram-id", "77".to_string())]), ADMIN_API, NOW)
            .await
            .unwrap();
        assert_eq!(unknown, GateOutcome::Deny(DenyReason::UnknownAccount));
        assert!(fx.resolver.lookup("77").await.unwrap().is_none());

        let conflict = fx
            .gate
            .evaluate_at(
                &headers(&[
                    ("x-telegram-id", "1".to_string()),
                    ("cookie", "telegram_id=2".to_string()),
                ]),
                ADMIN_API,
                NOW,
            )
            .await
            .unwrap();
        assert_eq!(conflict, GateOutcome::Deny(DenyReason::IdentityConflict));
    }
}
