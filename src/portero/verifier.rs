use crate::portero::{
    classifier::{Classification, OriginClassifier},
    grant::{GrantOutcome, RoleClient},
    notify::WebhookSink,
    provider::{Identity, ProviderClient},
    store::{RecordStore, VerificationRecord},
    tokens::{PendingTokens, Redemption},
};
use anyhow::Result;
use secrecy::SecretString;
use tracing::{debug, error, instrument, warn};

/// Terminal rejection reasons, surfaced to the caller as distinct responses.
///
/// Everything past the identity fetch is best-effort and recovered locally;
/// those failures are logged, never represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Missing code, or a token that was never issued / already consumed.
    InvalidRequest,
    /// Token issued more than the redemption window ago.
    TokenExpired,
    /// The caller's network origin failed classification.
    OriginBlocked,
    /// Another verification already succeeded from this origin.
    OriginAlreadyVerified,
    /// Token exchange or identity fetch failed.
    ProviderAuthFailed,
}

impl Rejection {
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid request",
            Self::TokenExpired => "verification link expired",
            Self::OriginBlocked => "network origin blocked",
            Self::OriginAlreadyVerified => "origin already verified",
            Self::ProviderAuthFailed => "provider authentication failed",
        }
    }
}

/// One callback's worth of input, owned by the verifier for the duration of
/// the attempt.
#[derive(Debug)]
pub struct Attempt {
    pub token: String,
    pub code: String,
    pub origin: Option<String>,
    pub user_agent: Option<String>,
}

pub type Outcome = Result<VerificationRecord, Rejection>;

// Seams over the external collaborators so the flow is testable without a
// provider, database, group API or webhook on the other end.

#[allow(async_fn_in_trait)]
pub trait IdentityProvider {
    fn authorize_url(&self, state: &str) -> Result<String>;
    async fn exchange_code(&self, code: &str) -> Result<SecretString>;
    async fn fetch_identity(&self, access_token: &SecretString) -> Result<Identity>;
}

#[allow(async_fn_in_trait)]
pub trait RecordStorage {
    async fn find_by_origin(&self, origin: &str) -> Result<Option<VerificationRecord>>;
    async fn upsert(&self, record: &VerificationRecord) -> Result<()>;
}

#[allow(async_fn_in_trait)]
pub trait RoleGranter {
    async fn grant(&self, identity_id: &str) -> Result<GrantOutcome>;
}

#[allow(async_fn_in_trait)]
pub trait AuditSink {
    async fn notify(&self, record: &VerificationRecord) -> Result<()>;
}

impl IdentityProvider for ProviderClient {
    fn authorize_url(&self, state: &str) -> Result<String> {
        Self::authorize_url(self, state)
    }

    async fn exchange_code(&self, code: &str) -> Result<SecretString> {
        Self::exchange_code(self, code).await
    }

    async fn fetch_identity(&self, access_token: &SecretString) -> Result<Identity> {
        Self::fetch_identity(self, access_token).await
    }
}

impl RecordStorage for RecordStore {
    async fn find_by_origin(&self, origin: &str) -> Result<Option<VerificationRecord>> {
        Self::find_by_origin(self, origin).await
    }

    async fn upsert(&self, record: &VerificationRecord) -> Result<()> {
        Self::upsert(self, record).await
    }
}

impl RoleGranter for RoleClient {
    async fn grant(&self, identity_id: &str) -> Result<GrantOutcome> {
        Self::grant(self, identity_id).await
    }
}

impl AuditSink for WebhookSink {
    async fn notify(&self, record: &VerificationRecord) -> Result<()> {
        Self::notify(self, record).await
    }
}

/// The verification state machine for one attempt.
///
/// Strict step order: consume token, classify origin, origin dedup, code
/// exchange, identity fetch — each failure short-circuits with no later side
/// effects. The token is consumed first by design, so a blocked or failed
/// attempt burns it: one shot per issued link.
///
/// After the identity fetch the contract flips to verify-then-degrade:
/// persistence, role grant and audit notification are best-effort, because
/// "identity confirmed" is the point where the user has earned access and a
/// downstream hiccup must not revoke it.
pub struct Verifier<P, S, G, N> {
    tokens: PendingTokens,
    classifier: OriginClassifier,
    provider: P,
    store: S,
    grant: G,
    audit: N,
}

impl<P, S, G, N> Verifier<P, S, G, N>
where
    P: IdentityProvider,
    S: RecordStorage,
    G: RoleGranter,
    N: AuditSink,
{
    pub fn new(classifier: OriginClassifier, provider: P, store: S, grant: G, audit: N) -> Self {
        Self {
            tokens: PendingTokens::new(),
            classifier,
            provider,
            store,
            grant,
            audit,
        }
    }

    /// Issue a one-time token for a new verification attempt.
    pub fn issue_token(&self) -> String {
        self.tokens.issue()
    }

    /// Provider authorization URL carrying `state`.
    ///
    /// # Errors
    /// Returns an error if the provider configuration cannot form a URL.
    pub fn authorize_url(&self, state: &str) -> Result<String> {
        self.provider.authorize_url(state)
    }

    /// Run one verification attempt to completion.
    #[instrument(skip_all, fields(origin = attempt.origin.as_deref().unwrap_or("")))]
    pub async fn verify(&self, attempt: Attempt) -> Outcome {
        // One-shot token check goes first; losers of a double-submit race
        // must fail here, before any external call.
        if attempt.code.is_empty() {
            debug!("Callback without authorization code");
            return Err(Rejection::InvalidRequest);
        }

        match self.tokens.consume(&attempt.token) {
            Redemption::Redeemed => {}
            Redemption::Unknown => {
                debug!("Unknown or already consumed token");
                return Err(Rejection::InvalidRequest);
            }
            Redemption::Expired => {
                debug!("Expired token");
                return Err(Rejection::TokenExpired);
            }
        }

        let origin = attempt.origin.as_deref().unwrap_or("");
        if self.classifier.classify(origin) == Classification::Suspicious {
            debug!("Origin classified as suspicious");
            return Err(Rejection::OriginBlocked);
        }

        match self.store.find_by_origin(origin).await {
            Ok(Some(existing)) => {
                debug!("Origin already verified by identity {}", existing.id);
                return Err(Rejection::OriginAlreadyVerified);
            }
            Ok(None) => {}
            // An unreadable store degrades the dedup check for this one
            // request rather than blocking the attempt.
            Err(err) => error!("Origin dedup lookup failed: {err:#}"),
        }

        let access_token = match self.provider.exchange_code(&attempt.code).await {
            Ok(token) => token,
            Err(err) => {
                error!("Token exchange failed: {err:#}");
                return Err(Rejection::ProviderAuthFailed);
            }
        };

        let identity = match self.provider.fetch_identity(&access_token).await {
            Ok(identity) => identity,
            Err(err) => {
                error!("Identity fetch failed: {err:#}");
                return Err(Rejection::ProviderAuthFailed);
            }
        };

        // Identity confirmed. Everything below is best-effort enrichment.
        let record = VerificationRecord::build(identity, origin, attempt.user_agent.as_deref());

        if let Err(err) = self.store.upsert(&record).await {
            error!(
                identity = %record.id,
                "Failed to persist verification record, manual reconciliation required: {err:#}"
            );
        }

        match self.grant.grant(&record.id).await {
            Ok(GrantOutcome::Granted) => debug!("Role granted to {}", record.id),
            Ok(GrantOutcome::NotAMember) => {
                warn!("Identity {} is not a group member, role not granted", record.id);
            }
            Err(err) => error!(identity = %record.id, "Role grant failed: {err:#}"),
        }

        if let Err(err) = self.audit.notify(&record).await {
            warn!("Audit notification failed: {err:#}");
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    #[derive(Default)]
    struct TestProvider {
        exchanges: AtomicUsize,
        fetches: AtomicUsize,
        fail_exchange: bool,
        fail_fetch: bool,
    }

    impl IdentityProvider for &TestProvider {
        fn authorize_url(&self, state: &str) -> Result<String> {
            Ok(format!("https://provider.test/authorize?state={state}"))
        }

        async fn exchange_code(&self, code: &str) -> Result<SecretString> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            if self.fail_exchange {
                return Err(anyhow!("exchange refused"));
            }
            assert_eq!(code, "abc");
            Ok(SecretString::from("xyz"))
        }

        async fn fetch_identity(&self, access_token: &SecretString) -> Result<Identity> {
            use secrecy::ExposeSecret;
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetch {
                return Err(anyhow!("identity endpoint down"));
            }
            assert_eq!(access_token.expose_secret(), "xyz");
            Ok(Identity {
                id: "42".to_string(),
                username: "alice".to_string(),
                email: Some("alice@example.com".to_string()),
            })
        }
    }

    #[derive(Default)]
    struct TestStore {
        records: Mutex<Vec<VerificationRecord>>,
        fail_upsert: bool,
    }

    impl RecordStorage for &TestStore {
        async fn find_by_origin(&self, origin: &str) -> Result<Option<VerificationRecord>> {
            let records = self.records.lock().expect("records lock");
            Ok(records.iter().find(|r| r.origin == origin).cloned())
        }

        async fn upsert(&self, record: &VerificationRecord) -> Result<()> {
            if self.fail_upsert {
                return Err(anyhow!("database unavailable"));
            }
            let mut records = self.records.lock().expect("records lock");
            records.retain(|r| r.id != record.id);
            records.push(record.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestGrant {
        granted: Mutex<Vec<String>>,
        fail: bool,
        not_a_member: bool,
    }

    impl RoleGranter for &TestGrant {
        async fn grant(&self, identity_id: &str) -> Result<GrantOutcome> {
            if self.fail {
                return Err(anyhow!("group api down"));
            }
            if self.not_a_member {
                return Ok(GrantOutcome::NotAMember);
            }
            self.granted
                .lock()
                .expect("granted lock")
                .push(identity_id.to_string());
            Ok(GrantOutcome::Granted)
        }
    }

    #[derive(Default)]
    struct TestAudit {
        notifications: AtomicUsize,
        fail: bool,
    }

    impl AuditSink for &TestAudit {
        async fn notify(&self, _record: &VerificationRecord) -> Result<()> {
            self.notifications.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("webhook unreachable"));
            }
            Ok(())
        }
    }

    struct Harness {
        provider: TestProvider,
        store: TestStore,
        grant: TestGrant,
        audit: TestAudit,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                provider: TestProvider::default(),
                store: TestStore::default(),
                grant: TestGrant::default(),
                audit: TestAudit::default(),
            }
        }

        fn verifier(&self) -> Verifier<&TestProvider, &TestStore, &TestGrant, &TestAudit> {
            Verifier::new(
                OriginClassifier::default(),
                &self.provider,
                &self.store,
                &self.grant,
                &self.audit,
            )
        }
    }

    fn attempt(token: &str, code: &str, origin: &str) -> Attempt {
        Attempt {
            token: token.to_string(),
            code: code.to_string(),
            origin: if origin.is_empty() {
                None
            } else {
                Some(origin.to_string())
            },
            user_agent: Some(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36"
                    .to_string(),
            ),
        }
    }

    #[tokio::test]
    async fn end_to_end_success() -> Result<()> {
        let harness = Harness::new();
        let verifier = harness.verifier();
        let token = verifier.issue_token();

        let record = verifier
            .verify(attempt(&token, "abc", "203.0.113.5"))
            .await
            .map_err(|r| anyhow!("unexpected rejection: {r:?}"))?;

        assert_eq!(record.id, "42");
        assert_eq!(record.origin, "203.0.113.5");
        assert_eq!(record.device.as_deref(), Some("Windows Chrome 126"));

        // Persisted, role granted, audit fired.
        assert_eq!(harness.store.records.lock().expect("records").len(), 1);
        assert_eq!(
            *harness.grant.granted.lock().expect("granted"),
            vec!["42".to_string()]
        );
        assert_eq!(harness.audit.notifications.load(Ordering::SeqCst), 1);

        // The token is gone: replaying the callback is an invalid request.
        let replay = verifier.verify(attempt(&token, "abc", "203.0.113.5")).await;
        assert_eq!(replay.unwrap_err(), Rejection::InvalidRequest);
        Ok(())
    }

    #[tokio::test]
    async fn missing_code_is_invalid_request() {
        let harness = Harness::new();
        let verifier = harness.verifier();
        let token = verifier.issue_token();

        let outcome = verifier.verify(attempt(&token, "", "203.0.113.5")).await;
        assert_eq!(outcome.unwrap_err(), Rejection::InvalidRequest);
        assert_eq!(harness.provider.exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_token_is_invalid_request() {
        let harness = Harness::new();
        let verifier = harness.verifier();

        let outcome = verifier
            .verify(attempt("never-issued", "abc", "203.0.113.5"))
            .await;
        assert_eq!(outcome.unwrap_err(), Rejection::InvalidRequest);
    }

    #[tokio::test]
    async fn blocked_origin_burns_token_without_provider_calls() {
        let harness = Harness::new();
        let verifier = harness.verifier();
        let token = verifier.issue_token();

        let outcome = verifier.verify(attempt(&token, "abc", "34.0.0.1")).await;
        assert_eq!(outcome.unwrap_err(), Rejection::OriginBlocked);

        // No provider round-trips were wasted on the blocked attempt.
        assert_eq!(harness.provider.exchanges.load(Ordering::SeqCst), 0);
        assert_eq!(harness.provider.fetches.load(Ordering::SeqCst), 0);

        // One-shot policy: the token was consumed anyway.
        let retry = verifier.verify(attempt(&token, "abc", "203.0.113.5")).await;
        assert_eq!(retry.unwrap_err(), Rejection::InvalidRequest);
    }

    #[tokio::test]
    async fn missing_origin_is_blocked() {
        let harness = Harness::new();
        let verifier = harness.verifier();
        let token = verifier.issue_token();

        let outcome = verifier.verify(attempt(&token, "abc", "")).await;
        assert_eq!(outcome.unwrap_err(), Rejection::OriginBlocked);
    }

    #[tokio::test]
    async fn second_identity_from_same_origin_is_rejected() -> Result<()> {
        let harness = Harness::new();
        let verifier = harness.verifier();

        let first = verifier.issue_token();
        verifier
            .verify(attempt(&first, "abc", "203.0.113.5"))
            .await
            .map_err(|r| anyhow!("unexpected rejection: {r:?}"))?;

        let second = verifier.issue_token();
        let outcome = verifier.verify(attempt(&second, "abc", "203.0.113.5")).await;
        assert_eq!(outcome.unwrap_err(), Rejection::OriginAlreadyVerified);

        // The dedup check fired before any provider call for the second attempt.
        assert_eq!(harness.provider.exchanges.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn repeat_verification_updates_single_record() -> Result<()> {
        let harness = Harness::new();
        let verifier = harness.verifier();

        let first = verifier.issue_token();
        verifier
            .verify(attempt(&first, "abc", "203.0.113.5"))
            .await
            .map_err(|r| anyhow!("unexpected rejection: {r:?}"))?;

        // Same identity, new origin: upsert refreshes the one record.
        let second = verifier.issue_token();
        verifier
            .verify(attempt(&second, "abc", "198.51.100.7"))
            .await
            .map_err(|r| anyhow!("unexpected rejection: {r:?}"))?;

        let records = harness.store.records.lock().expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].origin, "198.51.100.7");
        Ok(())
    }

    #[tokio::test]
    async fn exchange_failure_is_provider_auth_failed() {
        let mut harness = Harness::new();
        harness.provider.fail_exchange = true;
        let verifier = harness.verifier();
        let token = verifier.issue_token();

        let outcome = verifier.verify(attempt(&token, "abc", "203.0.113.5")).await;
        assert_eq!(outcome.unwrap_err(), Rejection::ProviderAuthFailed);

        // Short-circuited: nothing persisted, no grant, no audit.
        assert!(harness.store.records.lock().expect("records").is_empty());
        assert!(harness.grant.granted.lock().expect("granted").is_empty());
        assert_eq!(harness.audit.notifications.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn identity_fetch_failure_is_provider_auth_failed() {
        let mut harness = Harness::new();
        harness.provider.fail_fetch = true;
        let verifier = harness.verifier();
        let token = verifier.issue_token();

        let outcome = verifier.verify(attempt(&token, "abc", "203.0.113.5")).await;
        assert_eq!(outcome.unwrap_err(), Rejection::ProviderAuthFailed);
        assert!(harness.grant.granted.lock().expect("granted").is_empty());
    }

    #[tokio::test]
    async fn grant_failure_does_not_revoke_access() -> Result<()> {
        let mut harness = Harness::new();
        harness.grant.fail = true;
        let verifier = harness.verifier();
        let token = verifier.issue_token();

        let record = verifier
            .verify(attempt(&token, "abc", "203.0.113.5"))
            .await
            .map_err(|r| anyhow!("unexpected rejection: {r:?}"))?;

        assert_eq!(record.id, "42");
        assert_eq!(harness.store.records.lock().expect("records").len(), 1);
        assert_eq!(harness.audit.notifications.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn departed_member_is_a_benign_noop() -> Result<()> {
        let mut harness = Harness::new();
        harness.grant.not_a_member = true;
        let verifier = harness.verifier();
        let token = verifier.issue_token();

        let record = verifier
            .verify(attempt(&token, "abc", "203.0.113.5"))
            .await
            .map_err(|r| anyhow!("unexpected rejection: {r:?}"))?;

        assert_eq!(record.id, "42");
        assert!(harness.grant.granted.lock().expect("granted").is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn audit_failure_does_not_revoke_access() -> Result<()> {
        let mut harness = Harness::new();
        harness.audit.fail = true;
        let verifier = harness.verifier();
        let token = verifier.issue_token();

        let record = verifier
            .verify(attempt(&token, "abc", "203.0.113.5"))
            .await
            .map_err(|r| anyhow!("unexpected rejection: {r:?}"))?;

        // The webhook failure is logged and recovered; the record was still
        // persisted and the role granted.
        assert_eq!(record.id, "42");
        assert_eq!(harness.store.records.lock().expect("records").len(), 1);
        assert_eq!(
            *harness.grant.granted.lock().expect("granted"),
            vec!["42".to_string()]
        );
        assert_eq!(harness.audit.notifications.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn persistence_failure_does_not_revoke_access() -> Result<()> {
        let mut harness = Harness::new();
        harness.store.fail_upsert = true;
        let verifier = harness.verifier();
        let token = verifier.issue_token();

        let record = verifier
            .verify(attempt(&token, "abc", "203.0.113.5"))
            .await
            .map_err(|r| anyhow!("unexpected rejection: {r:?}"))?;

        // Completed despite the storage hiccup; role grant still attempted.
        assert_eq!(record.id, "42");
        assert_eq!(
            *harness.grant.granted.lock().expect("granted"),
            vec!["42".to_string()]
        );
        assert_eq!(harness.audit.notifications.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
