//! Orchestration of the user-facing flows on top of the OTP ledger,
//! the credential store, and the notifier queue.
//!
//! Domain results are enums; `FlowError` is reserved for infrastructure
//! failures (store outage, hashing, code generation). The issuance
//! flows are enumeration-safe: an unknown email returns the same `Ok`
//! as a known one, it just skips issuing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error};

use crate::account::password::{CredentialHasher, PasswordPolicy};
use crate::account::store::{CredentialStore, InsertOutcome, StoreError};
use crate::account::{Account, normalize_email};
use crate::notify::Message;
use crate::otp::{OtpLedger, OtpPurpose, VerifyOutcome};

const DEFAULT_ISSUE_COOLDOWN: Duration = Duration::from_secs(60);

/// Flow-level tunables: issuance cooldown and password policy.
#[derive(Clone, Copy, Debug)]
pub struct FlowConfig {
    issue_cooldown: Duration,
    policy: PasswordPolicy,
}

impl FlowConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            issue_cooldown: DEFAULT_ISSUE_COOLDOWN,
            policy: PasswordPolicy::new(),
        }
    }

    #[must_use]
    pub fn with_issue_cooldown(mut self, issue_cooldown: Duration) -> Self {
        self.issue_cooldown = issue_cooldown;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: PasswordPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn issue_cooldown(&self) -> Duration {
        self.issue_cooldown
    }

    #[must_use]
    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Infrastructure failure inside a flow; domain results never use this.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("credential hashing failed: {0}")]
    Hash(#[source] anyhow::Error),
    #[error("code generation failed: {0}")]
    Codegen(#[source] anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    AlreadyExists,
    PolicyViolation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Account is verified; repeating the confirmation is a no-op success.
    Verified,
    Rejected(VerifyOutcome),
    /// The code matched but the account no longer exists. The code is
    /// consumed either way; the boundary reports the generic failure.
    AccountMissing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetOutcome {
    Reset,
    Rejected(VerifyOutcome),
    /// Too short, or equal to the current password.
    PolicyViolation,
    AccountMissing,
}

/// Composition root for registration, email verification, and password
/// recovery.
pub struct AuthFlow {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<dyn CredentialHasher>,
    ledger: OtpLedger,
    outbox: mpsc::UnboundedSender<Message>,
    config: FlowConfig,
    last_issued: Mutex<HashMap<(String, OtpPurpose), Instant>>,
}

impl AuthFlow {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: Arc<dyn CredentialHasher>,
        ledger: OtpLedger,
        outbox: mpsc::UnboundedSender<Message>,
        config: FlowConfig,
    ) -> Self {
        Self {
            store,
            hasher,
            ledger,
            outbox,
            config,
            last_issued: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Create an unverified account and queue a welcome message.
    ///
    /// # Errors
    ///
    /// Returns `FlowError` when the store or the hasher fails.
    pub async fn register(&self, email: &str, password: &str) -> Result<RegisterOutcome, FlowError> {
        let email = normalize_email(email);
        if !self.config.policy().allows(password) {
            return Ok(RegisterOutcome::PolicyViolation);
        }

        let hash = self.hasher.hash(password).map_err(FlowError::Hash)?;
        let account = Account::new(email.clone(), hash);

        match self.store.insert(&account).await? {
            InsertOutcome::Inserted => {
                self.enqueue(Message {
                    to: email,
                    subject: "Welcome".to_string(),
                    body: "Your account has been created. Verify your email to finish setting up."
                        .to_string(),
                });
                Ok(RegisterOutcome::Created)
            }
            InsertOutcome::Conflict => Ok(RegisterOutcome::AlreadyExists),
        }
    }

    /// Issue an email-verification code. Always `Ok` for unknown emails.
    ///
    /// # Errors
    ///
    /// Returns `FlowError` when the store lookup or code generation
    /// fails; the boundary still reports success for issuance flows.
    pub async fn request_email_verification(&self, email: &str) -> Result<(), FlowError> {
        self.request_code(email, OtpPurpose::VerifyEmail).await
    }

    /// Issue a password-reset code. Always `Ok` for unknown emails.
    ///
    /// # Errors
    ///
    /// Same contract as [`AuthFlow::request_email_verification`].
    pub async fn request_password_reset(&self, email: &str) -> Result<(), FlowError> {
        self.request_code(email, OtpPurpose::ResetPassword).await
    }

    async fn request_code(&self, email: &str, purpose: OtpPurpose) -> Result<(), FlowError> {
        let email = normalize_email(email);

        // Unknown account: report success, issue nothing.
        if self.store.find_by_email(&email).await?.is_none() {
            debug!(%purpose, "code requested for unknown account");
            return Ok(());
        }

        // Cooldown is also reported as success so the caller cannot
        // probe issuance state. Ledger supersession stays untouched.
        if self.cooldown_active(&email, purpose).await {
            debug!(%purpose, "issuance suppressed by cooldown");
            return Ok(());
        }

        let code = self
            .ledger
            .issue(&email, purpose)
            .await
            .map_err(FlowError::Codegen)?;
        self.mark_issued(&email, purpose).await;

        let ttl_minutes = self.ledger.config().ttl().as_secs() / 60;
        let (subject, action) = match purpose {
            OtpPurpose::VerifyEmail => ("Your verification code", "verify your email address"),
            OtpPurpose::ResetPassword => ("Your password reset code", "reset your password"),
        };
        self.enqueue(Message {
            to: email,
            subject: subject.to_string(),
            body: format!(
                "Use the code {code} to {action}. It expires in {ttl_minutes} minutes."
            ),
        });

        Ok(())
    }

    /// Consume a verification code and mark the account verified.
    ///
    /// # Errors
    ///
    /// Returns `FlowError` when the store fails. The code is already
    /// consumed at that point and is not restored.
    pub async fn confirm_email_verification(
        &self,
        email: &str,
        code: &str,
    ) -> Result<ConfirmOutcome, FlowError> {
        let email = normalize_email(email);

        match self.ledger.verify(&email, OtpPurpose::VerifyEmail, code).await {
            VerifyOutcome::Verified => {}
            outcome => return Ok(ConfirmOutcome::Rejected(outcome)),
        }

        let Some(mut account) = self.store.find_by_email(&email).await? else {
            return Ok(ConfirmOutcome::AccountMissing);
        };

        if account.verified {
            return Ok(ConfirmOutcome::Verified);
        }

        account.verified = true;
        self.store.save(&account).await?;

        Ok(ConfirmOutcome::Verified)
    }

    /// Consume a reset code and replace the account password.
    ///
    /// The code is consumed before anything else and never rolled back:
    /// a policy rejection or a store failure after this point costs the
    /// caller a fresh code (fail closed).
    ///
    /// # Errors
    ///
    /// Returns `FlowError` when the store or the hasher fails.
    pub async fn complete_password_reset(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<ResetOutcome, FlowError> {
        let email = normalize_email(email);

        match self.ledger.verify(&email, OtpPurpose::ResetPassword, code).await {
            VerifyOutcome::Verified => {}
            outcome => return Ok(ResetOutcome::Rejected(outcome)),
        }

        let Some(mut account) = self.store.find_by_email(&email).await? else {
            return Ok(ResetOutcome::AccountMissing);
        };

        if !self.config.policy().allows(new_password)
            || self.hasher.verify(new_password, &account.password_hash)
        {
            return Ok(ResetOutcome::PolicyViolation);
        }

        account.password_hash = self.hasher.hash(new_password).map_err(FlowError::Hash)?;
        self.store.save(&account).await?;

        Ok(ResetOutcome::Reset)
    }

    fn enqueue(&self, message: Message) {
        // Delivery is fire-and-forget from here; a dead worker is an
        // operational problem, not a request failure.
        if let Err(err) = self.outbox.send(message) {
            error!("failed to queue notification: {err}");
        }
    }

    async fn cooldown_active(&self, email: &str, purpose: OtpPurpose) -> bool {
        let last_issued = self.last_issued.lock().await;
        last_issued
            .get(&(email.to_string(), purpose))
            .is_some_and(|at| at.elapsed() < self.config.issue_cooldown())
    }

    async fn mark_issued(&self, email: &str, purpose: OtpPurpose) {
        let cooldown = self.config.issue_cooldown();
        let mut last_issued = self.last_issued.lock().await;
        last_issued.retain(|_, at| at.elapsed() < cooldown);
        last_issued.insert((email.to_string(), purpose), Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::store::InMemoryCredentialStore;
    use crate::otp::OtpConfig;
    use anyhow::Result;

    struct TestHasher;

    impl CredentialHasher for TestHasher {
        fn hash(&self, plaintext: &str) -> Result<String> {
            Ok(format!("hashed:{plaintext}"))
        }

        fn verify(&self, plaintext: &str, hash: &str) -> bool {
            hash == format!("hashed:{plaintext}")
        }
    }

    struct Harness {
        flow: AuthFlow,
        store: Arc<InMemoryCredentialStore>,
        rx: mpsc::UnboundedReceiver<Message>,
    }

    fn harness(config: FlowConfig) -> Harness {
        let store = Arc::new(InMemoryCredentialStore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let flow = AuthFlow::new(
            store.clone(),
            Arc::new(TestHasher),
            OtpLedger::new(OtpConfig::new()),
            tx,
            config,
        );
        Harness { flow, store, rx }
    }

    // No cooldown so tests can issue back-to-back.
    fn default_harness() -> Harness {
        harness(FlowConfig::new().with_issue_cooldown(Duration::ZERO))
    }

    async fn seed_account(store: &InMemoryCredentialStore, email: &str, password: &str) {
        let account = Account::new(email.to_string(), format!("hashed:{password}"));
        store.insert(&account).await.unwrap();
    }

    /// Pull the code out of the last queued notification body.
    fn code_from(message: &Message) -> String {
        message
            .body
            .split_whitespace()
            .map(|word| word.trim_matches(|c: char| !c.is_ascii_digit()))
            .find(|word| word.len() == 6 && word.chars().all(|c| c.is_ascii_digit()))
            .expect("notification body should carry a 6-digit code")
            .to_string()
    }

    #[tokio::test]
    async fn register_creates_account_and_queues_welcome() {
        let mut h = default_harness();

        let outcome = h.flow.register(" Alice@Example.COM ", "password").await.unwrap();
        assert_eq!(outcome, RegisterOutcome::Created);

        let account = h
            .store
            .find_by_email("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(!account.verified);
        assert_eq!(account.password_hash, "hashed:password");

        let message = h.rx.try_recv().unwrap();
        assert_eq!(message.to, "alice@example.com");
        assert_eq!(message.subject, "Welcome");
    }

    #[tokio::test]
    async fn register_reports_conflict_without_welcome() {
        let mut h = default_harness();
        seed_account(&h.store, "a@example.com", "password").await;

        let outcome = h.flow.register("a@example.com", "password").await.unwrap();
        assert_eq!(outcome, RegisterOutcome::AlreadyExists);
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn register_rejects_short_password() {
        let h = default_harness();
        let outcome = h.flow.register("a@example.com", "tiny").await.unwrap();
        assert_eq!(outcome, RegisterOutcome::PolicyViolation);
        assert!(h.store.find_by_email("a@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn issuance_is_enumeration_safe() {
        let mut h = default_harness();
        seed_account(&h.store, "known@example.com", "password").await;

        // Present and absent emails return the same result.
        assert!(h.flow.request_password_reset("known@example.com").await.is_ok());
        assert!(h.flow.request_password_reset("ghost@example.com").await.is_ok());

        // Only the known account got a message, and only one.
        let message = h.rx.try_recv().unwrap();
        assert_eq!(message.to, "known@example.com");
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reset_scenario_wrong_then_right_then_replay() {
        let mut h = default_harness();
        seed_account(&h.store, "user@x.com", "old-password").await;

        h.flow.request_password_reset("user@x.com").await.unwrap();
        let code = code_from(&h.rx.try_recv().unwrap());

        let outcome = h
            .flow
            .complete_password_reset("user@x.com", "000000", "new-password")
            .await
            .unwrap();
        assert_eq!(outcome, ResetOutcome::Rejected(VerifyOutcome::Mismatch));

        let outcome = h
            .flow
            .complete_password_reset("user@x.com", &code, "new-password")
            .await
            .unwrap();
        assert_eq!(outcome, ResetOutcome::Reset);

        let account = h.store.find_by_email("user@x.com").await.unwrap().unwrap();
        assert_eq!(account.password_hash, "hashed:new-password");

        // Replay of the consumed code.
        let outcome = h
            .flow
            .complete_password_reset("user@x.com", &code, "another-password")
            .await
            .unwrap();
        assert_eq!(outcome, ResetOutcome::Rejected(VerifyOutcome::NotFound));
    }

    #[tokio::test]
    async fn reset_consumes_the_code_even_on_policy_rejection() {
        let mut h = default_harness();
        seed_account(&h.store, "a@example.com", "old-password").await;

        h.flow.request_password_reset("a@example.com").await.unwrap();
        let code = code_from(&h.rx.try_recv().unwrap());

        // Too short: rejected, but the code is spent.
        let outcome = h
            .flow
            .complete_password_reset("a@example.com", &code, "tiny")
            .await
            .unwrap();
        assert_eq!(outcome, ResetOutcome::PolicyViolation);

        let outcome = h
            .flow
            .complete_password_reset("a@example.com", &code, "long-enough")
            .await
            .unwrap();
        assert_eq!(outcome, ResetOutcome::Rejected(VerifyOutcome::NotFound));
    }

    #[tokio::test]
    async fn reset_rejects_reusing_the_current_password() {
        let mut h = default_harness();
        seed_account(&h.store, "a@example.com", "same-password").await;

        h.flow.request_password_reset("a@example.com").await.unwrap();
        let code = code_from(&h.rx.try_recv().unwrap());

        let outcome = h
            .flow
            .complete_password_reset("a@example.com", &code, "same-password")
            .await
            .unwrap();
        assert_eq!(outcome, ResetOutcome::PolicyViolation);
    }

    #[tokio::test]
    async fn confirm_marks_verified_and_is_idempotent() {
        let mut h = default_harness();
        seed_account(&h.store, "a@example.com", "password").await;

        h.flow.request_email_verification("a@example.com").await.unwrap();
        let code = code_from(&h.rx.try_recv().unwrap());

        let outcome = h
            .flow
            .confirm_email_verification("a@example.com", &code)
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmOutcome::Verified);
        assert!(h.store.find_by_email("a@example.com").await.unwrap().unwrap().verified);

        // A fresh code for an already-verified account is still a no-op success.
        h.flow.request_email_verification("a@example.com").await.unwrap();
        let code = code_from(&h.rx.try_recv().unwrap());
        let outcome = h
            .flow
            .confirm_email_verification("a@example.com", &code)
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmOutcome::Verified);
    }

    #[tokio::test]
    async fn confirm_propagates_rejections_distinctly() {
        let h = default_harness();
        seed_account(&h.store, "a@example.com", "password").await;

        let outcome = h
            .flow
            .confirm_email_verification("a@example.com", "123456")
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmOutcome::Rejected(VerifyOutcome::NotFound));
    }

    #[tokio::test]
    async fn double_issue_invalidates_the_first_code() {
        let mut h = default_harness();
        seed_account(&h.store, "a@example.com", "password").await;

        h.flow.request_email_verification("a@example.com").await.unwrap();
        let first = code_from(&h.rx.try_recv().unwrap());
        h.flow.request_email_verification("a@example.com").await.unwrap();
        let second = code_from(&h.rx.try_recv().unwrap());

        let outcome = h
            .flow
            .confirm_email_verification("a@example.com", &first)
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmOutcome::Rejected(VerifyOutcome::Mismatch));

        let outcome = h
            .flow
            .confirm_email_verification("a@example.com", &second)
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmOutcome::Verified);
    }

    #[tokio::test]
    async fn cooldown_suppresses_back_to_back_issuance() {
        let mut h = harness(FlowConfig::new().with_issue_cooldown(Duration::from_secs(60)));
        seed_account(&h.store, "a@example.com", "password").await;

        h.flow.request_email_verification("a@example.com").await.unwrap();
        h.flow.request_email_verification("a@example.com").await.unwrap();

        // Both calls succeeded but only one message was queued.
        assert!(h.rx.try_recv().is_ok());
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn store_outage_surfaces_as_flow_error() {
        let h = default_harness();
        seed_account(&h.store, "a@example.com", "password").await;
        h.store.set_unavailable(true);

        let err = h
            .flow
            .confirm_email_verification("a@example.com", "123456")
            .await;
        // The lookup never happens (code rejected first), so use reset request.
        assert!(err.is_ok());

        let err = h.flow.request_password_reset("a@example.com").await;
        assert!(matches!(err, Err(FlowError::Store(_))));
    }
}
