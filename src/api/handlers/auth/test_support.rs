//! Shared doubles for handler tests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::account::Account;
use crate::account::password::CredentialHasher;
use crate::account::store::{CredentialStore, InMemoryCredentialStore};
use crate::api::ApiState;
use crate::flow::{AuthFlow, FlowConfig};
use crate::notify::Message;
use crate::otp::{OtpConfig, OtpLedger};

use super::rate_limit::NoopRateLimiter;

pub(crate) struct TestHasher;

impl CredentialHasher for TestHasher {
    fn hash(&self, plaintext: &str) -> Result<String> {
        Ok(format!("hashed:{plaintext}"))
    }

    fn verify(&self, plaintext: &str, hash: &str) -> bool {
        hash == format!("hashed:{plaintext}")
    }
}

pub(crate) struct TestApi {
    pub(crate) state: axum::extract::Extension<Arc<ApiState>>,
    pub(crate) store: Arc<InMemoryCredentialStore>,
    pub(crate) outbox: mpsc::UnboundedReceiver<Message>,
}

pub(crate) fn api() -> TestApi {
    let store = Arc::new(InMemoryCredentialStore::new());
    let (tx, outbox) = mpsc::unbounded_channel();
    let flow = AuthFlow::new(
        store.clone(),
        Arc::new(TestHasher),
        OtpLedger::new(OtpConfig::new()),
        tx,
        FlowConfig::new().with_issue_cooldown(Duration::ZERO),
    );
    let state = Arc::new(ApiState::new(Arc::new(flow), Arc::new(NoopRateLimiter)));
    TestApi {
        state: axum::extract::Extension(state),
        store,
        outbox,
    }
}

pub(crate) async fn seed_account(store: &InMemoryCredentialStore, email: &str, password: &str) {
    let account = Account::new(email.to_string(), format!("hashed:{password}"));
    store.insert(&account).await.unwrap();
}

/// Pull the code out of the last queued notification body.
pub(crate) fn code_from(message: &Message) -> String {
    message
        .body
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| !c.is_ascii_digit()))
        .find(|word| word.len() == 6 && word.chars().all(|c| c.is_ascii_digit()))
        .expect("notification body should carry a 6-digit code")
        .to_string()
}
