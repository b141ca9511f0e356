//! Account snapshot and the credential collaborators around it.

pub mod password;
pub mod store;

use chrono::{DateTime, Utc};
use regex::Regex;

/// Immutable per-request snapshot of one account.
///
/// Flows mutate `verified` and `password_hash` only through
/// [`store::CredentialStore::save`]; there is no shared mutable cache.
#[derive(Clone, Debug)]
pub struct Account {
    pub email: String,
    pub password_hash: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// A fresh, unverified account. `email` must already be normalized.
    #[must_use]
    pub fn new(email: String, password_hash: String) -> Self {
        Self {
            email,
            password_hash,
            verified: false,
            created_at: Utc::now(),
        }
    }
}

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}
