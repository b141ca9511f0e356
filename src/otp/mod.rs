//! One-time passcode lifecycle: generation, storage, expiry, and
//! single-use consumption.
//!
//! The [`OtpLedger`] owns every outstanding code, keyed by
//! (email, purpose). Issuing supersedes any prior code for the pair,
//! verification consumes on match, and both expiry and the attempt cap
//! are evaluated at lookup time.

mod code;
mod ledger;

pub use ledger::OtpLedger;

use std::fmt;
use std::time::Duration;

const DEFAULT_CODE_LENGTH: usize = 6;
const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_MAX_ATTEMPTS: u8 = 5;

/// The context a code is scoped to. Codes never cross purposes: a
/// verification code cannot reset a password and vice versa.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum OtpPurpose {
    VerifyEmail,
    ResetPassword,
}

impl fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VerifyEmail => write!(f, "verify_email"),
            Self::ResetPassword => write!(f, "reset_password"),
        }
    }
}

/// Result of adjudicating a candidate code.
///
/// The kinds stay distinct here so flows and tests can tell them apart;
/// the HTTP boundary collapses every failure into one generic message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Candidate matched; the record is now consumed.
    Verified,
    /// No record for the pair, or the record was already consumed.
    NotFound,
    /// The record outlived its TTL.
    Expired,
    /// Candidate did not match; one more failed attempt recorded.
    Mismatch,
    /// The attempt cap was reached before this call, correctness aside.
    AttemptsExhausted,
}

/// Tunables for code shape and lifetime.
#[derive(Clone, Copy, Debug)]
pub struct OtpConfig {
    code_length: usize,
    ttl: Duration,
    max_attempts: u8,
}

impl OtpConfig {
    /// Defaults: 6 digits, 15 minute TTL, 5 attempts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            code_length: DEFAULT_CODE_LENGTH,
            ttl: DEFAULT_TTL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_code_length(mut self, code_length: usize) -> Self {
        self.code_length = code_length.max(1);
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u8) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn code_length(&self) -> usize {
        self.code_length
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn max_attempts(&self) -> u8 {
        self.max_attempts
    }
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self::new()
    }
}
