//! In-memory ledger of outstanding codes.

use std::collections::HashMap;
use std::time::Instant;

use anyhow::{Result, bail};
use tokio::sync::Mutex;
use tracing::debug;

use super::code::{codes_match, generate_code};
use super::{OtpConfig, OtpPurpose, VerifyOutcome};

// Regenerating more than this many times means the random source keeps
// returning the superseded code, which is not worth retrying further.
const CODE_REGEN_LIMIT: usize = 8;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct OtpKey {
    email: String,
    purpose: OtpPurpose,
}

impl OtpKey {
    fn new(email: &str, purpose: OtpPurpose) -> Self {
        Self {
            email: email.to_string(),
            purpose,
        }
    }
}

#[derive(Debug)]
struct OtpRecord {
    code: String,
    issued_at: Instant,
    expires_at: Instant,
    attempts: u8,
    consumed: bool,
}

impl OtpRecord {
    fn expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn active(&self, max_attempts: u8) -> bool {
        !self.consumed && !self.expired() && self.attempts < max_attempts
    }
}

/// Owns every outstanding code, one record per (email, purpose) pair.
///
/// The whole map sits behind one async mutex, so operations on the same
/// pair are serialized: two concurrent verifications cannot both consume
/// a record and no attempt increment is lost.
pub struct OtpLedger {
    config: OtpConfig,
    records: Mutex<HashMap<OtpKey, OtpRecord>>,
}

impl OtpLedger {
    #[must_use]
    pub fn new(config: OtpConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &OtpConfig {
        &self.config
    }

    /// Issue a fresh code for the pair, superseding any prior record.
    ///
    /// Consumed records are kept until their window closes, and the new
    /// code is regenerated while it collides with the prior one, so a
    /// code value never repeats for a pair inside the TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS random source fails or keeps
    /// returning the superseded code.
    pub async fn issue(&self, email: &str, purpose: OtpPurpose) -> Result<String> {
        let key = OtpKey::new(email, purpose);
        let mut records = self.records.lock().await;

        // Storage hygiene; correctness only needs the lazy checks below.
        records.retain(|_, record| !record.expired());

        let code = match records.get(&key) {
            Some(prior) => {
                if prior.active(self.config.max_attempts()) {
                    debug!(
                        %purpose,
                        age_secs = prior.issued_at.elapsed().as_secs(),
                        "superseding active code"
                    );
                }
                let mut code = generate_code(self.config.code_length())?;
                let mut regens = 0;
                while codes_match(&code, &prior.code) {
                    regens += 1;
                    if regens > CODE_REGEN_LIMIT {
                        bail!("random source keeps returning the superseded code");
                    }
                    code = generate_code(self.config.code_length())?;
                }
                code
            }
            None => generate_code(self.config.code_length())?,
        };

        let now = Instant::now();
        records.insert(
            key,
            OtpRecord {
                code: code.clone(),
                issued_at: now,
                expires_at: now + self.config.ttl(),
                attempts: 0,
                consumed: false,
            },
        );

        Ok(code)
    }

    /// Adjudicate a candidate code for the pair.
    ///
    /// Expiry is checked lazily here; the attempt cap is checked before
    /// the comparison so an exhausted record rejects even the correct
    /// code. A match consumes the record permanently.
    pub async fn verify(
        &self,
        email: &str,
        purpose: OtpPurpose,
        candidate: &str,
    ) -> VerifyOutcome {
        let key = OtpKey::new(email, purpose);
        let mut records = self.records.lock().await;

        let Some(record) = records.get_mut(&key) else {
            return VerifyOutcome::NotFound;
        };

        if record.expired() {
            records.remove(&key);
            return VerifyOutcome::Expired;
        }

        if record.consumed {
            // Consumed records linger only to block code reuse on the
            // next issuance; they never match again.
            return VerifyOutcome::NotFound;
        }

        if record.attempts >= self.config.max_attempts() {
            return VerifyOutcome::AttemptsExhausted;
        }

        if codes_match(candidate, &record.code) {
            record.consumed = true;
            VerifyOutcome::Verified
        } else {
            record.attempts = record.attempts.saturating_add(1);
            VerifyOutcome::Mismatch
        }
    }

    /// Whether an unconsumed, unexpired record with attempts left exists
    /// for the pair.
    pub async fn has_active(&self, email: &str, purpose: OtpPurpose) -> bool {
        let records = self.records.lock().await;
        records
            .get(&OtpKey::new(email, purpose))
            .is_some_and(|record| record.active(self.config.max_attempts()))
    }
}
