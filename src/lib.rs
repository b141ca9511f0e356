//! # Sesamo
//!
//! `sesamo` manages email verification and password recovery with
//! single-use, time-bounded one-time passcodes (OTPs).
//!
//! ## Codes
//!
//! Codes are fixed-length numeric strings drawn from the OS random source
//! and scoped to a purpose (`verify_email` or `reset_password`). For each
//! (email, purpose) pair at most one code is live: issuing again
//! supersedes the previous code, and a code value is never repeated for a
//! pair while its time window is still open.
//!
//! - **Single-use:** a successfully verified code is consumed and can
//!   never match again.
//! - **Expiry:** codes expire after a configurable TTL, checked lazily at
//!   verification time.
//! - **Attempt cap:** failed guesses are counted; once the cap is reached
//!   even the correct code is rejected until a new one is issued.
//! - **Constant-time matching:** candidate codes are compared without
//!   early exit, so timing does not reveal where a guess went wrong.
//!
//! ## Flows
//!
//! Registration creates an unverified account (argon2id credential) and
//! queues a welcome message. Verification and reset requests are
//! enumeration-safe: the responses for present and absent accounts are
//! indistinguishable, and delivery runs on a background worker so request
//! latency never depends on the mail relay. Password resets consume the
//! code first and never restore it, so a failure later in the transaction
//! requires a fresh code.

pub mod account;
pub mod api;
pub mod cli;
pub mod flow;
pub mod notify;
pub mod otp;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
