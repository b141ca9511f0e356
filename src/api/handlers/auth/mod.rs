//! Registration, email verification, and password recovery endpoints.

pub mod rate_limit;
pub mod register;
#[cfg(test)]
pub(crate) mod test_support;
pub mod reset;
pub mod types;
pub mod verification;

pub use register::register;
pub use reset::{reset_password, send_reset_otp};
pub use verification::{send_otp, verify_email};

// One message for every code failure (missing, expired, mismatched,
// exhausted) so responses cannot be used as an oracle.
pub(super) const INVALID_CODE_MESSAGE: &str = "Invalid or expired code";

/// Shape check for a candidate code before it reaches the ledger.
pub(super) fn valid_otp(code: &str) -> bool {
    !code.is_empty() && code.len() <= 16 && code.chars().all(|c| c.is_ascii_digit())
}
