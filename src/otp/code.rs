//! Code generation and comparison helpers.

use anyhow::{Context, Result};
use rand::{RngCore, rngs::OsRng};
use subtle::ConstantTimeEq;

/// Draw a fixed-length numeric code from the OS random source.
///
/// One byte is drawn per digit; values of 250 and above are rejected so
/// the modulo does not bias toward low digits. The plaintext is handed
/// to the caller only and must never be logged.
pub(super) fn generate_code(length: usize) -> Result<String> {
    let mut code = String::with_capacity(length);
    let mut byte = [0u8; 1];

    while code.len() < length {
        OsRng
            .try_fill_bytes(&mut byte)
            .context("failed to draw code digit")?;
        if byte[0] < 250 {
            code.push(char::from(b'0' + byte[0] % 10));
        }
    }

    Ok(code)
}

/// Constant-time comparison of a candidate against the stored code.
///
/// `ct_eq` short-circuits only on length, which the candidate shape
/// check at the boundary already exposes; the digit-by-digit comparison
/// leaks nothing about where the first difference sits.
pub(super) fn codes_match(candidate: &str, expected: &str) -> bool {
    candidate.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_code_has_requested_length_and_digits_only() {
        for length in [1, 6, 8, 12] {
            let code = generate_code(length).unwrap();
            assert_eq!(code.len(), length);
            assert!(code.chars().all(|c| c.is_ascii_digit()), "code: {code}");
        }
    }

    #[test]
    fn generated_codes_are_not_constant() {
        // 10^6 values; 32 draws colliding pairwise would point at a
        // broken random source rather than bad luck.
        let codes: Vec<String> = (0..32).map(|_| generate_code(6).unwrap()).collect();
        let first = &codes[0];
        assert!(codes.iter().any(|code| code != first));
    }

    #[test]
    fn codes_match_exact_only() {
        assert!(codes_match("483920", "483920"));
        assert!(!codes_match("483921", "483920"));
        assert!(!codes_match("48392", "483920"));
        assert!(!codes_match("", "483920"));
    }
}
