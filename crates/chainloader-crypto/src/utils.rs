//! Constant-time comparison utilities.
//!
//! Public keys are compared through these helpers when deciding whether two
//! resolved identities are the same party.

use constant_time_eq::constant_time_eq;

/// Compare two byte slices in constant time.
///
/// Slices of different length compare unequal.
///
/// # Example
///
/// ```rust
/// use chainloader_crypto::utils::constant_time_compare;
///
/// let a = [0u8; 32];
/// let b = [0u8; 32];
/// assert!(constant_time_compare(&a, &b));
///
/// let c = [1u8; 32];
/// assert!(!constant_time_compare(&a, &c));
/// ```
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    constant_time_eq(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare_equal() {
        assert!(constant_time_compare(b"hello world", b"hello world"));
    }

    #[test]
    fn test_constant_time_compare_different() {
        assert!(!constant_time_compare(b"hello world", b"hello worlD"));
    }

    #[test]
    fn test_constant_time_compare_different_length() {
        assert!(!constant_time_compare(b"hello", b"hello world"));
    }
}
