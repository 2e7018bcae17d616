//! Multipart boundary generation.

use std::fmt::Write as _;

/// Random bytes behind each boundary token.
pub const BOUNDARY_ENTROPY_BYTES: usize = 16;

/// Prefix of every generated boundary.
///
/// `=_` never occurs in Base64 or Quoted-Printable output, so a delimiter
/// line cannot be produced by encoded content.
pub const BOUNDARY_PREFIX: &str = "=_";

/// Source of multipart boundary tokens.
pub trait BoundarySource: Send + Sync {
    /// Returns a fresh boundary token.
    fn next_boundary(&self) -> String;
}

/// Boundaries drawn from the thread-local CSPRNG, hex encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomBoundary;

impl BoundarySource for RandomBoundary {
    fn next_boundary(&self) -> String {
        let bytes: [u8; BOUNDARY_ENTROPY_BYTES] = rand::random();
        let mut token = String::with_capacity(BOUNDARY_PREFIX.len() + 2 * BOUNDARY_ENTROPY_BYTES);
        token.push_str(BOUNDARY_PREFIX);
        for byte in bytes {
            let _ = write!(token, "{byte:02x}");
        }
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_boundary_shape() {
        let token = RandomBoundary.next_boundary();
        assert_eq!(token.len(), 2 + 32);
        assert!(token.starts_with(BOUNDARY_PREFIX));
        assert!(token[2..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_random_boundaries_are_unique() {
        let tokens: HashSet<String> = (0..1000).map(|_| RandomBoundary.next_boundary()).collect();
        assert_eq!(tokens.len(), 1000);
    }
}
