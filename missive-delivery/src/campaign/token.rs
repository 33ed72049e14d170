//! Campaign process tokens.
//!
//! A token is the capability a chain of batch ticks carries. Restarting or
//! stopping a campaign replaces or clears it, which silently invalidates any
//! tick still in flight.

/// 32 random bytes, hex encoded.
#[must_use]
pub fn generate() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

/// Compare without short-circuiting on the first differing byte.
#[must_use]
pub fn matches(expected: &str, presented: &str) -> bool {
    let (a, b) = (expected.as_bytes(), presented.as_bytes());
    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}
