//! Invite code minting.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

/// Characters allowed in invite codes. 0/O and 1/I are excluded so a code
/// survives being read out over voice chat.
pub const CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

const MAX_RANDOM_ATTEMPTS: usize = 10;

/// Counter backing the deterministic fallback path. Two fallback codes from
/// the same process cannot collide until the counter wraps the code space.
static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates invite codes over the unambiguous alphabet.
///
/// The mint only proposes codes; the registry performs the final uniqueness
/// check under its index lock.
pub struct CodeMint {
    code_length: usize,
}

impl CodeMint {
    pub fn new(code_length: usize) -> Self {
        Self { code_length }
    }

    /// Draws random codes until `is_taken` accepts one; after ten rejected
    /// draws, falls back to a counter-derived code.
    pub fn mint(&self, mut is_taken: impl FnMut(&str) -> bool) -> String {
        for _ in 0..MAX_RANDOM_ATTEMPTS {
            let code = self.random_code();
            if !is_taken(&code) {
                return code;
            }
        }
        self.fallback_code()
    }

    fn random_code(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.code_length)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }

    /// Maps the low digits of a monotonic counter onto the alphabet,
    /// most-significant digit first.
    fn fallback_code(&self) -> String {
        let mut n = FALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut chars = vec![CODE_ALPHABET[0] as char; self.code_length];
        for slot in chars.iter_mut().rev() {
            *slot = CODE_ALPHABET[(n % CODE_ALPHABET.len() as u64) as usize] as char;
            n /= CODE_ALPHABET.len() as u64;
        }
        chars.into_iter().collect()
    }
}

/// Validates the shape of a client-supplied code: exact length, alphabet
/// membership only.
pub fn is_valid_code(code: &str, code_length: usize) -> bool {
    code.len() == code_length && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn random_codes_use_the_alphabet() {
        let mint = CodeMint::new(4);
        for _ in 0..100 {
            let code = mint.mint(|_| false);
            assert!(is_valid_code(&code, 4), "bad code: {code}");
        }
    }

    #[test]
    fn excludes_ambiguous_characters() {
        for banned in [b'0', b'O', b'1', b'I'] {
            assert!(!CODE_ALPHABET.contains(&banned));
        }
        assert_eq!(CODE_ALPHABET.len(), 32);
    }

    #[test]
    fn falls_back_when_every_random_draw_collides() {
        let mint = CodeMint::new(4);
        let mut attempts = 0;
        let code = mint.mint(|_| {
            attempts += 1;
            true
        });
        assert_eq!(attempts, 10);
        assert!(is_valid_code(&code, 4));
    }

    #[test]
    fn fallback_codes_are_distinct() {
        let mint = CodeMint::new(4);
        let mut seen = HashSet::new();
        for _ in 0..50 {
            let code = mint.mint(|_| true);
            assert!(seen.insert(code.clone()), "fallback repeated: {code}");
        }
    }

    #[test]
    fn code_validation() {
        assert!(is_valid_code("AB2C", 4));
        assert!(!is_valid_code("AB2", 4));
        assert!(!is_valid_code("AB2CD", 4));
        assert!(!is_valid_code("AB0C", 4)); // ambiguous zero
        assert!(!is_valid_code("ab2c", 4)); // lowercase
    }
}
