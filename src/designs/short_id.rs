//! Short identifier generation
//!
//! Compact, human-shareable ids for saved designs. The alphabet drops the
//! characters that read ambiguously in a shared link (0/O, 1/l/I). Ten
//! characters over 54 symbols leaves collisions to the unique index, which
//! the save path retries on.

use rand::Rng;

/// Characters usable in a short id
pub const SHORT_ID_ALPHABET: &[u8] = b"23456789abcdefghijkmnpqrstuvwxyzABCDEFGHJKLMNPQRSTUVWX";

/// Length of generated short ids
pub const SHORT_ID_LEN: usize = 10;

/// Generate a random short id
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..SHORT_ID_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..SHORT_ID_ALPHABET.len());
            SHORT_ID_ALPHABET[idx] as char
        })
        .collect()
}

/// Whether a route parameter even looks like a short id
pub fn is_plausible(candidate: &str) -> bool {
    candidate.len() == SHORT_ID_LEN
        && candidate.bytes().all(|b| SHORT_ID_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_use_the_alphabet() {
        for _ in 0..100 {
            let id = generate();
            assert_eq!(id.len(), SHORT_ID_LEN);
            assert!(is_plausible(&id), "unexpected character in {}", id);
        }
    }

    #[test]
    fn test_ambiguous_characters_excluded() {
        for forbidden in ["0", "O", "1", "l", "I"] {
            assert!(!SHORT_ID_ALPHABET.contains(&forbidden.as_bytes()[0]));
        }
    }

    #[test]
    fn test_consecutive_ids_differ() {
        // Not a uniqueness proof, just a sanity check on the generator
        let a = generate();
        let b = generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_is_plausible_rejects_wrong_shapes() {
        assert!(!is_plausible("short"));
        assert!(!is_plausible("generated!"));
        assert!(!is_plausible("has 0 in it"));
    }
}
