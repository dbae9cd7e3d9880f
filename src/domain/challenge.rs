use rand::thread_rng;
use rand::Rng;

const CHALLENGE_LEN: usize = 128;
const ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// A 128-char random challenge drawn from `[A-Za-z0-9_-]` (§4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge(String);

impl Challenge {
    pub fn generate() -> Self {
        let mut rng = thread_rng();
        let s: String = (0..CHALLENGE_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(s)
    }
}

impl AsRef<str> for Challenge {
    fn as_ref(&self) -> &str { &self.0 }
}

impl std::fmt::Display for Challenge {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_128_chars_from_the_expected_alphabet() {
        let c = Challenge::generate();
        let s = c.as_ref();
        assert_eq!(s.len(), CHALLENGE_LEN);
        assert!(s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-'));
    }

    #[test]
    fn two_challenges_differ() {
        assert_ne!(Challenge::generate(), Challenge::generate());
    }
}
