//! Recovery phrase generation and one-way hashing.
//!
//! A phrase is 12 words chosen by splitting 128 bits of CSPRNG entropy into
//! 11-bit groups indexing the 2048-entry BIP39 English word list (the final
//! group carries the remaining 7 entropy bits, zero-padded). No checksum
//! word is appended: a mistyped word is only caught by the explicit hash
//! verification step. Changing the entropy width or the indexing would
//! invalidate phrases users have already written down.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Number of words in a recovery phrase.
pub const PHRASE_WORDS: usize = 12;

/// Entropy behind a phrase, in bytes.
pub const PHRASE_ENTROPY_BYTES: usize = 16;

/// A 12-word recovery phrase.
///
/// Zeroized on drop. The phrase is shown to the user exactly once and never
/// persisted; only its [`phrase_hash`] digest is stored.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RecoveryPhrase(String);

impl RecoveryPhrase {
    /// Draws 128 bits of entropy and maps them onto 12 word-list entries.
    pub fn generate() -> Self {
        let mut entropy = [0u8; PHRASE_ENTROPY_BYTES];
        rand::rng().fill_bytes(&mut entropy);
        let phrase = phrase_from_entropy(&entropy);
        entropy.zeroize();
        phrase
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn words(&self) -> Vec<&str> {
        self.0.split_whitespace().collect()
    }
}

/// The fixed word list backing phrase indexing (2048 entries).
pub fn word_list() -> &'static [&'static str] {
    bip39::Language::English.word_list()
}

/// Deterministic entropy-to-words mapping. Exposed for tests.
pub fn phrase_from_entropy(entropy: &[u8; PHRASE_ENTROPY_BYTES]) -> RecoveryPhrase {
    let list = word_list();

    // 128 entropy bits as a flat MSB-first sequence.
    let mut bits = Vec::with_capacity(PHRASE_ENTROPY_BYTES * 8);
    for byte in entropy {
        for j in (0..8).rev() {
            bits.push((byte >> j) & 1);
        }
    }

    // 11 full 11-bit groups plus a 7-bit tail, zero-padded to 11 bits.
    let mut words = Vec::with_capacity(PHRASE_WORDS);
    for chunk in bits.chunks(11) {
        let mut index: u16 = 0;
        for j in 0..11 {
            let bit = chunk.get(j).copied().unwrap_or(0);
            index = (index << 1) | u16::from(bit);
        }
        words.push(list[index as usize]);
    }

    bits.zeroize();
    RecoveryPhrase(words.join(" "))
}

/// One-way digest of a phrase: base64(SHA-256(normalized words)).
///
/// Words are lowercased and whitespace is collapsed before hashing so a
/// phrase typed with stray spacing or capitals still verifies. Digest
/// equality is treated as phrase equality.
pub fn phrase_hash(phrase: &str) -> String {
    let normalized = phrase
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    let digest = Sha256::digest(normalized.as_bytes());
    BASE64.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_list_has_2048_entries() {
        assert_eq!(word_list().len(), 2048);
    }

    #[test]
    fn generated_phrase_has_12_words_from_the_list() {
        let phrase = RecoveryPhrase::generate();
        let words = phrase.words();
        assert_eq!(words.len(), PHRASE_WORDS);
        for word in words {
            assert!(
                word_list().contains(&word),
                "word '{word}' not in the word list"
            );
        }
    }

    #[test]
    fn two_generated_phrases_differ() {
        let a = RecoveryPhrase::generate();
        let b = RecoveryPhrase::generate();
        assert_ne!(a.as_str(), b.as_str());
    }

    #[test]
    fn entropy_mapping_is_deterministic() {
        let entropy = [0x5Au8; PHRASE_ENTROPY_BYTES];
        let a = phrase_from_entropy(&entropy);
        let b = phrase_from_entropy(&entropy);
        assert_eq!(a.as_str(), b.as_str());
    }

    #[test]
    fn all_zero_entropy_maps_to_first_word() {
        let phrase = phrase_from_entropy(&[0u8; PHRASE_ENTROPY_BYTES]);
        for word in phrase.words() {
            assert_eq!(word, word_list()[0]);
        }
    }

    #[test]
    fn hash_is_deterministic() {
        let phrase = RecoveryPhrase::generate();
        assert_eq!(phrase_hash(phrase.as_str()), phrase_hash(phrase.as_str()));
    }

    #[test]
    fn hash_normalizes_spacing_and_case() {
        let h1 = phrase_hash("apple  banana   cherry");
        let h2 = phrase_hash(" Apple banana CHERRY ");
        assert_eq!(h1, h2);
    }

    #[test]
    fn distinct_phrases_hash_differently() {
        let a = RecoveryPhrase::generate();
        let b = RecoveryPhrase::generate();
        assert_ne!(phrase_hash(a.as_str()), phrase_hash(b.as_str()));
    }
}
