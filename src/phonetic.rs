// 🔊 Phonetic Key Generator - Metaphone / Soundex / NYSIIS
//
// Pure function of the normalized address, memoized in a bounded LRU.
// Digits carry no sound, so only ASCII letters reach the encoders.

use lru::LruCache;
use rphonetic::{Encoder, Metaphone, Nysiis, Soundex};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Mutex;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhoneticKeys {
    pub metaphone: String,
    /// Fixed 4-character code, empty for empty input
    pub soundex: String,
    pub nysiis: String,
}

impl PhoneticKeys {
    pub fn is_empty(&self) -> bool {
        self.metaphone.is_empty() && self.soundex.is_empty() && self.nysiis.is_empty()
    }
}

fn letters_only(normalized: &str) -> String {
    normalized
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Compute keys without memoization
pub fn compute_keys(normalized: &str) -> PhoneticKeys {
    let letters = letters_only(normalized);
    if letters.is_empty() {
        return PhoneticKeys::default();
    }

    PhoneticKeys {
        metaphone: Metaphone::default().encode(&letters),
        soundex: Soundex::default().encode(&letters),
        nysiis: Nysiis::default().encode(&letters),
    }
}

pub struct PhoneticKeyGenerator {
    cache: Mutex<LruCache<String, PhoneticKeys>>,
}

impl PhoneticKeyGenerator {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        PhoneticKeyGenerator {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn keys(&self, normalized: &str) -> PhoneticKeys {
        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(normalized) {
                return hit.clone();
            }
        }

        let keys = compute_keys(normalized);

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(normalized.to_string(), keys.clone());
        keys
    }
}

impl Default for PhoneticKeyGenerator {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_gives_empty_keys() {
        assert!(compute_keys("").is_empty());
        assert!(compute_keys("123 456").is_empty());
    }

    #[test]
    fn test_soundex_is_four_chars() {
        let keys = compute_keys("123 MAIN ST");
        assert_eq!(keys.soundex.len(), 4);
        assert!(keys.soundex.starts_with('M'));
        assert!(!keys.metaphone.is_empty());
        assert!(!keys.nysiis.is_empty());
    }

    #[test]
    fn test_digits_do_not_affect_keys() {
        assert_eq!(compute_keys("123 MAIN ST"), compute_keys("99 MAIN ST"));
    }

    #[test]
    fn test_similar_sounding_share_soundex() {
        let a = compute_keys("SMITH ST");
        let b = compute_keys("SMYTH ST");
        assert_eq!(a.soundex, b.soundex);
    }

    #[test]
    fn test_generator_matches_uncached() {
        let generator = PhoneticKeyGenerator::new(4);
        let first = generator.keys("45 LEXINGTON");
        let second = generator.keys("45 LEXINGTON");
        assert_eq!(first, second);
        assert_eq!(first, compute_keys("45 LEXINGTON"));
    }
}
