// ⚙️ Matching configuration
// Thresholds, blocking and batch sizes. Everything has a default so an
// empty TOML file (or no file at all) yields the standard pipeline.

use crate::error::{MatchError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Minimum combined similarity for a fuzzy match (default: 0.7)
    pub fuzzy_threshold: f64,

    /// Number of leading characters used as blocking key (default: 10)
    pub prefix_len: usize,

    /// Fixed confidence assigned to phonetic matches (default: 0.6)
    pub phonetic_confidence: f64,

    /// Minimum edit-similarity ratio (0-100) to accept a phonetic candidate (default: 70)
    pub phonetic_tiebreak_threshold: f64,

    /// Transactions read and committed per chunk (default: 10000)
    pub chunk_size: usize,

    /// Canonical records keyed per index batch (default: 5000)
    pub index_batch_size: usize,

    /// Memoized parse results kept in the normalizer LRU (default: 10000)
    pub parse_cache_capacity: usize,

    /// Memoized phonetic keys kept in the generator LRU (default: 10000)
    pub phonetic_cache_capacity: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        MatchConfig {
            fuzzy_threshold: 0.7,
            prefix_len: 10,
            phonetic_confidence: 0.6,
            phonetic_tiebreak_threshold: 70.0,
            chunk_size: 10_000,
            index_batch_size: 5_000,
            parse_cache_capacity: 10_000,
            phonetic_cache_capacity: 10_000,
        }
    }
}

impl MatchConfig {
    /// Parse a TOML document; missing keys fall back to defaults
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: MatchConfig =
            toml::from_str(s).map_err(|e| MatchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let unit_range = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(MatchError::Config(format!("{name} must be within [0, 1], got {v}")))
            }
        };

        unit_range("fuzzy_threshold", self.fuzzy_threshold)?;
        unit_range("phonetic_confidence", self.phonetic_confidence)?;

        if !(0.0..=100.0).contains(&self.phonetic_tiebreak_threshold) {
            return Err(MatchError::Config(format!(
                "phonetic_tiebreak_threshold must be within [0, 100], got {}",
                self.phonetic_tiebreak_threshold
            )));
        }

        for (name, value) in [
            ("prefix_len", self.prefix_len),
            ("chunk_size", self.chunk_size),
            ("index_batch_size", self.index_batch_size),
            ("parse_cache_capacity", self.parse_cache_capacity),
            ("phonetic_cache_capacity", self.phonetic_cache_capacity),
        ] {
            if value == 0 {
                return Err(MatchError::Config(format!("{name} must be greater than zero")));
            }
        }

        Ok(())
    }
}
