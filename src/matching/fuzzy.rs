// 🔍 Stage 2 - Fuzzy Blocked Matcher
//
// Candidates share the first `prefix_len` characters of the normalized
// address. Each is scored as the average of trigram similarity and word
// similarity; the best score wins if it reaches the threshold.

use super::{MatchType, MatchUpdate, StageMatcher, TransactionMatchState};
use crate::config::MatchConfig;
use crate::corpus::{blocking_prefix, CorpusLookup};
use crate::similarity::{trigram_similarity, word_similarity};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FuzzyCandidate {
    pub address_id: i64,
    /// Combined score in [0, 1]
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    threshold: f64,
}

impl FuzzyMatcher {
    pub fn new(threshold: f64) -> Self {
        FuzzyMatcher { threshold }
    }

    pub fn from_config(config: &MatchConfig) -> Self {
        Self::new(config.fuzzy_threshold)
    }

    /// Trigram similarity below which the combined score cannot reach the
    /// threshold, even with a perfect word similarity of 1.0
    fn trigram_floor(&self) -> f64 {
        2.0 * self.threshold - 1.0
    }

    /// Highest-scoring blocked candidate that can still reach the threshold
    ///
    /// Equal scores resolve to the lower address_id.
    pub fn best_candidate(&self, index: &dyn CorpusLookup, normalized: &str) -> Option<FuzzyCandidate> {
        let prefix = blocking_prefix(normalized, index.prefix_len());
        let floor = self.trigram_floor();
        let mut best: Option<FuzzyCandidate> = None;

        for record in index.by_prefix(&prefix) {
            let trigram = trigram_similarity(normalized, &record.address);
            if trigram < floor {
                continue;
            }

            let score = (trigram + word_similarity(normalized, &record.address)) / 2.0;
            let better = match best {
                None => true,
                Some(current) => {
                    score > current.score || (score == current.score && record.address_id < current.address_id)
                }
            };
            if better {
                best = Some(FuzzyCandidate {
                    address_id: record.address_id,
                    score,
                });
            }
        }

        best
    }
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self::from_config(&MatchConfig::default())
    }
}

impl StageMatcher for FuzzyMatcher {
    fn match_type(&self) -> MatchType {
        MatchType::Fuzzy
    }

    fn match_one(&self, index: &dyn CorpusLookup, tx: &TransactionMatchState) -> Option<MatchUpdate> {
        let normalized = tx.normalized()?;
        let candidate = self.best_candidate(index, normalized)?;

        if candidate.score < self.threshold {
            debug!(
                transaction_id = tx.transaction_id,
                best = candidate.score,
                "fuzzy best below threshold"
            );
            return None;
        }

        debug!(
            transaction_id = tx.transaction_id,
            address_id = candidate.address_id,
            score = candidate.score,
            "fuzzy hit"
        );
        Some(MatchUpdate::Matched {
            transaction_id: tx.transaction_id,
            address_id: candidate.address_id,
            match_type: MatchType::Fuzzy,
            confidence: candidate.score,
        })
    }
}
