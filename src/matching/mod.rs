// 🎯 Matching stages - shared data model
//
// A transaction moves through exact → fuzzy → phonetic. Each stage looks
// only at transactions that are still unmatched and proposes at most one
// `MatchUpdate` per transaction.

pub mod exact;
pub mod fuzzy;
pub mod phonetic;

pub use exact::ExactMatcher;
pub use fuzzy::{FuzzyCandidate, FuzzyMatcher};
pub use phonetic::PhoneticMatcher;

use crate::corpus::CorpusLookup;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// UNMATCH REASONS
// ============================================================================

pub const REASON_EMPTY_ADDRESS: &str = "empty address";
pub const REASON_FAILED_PARSE: &str = "failed parse";
pub const REASON_EMPTY_NORMALIZED: &str = "empty normalized address";
pub const REASON_NO_PHONETIC_KEYS: &str = "no phonetic match (no canonical keys)";
pub const REASON_NO_MATCH: &str = "no match found with sufficient confidence";

// ============================================================================
// MATCH TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Unmatched,
    Exact,
    Fuzzy,
    Phonetic,
    /// Resolved by an external validation collaborator
    External,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Unmatched => "unmatched",
            MatchType::Exact => "exact",
            MatchType::Fuzzy => "fuzzy",
            MatchType::Phonetic => "phonetic",
            MatchType::External => "external",
        }
    }

    pub fn parse(s: &str) -> Option<MatchType> {
        match s {
            "unmatched" => Some(MatchType::Unmatched),
            "exact" => Some(MatchType::Exact),
            "fuzzy" => Some(MatchType::Fuzzy),
            "phonetic" => Some(MatchType::Phonetic),
            "external" => Some(MatchType::External),
            _ => None,
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TRANSACTION MATCH STATE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionMatchState {
    pub transaction_id: i64,
    pub raw_address: String,
    /// None until parsed, or when parsing failed
    pub normalized_address: Option<String>,
    pub matched_address_id: Option<i64>,
    pub match_type: Option<MatchType>,
    /// In [0, 1]
    pub confidence_score: Option<f64>,
    /// Never set together with `matched_address_id`
    pub unmatch_reason: Option<String>,
}

impl TransactionMatchState {
    /// Fresh state as created at ingestion
    pub fn new(transaction_id: i64, raw_address: &str) -> Self {
        TransactionMatchState {
            transaction_id,
            raw_address: raw_address.to_string(),
            normalized_address: None,
            matched_address_id: None,
            match_type: None,
            confidence_score: None,
            unmatch_reason: None,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.matched_address_id.is_some()
    }

    /// Unmatched and carrying a non-empty normalized address
    pub fn is_eligible(&self) -> bool {
        !self.is_matched() && self.normalized().is_some()
    }

    pub fn normalized(&self) -> Option<&str> {
        self.normalized_address.as_deref().filter(|s| !s.is_empty())
    }

    /// Apply an update in place, honoring "matched is final"
    ///
    /// Returns false when the update was refused.
    pub fn apply(&mut self, update: &MatchUpdate) -> bool {
        if self.is_matched() || update.transaction_id() != self.transaction_id {
            return false;
        }

        match update {
            MatchUpdate::Matched { address_id, match_type, confidence, .. } => {
                self.matched_address_id = Some(*address_id);
                self.match_type = Some(*match_type);
                self.confidence_score = Some(*confidence);
                self.unmatch_reason = None;
            }
            MatchUpdate::Unmatched { reason, .. } => {
                self.match_type = Some(MatchType::Unmatched);
                self.confidence_score = None;
                self.unmatch_reason = Some(reason.clone());
            }
        }
        true
    }
}

// ============================================================================
// MATCH UPDATE
// ============================================================================

/// Outcome proposed by a stage for one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatchUpdate {
    Matched {
        transaction_id: i64,
        address_id: i64,
        match_type: MatchType,
        confidence: f64,
    },
    /// Terminal, stage-specific reason
    Unmatched { transaction_id: i64, reason: String },
}

impl MatchUpdate {
    pub fn transaction_id(&self) -> i64 {
        match self {
            MatchUpdate::Matched { transaction_id, .. } => *transaction_id,
            MatchUpdate::Unmatched { transaction_id, .. } => *transaction_id,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, MatchUpdate::Matched { .. })
    }
}

// ============================================================================
// STAGE MATCHER
// ============================================================================

/// One step of the waterfall
///
/// Implementations are pure with respect to the corpus: the same transaction
/// and index always yield the same proposal, which keeps chunk-internal
/// parallelism safe.
pub trait StageMatcher: Send + Sync {
    fn match_type(&self) -> MatchType;

    /// Proposal for one eligible transaction; `None` leaves it for the next stage
    fn match_one(&self, index: &dyn CorpusLookup, tx: &TransactionMatchState) -> Option<MatchUpdate>;
}

/// Counts for one stage pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub examined: usize,
    pub matched: usize,
    pub reasons_set: usize,
    pub chunks: usize,
}

impl StageReport {
    pub fn new(stage: MatchType) -> Self {
        StageReport {
            stage: stage.as_str().to_string(),
            ..Default::default()
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} stage: examined {}, matched {}, terminal reasons {} ({} chunks)",
            self.stage, self.examined, self.matched, self.reasons_set, self.chunks
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_type_round_trip_names() {
        for mt in [
            MatchType::Unmatched,
            MatchType::Exact,
            MatchType::Fuzzy,
            MatchType::Phonetic,
            MatchType::External,
        ] {
            assert_eq!(MatchType::parse(mt.as_str()), Some(mt));
        }
        assert_eq!(MatchType::parse("fuzzy_prefix_block"), None);
    }

    #[test]
    fn test_apply_match_clears_reason() {
        let mut state = TransactionMatchState::new(1, "123 Main St");
        state.normalized_address = Some("123 MAIN ST".into());
        state.unmatch_reason = Some("stale".into());

        let applied = state.apply(&MatchUpdate::Matched {
            transaction_id: 1,
            address_id: 9,
            match_type: MatchType::Exact,
            confidence: 1.0,
        });

        assert!(applied);
        assert_eq!(state.matched_address_id, Some(9));
        assert_eq!(state.unmatch_reason, None);
    }

    #[test]
    fn test_matched_state_is_never_overwritten() {
        let mut state = TransactionMatchState::new(1, "x");
        state.apply(&MatchUpdate::Matched {
            transaction_id: 1,
            address_id: 9,
            match_type: MatchType::Exact,
            confidence: 1.0,
        });

        let refused = !state.apply(&MatchUpdate::Matched {
            transaction_id: 1,
            address_id: 10,
            match_type: MatchType::Fuzzy,
            confidence: 0.8,
        });
        assert!(refused);
        assert!(!state.apply(&MatchUpdate::Unmatched {
            transaction_id: 1,
            reason: REASON_NO_MATCH.into(),
        }));
        assert_eq!(state.matched_address_id, Some(9));
        assert_eq!(state.match_type, Some(MatchType::Exact));
    }

    #[test]
    fn test_eligibility_requires_non_empty_normalized() {
        let mut state = TransactionMatchState::new(3, "");
        assert!(!state.is_eligible());
        state.normalized_address = Some(String::new());
        assert!(!state.is_eligible());
        state.normalized_address = Some("1 A ST".into());
        assert!(state.is_eligible());
    }
}
