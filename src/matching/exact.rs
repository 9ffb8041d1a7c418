// ✅ Stage 1 - Exact Matcher
//
// String equality against the canonical normalized text. Duplicate canonical
// texts resolve to the lowest address_id.

use super::{MatchType, MatchUpdate, StageMatcher, TransactionMatchState};
use crate::corpus::CorpusLookup;
use tracing::debug;

pub const EXACT_CONFIDENCE: f64 = 1.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatcher;

impl ExactMatcher {
    pub fn new() -> Self {
        ExactMatcher
    }

    /// Lowest address_id whose normalized text equals `normalized`
    pub fn find(&self, index: &dyn CorpusLookup, normalized: &str) -> Option<i64> {
        index.by_address(normalized).iter().map(|r| r.address_id).min()
    }
}

impl StageMatcher for ExactMatcher {
    fn match_type(&self) -> MatchType {
        MatchType::Exact
    }

    fn match_one(&self, index: &dyn CorpusLookup, tx: &TransactionMatchState) -> Option<MatchUpdate> {
        let normalized = tx.normalized()?;
        let address_id = self.find(index, normalized)?;

        debug!(transaction_id = tx.transaction_id, address_id, "exact hit");
        Some(MatchUpdate::Matched {
            transaction_id: tx.transaction_id,
            address_id,
            match_type: MatchType::Exact,
            confidence: EXACT_CONFIDENCE,
        })
    }
}
