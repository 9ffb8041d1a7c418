// 🔊 Stage 3 - Phonetic Fallback Matcher
//
// Candidates are the union of the Metaphone, Soundex and NYSIIS buckets for
// the transaction's keys. The edit-similarity ratio only picks the winner;
// an accepted match always carries the configured fixed confidence.

use super::{MatchType, MatchUpdate, StageMatcher, TransactionMatchState, REASON_NO_PHONETIC_KEYS};
use crate::config::MatchConfig;
use crate::corpus::CorpusLookup;
use crate::phonetic::PhoneticKeyGenerator;
use crate::similarity::edit_ratio;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub struct PhoneticMatcher {
    confidence: f64,
    /// 0-100 scale
    tiebreak_threshold: f64,
    generator: Arc<PhoneticKeyGenerator>,
}

impl PhoneticMatcher {
    pub fn new(confidence: f64, tiebreak_threshold: f64, generator: Arc<PhoneticKeyGenerator>) -> Self {
        PhoneticMatcher {
            confidence,
            tiebreak_threshold,
            generator,
        }
    }

    pub fn from_config(config: &MatchConfig, generator: Arc<PhoneticKeyGenerator>) -> Self {
        Self::new(config.phonetic_confidence, config.phonetic_tiebreak_threshold, generator)
    }

    /// Candidate addresses sharing any non-empty key, de-duplicated by id
    pub fn candidates<'a>(&self, index: &'a dyn CorpusLookup, normalized: &str) -> BTreeMap<i64, &'a str> {
        let keys = self.generator.keys(normalized);
        let mut out = BTreeMap::new();

        let buckets = [
            (!keys.metaphone.is_empty()).then(|| index.by_metaphone(&keys.metaphone)),
            (!keys.soundex.is_empty()).then(|| index.by_soundex(&keys.soundex)),
            (!keys.nysiis.is_empty()).then(|| index.by_nysiis(&keys.nysiis)),
        ];
        for record in buckets.into_iter().flatten().flatten() {
            out.entry(record.address_id).or_insert(record.address.as_str());
        }

        out
    }

    /// Best (address_id, ratio) among the candidates; ties go to the lower id
    pub fn best_candidate(&self, index: &dyn CorpusLookup, normalized: &str) -> Option<(i64, f64)> {
        let mut best: Option<(i64, f64)> = None;

        // BTreeMap iterates ids ascending, so strict > keeps the lowest id on ties
        for (address_id, address) in self.candidates(index, normalized) {
            let ratio = edit_ratio(normalized, address);
            if best.map_or(true, |(_, current)| ratio > current) {
                best = Some((address_id, ratio));
            }
        }

        best
    }
}

impl StageMatcher for PhoneticMatcher {
    fn match_type(&self) -> MatchType {
        MatchType::Phonetic
    }

    fn match_one(&self, index: &dyn CorpusLookup, tx: &TransactionMatchState) -> Option<MatchUpdate> {
        let normalized = tx.normalized()?;

        if !index.has_phonetic_keys() {
            return Some(MatchUpdate::Unmatched {
                transaction_id: tx.transaction_id,
                reason: REASON_NO_PHONETIC_KEYS.to_string(),
            });
        }

        let (address_id, ratio) = self.best_candidate(index, normalized)?;
        if ratio < self.tiebreak_threshold {
            debug!(transaction_id = tx.transaction_id, best = ratio, "phonetic best below tiebreak");
            return None;
        }

        debug!(transaction_id = tx.transaction_id, address_id, ratio, "phonetic hit");
        Some(MatchUpdate::Matched {
            transaction_id: tx.transaction_id,
            address_id,
            match_type: MatchType::Phonetic,
            confidence: self.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{CanonicalAddressRecord, CorpusIndex};

    fn matcher() -> (PhoneticMatcher, Arc<PhoneticKeyGenerator>) {
        let generator = Arc::new(PhoneticKeyGenerator::new(32));
        (PhoneticMatcher::from_config(&MatchConfig::default(), generator.clone()), generator)
    }

    fn tx(id: i64, normalized: &str) -> TransactionMatchState {
        let mut state = TransactionMatchState::new(id, normalized);
        state.normalized_address = Some(normalized.to_string());
        state
    }

    #[test]
    fn test_sound_alike_matches_with_fixed_confidence() {
        let (matcher, generator) = matcher();
        let index = CorpusIndex::from_addresses(vec![(1, "12 SMITH ST")], &generator, 10);

        // Ratio is about 87, confidence stays at the configured 0.6
        let (_, ratio) = matcher.best_candidate(&index, "12 SMYTHE ST").unwrap();
        assert!(ratio >= 70.0 && ratio < 100.0);

        let update = matcher.match_one(&index, &tx(3, "12 SMYTHE ST")).unwrap();
        assert_eq!(
            update,
            MatchUpdate::Matched {
                transaction_id: 3,
                address_id: 1,
                match_type: MatchType::Phonetic,
                confidence: 0.6,
            }
        );
    }

    #[test]
    fn test_best_ratio_wins_among_candidates() {
        let (matcher, generator) = matcher();
        let index = CorpusIndex::from_addresses(vec![(1, "12 SMITH ST"), (2, "12 SMITHE ST")], &generator, 10);

        let (address_id, _) = matcher.best_candidate(&index, "12 SMYTHE ST").unwrap();
        assert_eq!(address_id, 2);
    }

    #[test]
    fn test_equal_ratios_pick_lowest_id() {
        let (matcher, generator) = matcher();
        let index = CorpusIndex::from_addresses(vec![(8, "12 SMITH ST"), (3, "12 SMITH ST")], &generator, 10);
        assert_eq!(matcher.best_candidate(&index, "12 SMYTH ST").map(|(id, _)| id), Some(3));
    }

    #[test]
    fn test_low_ratio_is_rejected() {
        let (matcher, generator) = matcher();
        let index = CorpusIndex::from_addresses(vec![(1, "1234 SMYTHE STREETS")], &generator, 10);

        assert!(!matcher.candidates(&index, "5 SMITH ST").is_empty());
        assert_eq!(matcher.match_one(&index, &tx(1, "5 SMITH ST")), None);
    }

    #[test]
    fn test_unbuilt_index_reports_distinct_reason() {
        let (matcher, _) = matcher();
        let index = CorpusIndex::build(vec![CanonicalAddressRecord::new(1, "12 SMITH ST")], 10);

        let update = matcher.match_one(&index, &tx(4, "12 SMYTHE ST")).unwrap();
        assert_eq!(
            update,
            MatchUpdate::Unmatched {
                transaction_id: 4,
                reason: REASON_NO_PHONETIC_KEYS.to_string(),
            }
        );
    }
}
