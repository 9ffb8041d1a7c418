// 🌊 Waterfall Controller
//
// parse → ensure index → exact → fuzzy → phonetic → finalize
//
// Each stage pages through still-unmatched transactions by id. Inside a
// chunk, transactions are matched in parallel against the read-only index;
// the chunk's proposals are committed in one store call before the next
// chunk is read. A stage starts only after the previous one fully committed.

use crate::config::MatchConfig;
use crate::corpus::{ensure_corpus_keys, CorpusIndex, CorpusLookup, IndexBuildStats};
use crate::error::Result;
use crate::matching::{
    ExactMatcher, FuzzyMatcher, MatchType, MatchUpdate, PhoneticMatcher, StageMatcher, StageReport,
    TransactionMatchState, REASON_NO_MATCH,
};
use crate::normalizer::{Normalizer, ParseStrategy, ParsedAddress};
use crate::phonetic::PhoneticKeyGenerator;
use crate::store::{MatchStore, ParseUpdate};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseReport {
    pub parsed: usize,
    /// Transactions that got a parse-level unmatch reason
    pub unparseable: usize,
    pub chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub parsed: ParseReport,
    pub index: IndexBuildStats,
    /// Stale stage reasons cleared before matching
    pub reset: usize,
    pub exact: StageReport,
    pub fuzzy: StageReport,
    pub phonetic: StageReport,
    /// Transactions stamped with the generic terminal reason
    pub finalized: usize,
}

impl RunReport {
    pub fn total_matched(&self) -> usize {
        self.exact.matched + self.fuzzy.matched + self.phonetic.matched
    }
}

// ============================================================================
// LOOKUP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupMatch {
    pub address_id: i64,
    pub canonical_address: String,
    pub match_type: MatchType,
    pub confidence_score: f64,
}

/// Result of matching one address outside a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupResponse {
    pub raw_address: String,
    pub normalized_address: Option<String>,
    pub parsed: Option<ParsedAddress>,
    pub strategy: Option<ParseStrategy>,
    #[serde(rename = "match")]
    pub matched: Option<LookupMatch>,
    pub unmatch_reason: Option<String>,
}

impl LookupResponse {
    /// Parse succeeded (normalized text may still be empty)
    pub fn parse_ok(&self) -> bool {
        self.parsed.is_some()
    }
}

// ============================================================================
// WATERFALL
// ============================================================================

pub struct Waterfall {
    config: MatchConfig,
    normalizer: Normalizer,
    generator: Arc<PhoneticKeyGenerator>,
    exact: ExactMatcher,
    fuzzy: FuzzyMatcher,
    phonetic: PhoneticMatcher,
}

impl Waterfall {
    pub fn new(config: MatchConfig) -> Result<Self> {
        config.validate()?;

        let generator = Arc::new(PhoneticKeyGenerator::new(config.phonetic_cache_capacity));
        Ok(Waterfall {
            normalizer: Normalizer::new(config.parse_cache_capacity),
            exact: ExactMatcher::new(),
            fuzzy: FuzzyMatcher::from_config(&config),
            phonetic: PhoneticMatcher::from_config(&config, generator.clone()),
            generator,
            config,
        })
    }

    /// Stages in waterfall order
    pub fn stages(&self) -> [&dyn StageMatcher; 3] {
        [&self.exact, &self.fuzzy, &self.phonetic]
    }

    // ------------------------------------------------------------------------
    // Parse stage
    // ------------------------------------------------------------------------

    /// Normalize every transaction not yet parsed
    pub fn parse_pending<S: MatchStore + ?Sized>(&self, store: &mut S) -> Result<ParseReport> {
        let mut report = ParseReport::default();
        let mut after_id = i64::MIN;

        loop {
            let pending = store.select_unparsed(after_id, self.config.chunk_size)?;
            let Some(last) = pending.last().map(|p| p.transaction_id) else {
                break;
            };

            let updates: Vec<ParseUpdate> = pending
                .par_iter()
                .map(|p| ParseUpdate::from_outcome(p.transaction_id, &p.raw_address, self.normalizer.parse(&p.raw_address)))
                .collect();

            store.apply_parse_results(&updates)?;

            report.parsed += updates.len();
            report.unparseable += updates.iter().filter(|u| u.unmatch_reason.is_some()).count();
            report.chunks += 1;
            after_id = last;
        }

        info!(parsed = report.parsed, unparseable = report.unparseable, "parse stage complete");
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Index
    // ------------------------------------------------------------------------

    pub fn ensure_index<S: MatchStore + ?Sized>(&self, store: &mut S) -> Result<IndexBuildStats> {
        ensure_corpus_keys(
            store,
            &self.generator,
            self.config.prefix_len,
            self.config.index_batch_size,
        )
    }

    pub fn load_index<S: MatchStore + ?Sized>(&self, store: &S) -> Result<CorpusIndex> {
        CorpusIndex::load(store, self.config.prefix_len)
    }

    // ------------------------------------------------------------------------
    // Matching stages
    // ------------------------------------------------------------------------

    /// Run one stage over every eligible transaction, chunk by chunk
    pub fn run_stage<S: MatchStore + ?Sized>(
        &self,
        store: &mut S,
        index: &dyn CorpusLookup,
        stage: &dyn StageMatcher,
    ) -> Result<StageReport> {
        let mut report = StageReport::new(stage.match_type());
        let mut after_id = i64::MIN;

        if stage.match_type() == MatchType::Phonetic && !index.has_phonetic_keys() {
            warn!("no canonical record has phonetic keys; phonetic stage cannot match");
        }

        loop {
            let chunk = store.select_unmatched(after_id, self.config.chunk_size)?;
            let Some(last) = chunk.last().map(|t| t.transaction_id) else {
                break;
            };

            let updates: Vec<MatchUpdate> = chunk
                .par_iter()
                .filter_map(|tx| stage.match_one(index, tx))
                .collect();

            // Commit before reading the next chunk; a failure aborts the run
            store.apply_match_updates(&updates)?;

            report.examined += chunk.len();
            report.matched += updates.iter().filter(|u| u.is_match()).count();
            report.reasons_set += updates.iter().filter(|u| !u.is_match()).count();
            report.chunks += 1;
            after_id = last;

            debug!(stage = %stage.match_type(), chunk = report.chunks, proposals = updates.len(), "chunk committed");
        }

        info!("{}", report.summary());
        Ok(report)
    }

    /// Exact, fuzzy, then phonetic against an already loaded index
    pub fn match_all<S: MatchStore + ?Sized>(
        &self,
        store: &mut S,
        index: &dyn CorpusLookup,
    ) -> Result<[StageReport; 3]> {
        let exact = self.run_stage(store, index, &self.exact)?;
        let fuzzy = self.run_stage(store, index, &self.fuzzy)?;
        let phonetic = self.run_stage(store, index, &self.phonetic)?;
        Ok([exact, fuzzy, phonetic])
    }

    /// Stamp the generic reason on whatever is still unresolved
    pub fn finalize<S: MatchStore + ?Sized>(&self, store: &mut S) -> Result<usize> {
        let stamped = store.finalize_unmatched(REASON_NO_MATCH)?;
        info!(stamped, "unmatched transactions finalized");
        Ok(stamped)
    }

    /// Full run: parse, ensure index, three stages, finalize, record
    pub fn run<S: MatchStore + ?Sized>(&self, store: &mut S) -> Result<RunReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(%run_id, "match run started");

        let parsed = self.parse_pending(store)?;
        let index_stats = self.ensure_index(store)?;
        let index = self.load_index(store)?;

        let reset = store.reset_stage_reasons()?;
        let [exact, fuzzy, phonetic] = self.match_all(store, &index)?;
        let finalized = self.finalize(store)?;

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            parsed,
            index: index_stats,
            reset,
            exact,
            fuzzy,
            phonetic,
            finalized,
        };
        store.record_run(&report)?;

        info!(
            run_id = %report.run_id,
            matched = report.total_matched(),
            finalized = report.finalized,
            "match run finished"
        );
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Single-address lookup
    // ------------------------------------------------------------------------

    /// Normalize and match one address with the same stages as a batch run
    pub fn lookup(&self, index: &CorpusIndex, raw_address: &str) -> LookupResponse {
        let outcome = self.normalizer.parse(raw_address);
        let parse = ParseUpdate::from_outcome(0, raw_address, outcome);

        let mut response = LookupResponse {
            raw_address: raw_address.to_string(),
            normalized_address: parse.normalized_address().map(str::to_string),
            parsed: parse.parsed.clone(),
            strategy: parse.strategy.clone(),
            matched: None,
            unmatch_reason: parse.unmatch_reason.clone(),
        };
        if response.unmatch_reason.is_some() {
            return response;
        }

        let mut state = TransactionMatchState::new(0, raw_address);
        state.normalized_address = response.normalized_address.clone();

        for stage in self.stages() {
            if let Some(update) = stage.match_one(index, &state) {
                state.apply(&update);
                break;
            }
        }

        match (state.matched_address_id, state.match_type, state.confidence_score) {
            (Some(address_id), Some(match_type), Some(confidence_score)) => {
                response.matched = Some(LookupMatch {
                    address_id,
                    canonical_address: index
                        .get(address_id)
                        .map(|r| r.address.clone())
                        .unwrap_or_default(),
                    match_type,
                    confidence_score,
                });
            }
            _ => {
                response.unmatch_reason = Some(state.unmatch_reason.unwrap_or_else(|| REASON_NO_MATCH.to_string()));
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CanonicalAddressRecord;
    use crate::matching::{REASON_EMPTY_ADDRESS, REASON_NO_PHONETIC_KEYS};
    use crate::store::MemoryStore;

    fn waterfall() -> Waterfall {
        let config = MatchConfig {
            chunk_size: 2,
            index_batch_size: 2,
            ..MatchConfig::default()
        };
        Waterfall::new(config).unwrap()
    }

    fn seeded_store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.add_canonical(1, "123 MAIN ST");
        store.add_canonical(2, "12 SMITH ST");
        store.add_canonical(3, "45 LEXINGTON");

        store.add_transaction(10, "123 Main Street");
        store.add_transaction(11, "123 Main Stt");
        store.add_transaction(12, "12 Smythe St");
        store.add_transaction(13, "999 Nowhere Blvd");
        store.add_transaction(14, "   ");
        store.add_transaction(15, "45 Lexington Boulevard");
        store
    }

    #[test]
    fn test_full_run_assigns_each_stage() {
        let wf = waterfall();
        let mut store = seeded_store();
        let report = wf.run(&mut store).unwrap();

        let exact = store.transaction(10).unwrap();
        assert_eq!(exact.matched_address_id, Some(1));
        assert_eq!(exact.match_type, Some(MatchType::Exact));
        assert_eq!(exact.confidence_score, Some(1.0));

        let fuzzy = store.transaction(11).unwrap();
        assert_eq!(fuzzy.matched_address_id, Some(1));
        assert_eq!(fuzzy.match_type, Some(MatchType::Fuzzy));
        assert!(fuzzy.confidence_score.unwrap() >= 0.7 && fuzzy.confidence_score.unwrap() < 1.0);

        let phonetic = store.transaction(12).unwrap();
        assert_eq!(phonetic.matched_address_id, Some(2));
        assert_eq!(phonetic.match_type, Some(MatchType::Phonetic));
        assert_eq!(phonetic.confidence_score, Some(0.6));

        let nowhere = store.transaction(13).unwrap();
        assert_eq!(nowhere.matched_address_id, None);
        assert_eq!(nowhere.unmatch_reason.as_deref(), Some(REASON_NO_MATCH));

        let blank = store.transaction(14).unwrap();
        assert_eq!(blank.unmatch_reason.as_deref(), Some(REASON_EMPTY_ADDRESS));

        let boulevard = store.transaction(15).unwrap();
        assert_eq!(boulevard.matched_address_id, Some(3));

        assert_eq!(report.exact.matched, 2);
        assert_eq!(report.fuzzy.matched, 1);
        assert_eq!(report.phonetic.matched, 1);
        assert_eq!(report.finalized, 1);
        assert_eq!(report.parsed.parsed, 6);

        println!("✅ Full waterfall run test PASSED");
    }

    #[test]
    fn test_matched_and_reason_are_exclusive() {
        let wf = waterfall();
        let mut store = seeded_store();
        wf.run(&mut store).unwrap();

        for tx in store.all_transactions().unwrap() {
            assert!(tx.matched_address_id.is_none() || tx.unmatch_reason.is_none());
            assert!(tx.matched_address_id.is_some() || tx.unmatch_reason.is_some());
        }
    }

    #[test]
    fn test_run_twice_is_idempotent() {
        let wf = waterfall();
        let mut store = seeded_store();

        wf.run(&mut store).unwrap();
        let first = store.all_transactions().unwrap();

        let second_report = wf.run(&mut store).unwrap();
        let second = store.all_transactions().unwrap();

        assert_eq!(first, second);
        assert_eq!(second_report.parsed.parsed, 0);
        assert_eq!(second_report.index.computed, 0);

        println!("✅ Idempotent run test PASSED");
    }

    #[test]
    fn test_later_stages_do_not_touch_prematched() {
        let wf = waterfall();
        let mut store = seeded_store();
        wf.parse_pending(&mut store).unwrap();

        // Externally resolved before matching
        store
            .apply_match_updates(&[MatchUpdate::Matched {
                transaction_id: 11,
                address_id: 99,
                match_type: MatchType::External,
                confidence: 0.95,
            }])
            .unwrap();

        wf.ensure_index(&mut store).unwrap();
        let index = wf.load_index(&store).unwrap();
        let fuzzy = wf.run_stage(&mut store, &index, &wf.fuzzy).unwrap();
        let phonetic = wf.run_stage(&mut store, &index, &wf.phonetic).unwrap();

        let tx = store.transaction(11).unwrap();
        assert_eq!(tx.matched_address_id, Some(99));
        assert_eq!(tx.match_type, Some(MatchType::External));
        assert!(fuzzy.examined > 0 && phonetic.examined > 0);
    }

    #[test]
    fn test_unbuilt_phonetic_index_reports_reason() {
        let wf = waterfall();
        let mut store = seeded_store();
        wf.parse_pending(&mut store).unwrap();

        let index = CorpusIndex::build(
            vec![
                CanonicalAddressRecord::new(1, "123 MAIN ST"),
                CanonicalAddressRecord::new(2, "12 SMITH ST"),
            ],
            10,
        );
        let [_, _, phonetic] = wf.match_all(&mut store, &index).unwrap();
        wf.finalize(&mut store).unwrap();

        assert!(phonetic.reasons_set > 0);
        let tx = store.transaction(12).unwrap();
        assert_eq!(tx.unmatch_reason.as_deref(), Some(REASON_NO_PHONETIC_KEYS));
        assert_eq!(tx.matched_address_id, None);
    }

    #[test]
    fn test_lookup() {
        let wf = waterfall();
        let index = CorpusIndex::from_addresses(
            vec![(1, "123 MAIN ST"), (2, "12 SMITH ST")],
            &PhoneticKeyGenerator::new(8),
            10,
        );

        let hit = wf.lookup(&index, "123 N Main Street Apt 4B, 11211");
        assert_eq!(hit.normalized_address.as_deref(), Some("123 N MAIN ST APT 4B"));
        assert_eq!(hit.strategy, Some(ParseStrategy::Tagger));

        let exact = wf.lookup(&index, "123 Main Street");
        let matched = exact.matched.unwrap();
        assert_eq!(matched.address_id, 1);
        assert_eq!(matched.canonical_address, "123 MAIN ST");
        assert_eq!(exact.unmatch_reason, None);

        let miss = wf.lookup(&index, "999 Nowhere Blvd");
        assert!(miss.matched.is_none());
        assert_eq!(miss.unmatch_reason.as_deref(), Some(REASON_NO_MATCH));

        let empty = wf.lookup(&index, "");
        assert!(!empty.parse_ok());
        assert_eq!(empty.unmatch_reason.as_deref(), Some(REASON_EMPTY_ADDRESS));
    }
}
