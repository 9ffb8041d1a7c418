// 🗄️ Persistence collaborator contract + in-memory implementation
//
// The waterfall only talks to storage through `MatchStore`. Every batch
// write is all-or-nothing, and match writes never touch a transaction that
// is already matched.

use crate::corpus::{CanonicalAddressRecord, CanonicalKeyUpdate};
use crate::error::{MatchError, Result};
use crate::matching::{MatchType, MatchUpdate, TransactionMatchState, REASON_EMPTY_NORMALIZED};
use crate::normalizer::{collapse_upper, ParseOutcome, ParseStrategy, ParsedAddress};
use crate::waterfall::RunReport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// PARSE STAGE TYPES
// ============================================================================

/// Transaction not yet run through the normalizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub transaction_id: i64,
    pub raw_address: String,
}

/// Normalizer result for one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseUpdate {
    pub transaction_id: i64,
    pub parsed: Option<ParsedAddress>,
    pub strategy: Option<ParseStrategy>,
    /// Set for empty, unparseable or empty-normalized input
    pub unmatch_reason: Option<String>,
}

impl ParseUpdate {
    pub fn from_outcome(transaction_id: i64, raw_address: &str, outcome: ParseOutcome) -> Self {
        if raw_address.trim().is_empty() {
            return Self::failed(transaction_id, MatchError::EmptyAddress);
        }

        let strategy = outcome.strategy();
        match outcome.into_address() {
            None => Self::failed(transaction_id, MatchError::ParseFailure(raw_address.to_string())),
            Some(parsed) => {
                let unmatch_reason = parsed
                    .normalized_address
                    .is_empty()
                    .then(|| REASON_EMPTY_NORMALIZED.to_string());
                ParseUpdate {
                    transaction_id,
                    parsed: Some(parsed),
                    strategy,
                    unmatch_reason,
                }
            }
        }
    }

    fn failed(transaction_id: i64, error: MatchError) -> Self {
        ParseUpdate {
            transaction_id,
            parsed: None,
            strategy: None,
            unmatch_reason: error.unmatch_reason().map(str::to_string),
        }
    }

    pub fn normalized_address(&self) -> Option<&str> {
        self.parsed.as_ref().map(|p| p.normalized_address.as_str())
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

pub trait MatchStore {
    /// Every canonical record, ascending by address_id
    fn load_canonical(&self) -> Result<Vec<CanonicalAddressRecord>>;

    /// Canonical records with address_id > `after_id`, ascending, at most `limit`
    fn canonical_page(&self, after_id: i64, limit: usize) -> Result<Vec<CanonicalAddressRecord>>;

    /// Persist computed prefixes and keys; all or nothing
    fn upsert_canonical_keys(&mut self, updates: &[CanonicalKeyUpdate]) -> Result<usize>;

    /// Transactions never parsed, with id > `after_id`, ascending
    fn select_unparsed(&self, after_id: i64, limit: usize) -> Result<Vec<PendingTransaction>>;

    fn apply_parse_results(&mut self, updates: &[ParseUpdate]) -> Result<usize>;

    /// Clear reasons left by a previous run on unmatched, matchable transactions
    fn reset_stage_reasons(&mut self) -> Result<usize>;

    /// Unmatched transactions with a non-empty normalized address, id > `after_id`, ascending
    fn select_unmatched(&self, after_id: i64, limit: usize) -> Result<Vec<TransactionMatchState>>;

    /// Apply stage proposals; all or nothing, matched rows are skipped
    fn apply_match_updates(&mut self, updates: &[MatchUpdate]) -> Result<usize>;

    /// Stamp `reason` on every unmatched transaction that has none
    fn finalize_unmatched(&mut self, reason: &str) -> Result<usize>;

    fn all_transactions(&self) -> Result<Vec<TransactionMatchState>>;

    /// Audit hook, no-op unless the store keeps a run log
    fn record_run(&mut self, _report: &RunReport) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// MEMORY STORE
// ============================================================================

#[derive(Debug, Clone)]
struct StoredTransaction {
    state: TransactionMatchState,
    parsed: Option<ParsedAddress>,
    strategy: Option<ParseStrategy>,
    parse_done: bool,
}

/// BTreeMap-backed store for tests and one-shot lookups
#[derive(Debug, Default)]
pub struct MemoryStore {
    canonical: BTreeMap<i64, CanonicalAddressRecord>,
    transactions: BTreeMap<i64, StoredTransaction>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the text of a canonical address (keys kept until rebuilt)
    pub fn add_canonical(&mut self, address_id: i64, address: &str) {
        let address = collapse_upper(address);
        self.canonical
            .entry(address_id)
            .and_modify(|record| record.address = address.clone())
            .or_insert_with(|| CanonicalAddressRecord::new(address_id, &address));
    }

    /// Returns false when the id already exists
    pub fn add_transaction(&mut self, transaction_id: i64, raw_address: &str) -> bool {
        if self.transactions.contains_key(&transaction_id) {
            return false;
        }
        self.transactions.insert(
            transaction_id,
            StoredTransaction {
                state: TransactionMatchState::new(transaction_id, raw_address),
                parsed: None,
                strategy: None,
                parse_done: false,
            },
        );
        true
    }

    pub fn transaction(&self, transaction_id: i64) -> Option<&TransactionMatchState> {
        self.transactions.get(&transaction_id).map(|t| &t.state)
    }

    /// Components and strategy recorded by the parse stage
    pub fn parsed_components(&self, transaction_id: i64) -> Option<(&ParsedAddress, &ParseStrategy)> {
        let stored = self.transactions.get(&transaction_id)?;
        Some((stored.parsed.as_ref()?, stored.strategy.as_ref()?))
    }
}

impl MatchStore for MemoryStore {
    fn load_canonical(&self) -> Result<Vec<CanonicalAddressRecord>> {
        Ok(self.canonical.values().cloned().collect())
    }

    fn canonical_page(&self, after_id: i64, limit: usize) -> Result<Vec<CanonicalAddressRecord>> {
        Ok(self
            .canonical
            .range(after_id.saturating_add(1)..)
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn upsert_canonical_keys(&mut self, updates: &[CanonicalKeyUpdate]) -> Result<usize> {
        if let Some(missing) = updates.iter().find(|u| !self.canonical.contains_key(&u.address_id)) {
            return Err(MatchError::UnknownCanonical(missing.address_id));
        }

        for update in updates {
            if let Some(record) = self.canonical.get_mut(&update.address_id) {
                update.apply_to(record);
            }
        }
        Ok(updates.len())
    }

    fn select_unparsed(&self, after_id: i64, limit: usize) -> Result<Vec<PendingTransaction>> {
        Ok(self
            .transactions
            .range(after_id.saturating_add(1)..)
            .filter(|(_, t)| !t.parse_done)
            .take(limit)
            .map(|(&transaction_id, t)| PendingTransaction {
                transaction_id,
                raw_address: t.state.raw_address.clone(),
            })
            .collect())
    }

    fn apply_parse_results(&mut self, updates: &[ParseUpdate]) -> Result<usize> {
        let mut applied = 0;
        for update in updates {
            let Some(stored) = self.transactions.get_mut(&update.transaction_id) else {
                continue;
            };
            stored.state.normalized_address = update.normalized_address().map(str::to_string);
            stored.parsed = update.parsed.clone();
            stored.strategy = update.strategy.clone();
            if let (Some(reason), false) = (&update.unmatch_reason, stored.state.is_matched()) {
                stored.state.unmatch_reason = Some(reason.clone());
                stored.state.match_type = Some(MatchType::Unmatched);
            }
            stored.parse_done = true;
            applied += 1;
        }
        Ok(applied)
    }

    fn reset_stage_reasons(&mut self) -> Result<usize> {
        let mut reset = 0;
        for stored in self.transactions.values_mut() {
            let state = &mut stored.state;
            if state.is_eligible() && (state.unmatch_reason.is_some() || state.match_type.is_some()) {
                state.unmatch_reason = None;
                state.match_type = None;
                reset += 1;
            }
        }
        Ok(reset)
    }

    fn select_unmatched(&self, after_id: i64, limit: usize) -> Result<Vec<TransactionMatchState>> {
        Ok(self
            .transactions
            .range(after_id.saturating_add(1)..)
            .map(|(_, t)| &t.state)
            .filter(|state| state.is_eligible())
            .take(limit)
            .cloned()
            .collect())
    }

    fn apply_match_updates(&mut self, updates: &[MatchUpdate]) -> Result<usize> {
        let mut applied = 0;
        for update in updates {
            if let Some(stored) = self.transactions.get_mut(&update.transaction_id()) {
                if stored.state.apply(update) {
                    applied += 1;
                }
            }
        }
        Ok(applied)
    }

    fn finalize_unmatched(&mut self, reason: &str) -> Result<usize> {
        let mut stamped = 0;
        for stored in self.transactions.values_mut() {
            let state = &mut stored.state;
            if !state.is_matched() && state.unmatch_reason.is_none() {
                state.unmatch_reason = Some(reason.to_string());
                state.match_type = Some(MatchType::Unmatched);
                stamped += 1;
            }
        }
        Ok(stamped)
    }

    fn all_transactions(&self) -> Result<Vec<TransactionMatchState>> {
        Ok(self.transactions.values().map(|t| t.state.clone()).collect())
    }
}
