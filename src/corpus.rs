// 📚 Canonical Corpus Index
//
// Holds the canonical address set with blocking prefixes and phonetic keys.
// Keys are computed once per address text: each record remembers a SHA-256
// fingerprint of the text its keys came from, and only records whose
// fingerprint is missing or stale are recomputed.

use crate::error::Result;
use crate::phonetic::{PhoneticKeyGenerator, PhoneticKeys};
use crate::store::MatchStore;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, info};

// ============================================================================
// CANONICAL RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalAddressRecord {
    /// Unique, stable
    pub address_id: i64,

    /// Normalized address text
    pub address: String,

    pub blocking_prefix: Option<String>,

    pub keys: Option<PhoneticKeys>,

    /// Fingerprint of the address text the prefix and keys were computed from
    pub key_fingerprint: Option<String>,
}

impl CanonicalAddressRecord {
    pub fn new(address_id: i64, address: &str) -> Self {
        CanonicalAddressRecord {
            address_id,
            address: address.to_string(),
            blocking_prefix: None,
            keys: None,
            key_fingerprint: None,
        }
    }

    /// True when prefix or keys are absent, or were computed from other text
    pub fn needs_keys(&self) -> bool {
        self.blocking_prefix.is_none()
            || self.keys.is_none()
            || self.key_fingerprint.as_deref() != Some(address_fingerprint(&self.address).as_str())
    }

    pub fn has_phonetic_keys(&self) -> bool {
        self.keys.as_ref().is_some_and(|k| !k.is_empty())
    }
}

/// Hex SHA-256 of the address text
pub fn address_fingerprint(address: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(address.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// First `len` characters of a normalized address
pub fn blocking_prefix(normalized: &str, len: usize) -> String {
    normalized.chars().take(len).collect()
}

/// Computed keys for one record, written back to storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalKeyUpdate {
    pub address_id: i64,
    pub blocking_prefix: String,
    pub keys: PhoneticKeys,
    pub key_fingerprint: String,
}

impl CanonicalKeyUpdate {
    pub fn compute(record: &CanonicalAddressRecord, generator: &PhoneticKeyGenerator, prefix_len: usize) -> Self {
        CanonicalKeyUpdate {
            address_id: record.address_id,
            blocking_prefix: blocking_prefix(&record.address, prefix_len),
            keys: generator.keys(&record.address),
            key_fingerprint: address_fingerprint(&record.address),
        }
    }

    pub fn apply_to(&self, record: &mut CanonicalAddressRecord) {
        record.blocking_prefix = Some(self.blocking_prefix.clone());
        record.keys = Some(self.keys.clone());
        record.key_fingerprint = Some(self.key_fingerprint.clone());
    }
}

// ============================================================================
// INDEX BUILD ("ensure" semantics)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexBuildStats {
    /// Records scanned
    pub scanned: usize,
    /// Records whose keys were (re)computed and persisted
    pub computed: usize,
    pub batches: usize,
}

impl IndexBuildStats {
    pub fn summary(&self) -> String {
        format!(
            "index: scanned {}, computed {} ({} batches)",
            self.scanned, self.computed, self.batches
        )
    }
}

/// Populate prefix + phonetic keys for every record lacking them, in batches
///
/// Idempotent: a second call on an unchanged corpus computes nothing.
pub fn ensure_corpus_keys<S: MatchStore + ?Sized>(
    store: &mut S,
    generator: &PhoneticKeyGenerator,
    prefix_len: usize,
    batch_size: usize,
) -> Result<IndexBuildStats> {
    let mut stats = IndexBuildStats::default();
    let mut after_id = i64::MIN;

    loop {
        let page = store.canonical_page(after_id, batch_size)?;
        let last = match page.last() {
            Some(record) => record.address_id,
            None => break,
        };

        let updates: Vec<CanonicalKeyUpdate> = page
            .par_iter()
            .filter(|record| record.needs_keys())
            .map(|record| CanonicalKeyUpdate::compute(record, generator, prefix_len))
            .collect();

        if !updates.is_empty() {
            store.upsert_canonical_keys(&updates)?;
        }

        stats.scanned += page.len();
        stats.computed += updates.len();
        stats.batches += 1;
        after_id = last;

        debug!(batch = stats.batches, computed = updates.len(), "canonical key batch committed");
    }

    info!(scanned = stats.scanned, computed = stats.computed, "canonical keys ensured");
    Ok(stats)
}

// ============================================================================
// LOOKUP ABSTRACTION
// ============================================================================

/// Read-only view of the corpus used by the matching stages
///
/// Every lookup returns records in ascending `address_id` order.
pub trait CorpusLookup: Sync {
    fn prefix_len(&self) -> usize;
    fn by_address(&self, normalized: &str) -> Vec<&CanonicalAddressRecord>;
    fn by_prefix(&self, prefix: &str) -> Vec<&CanonicalAddressRecord>;
    fn by_metaphone(&self, key: &str) -> Vec<&CanonicalAddressRecord>;
    fn by_soundex(&self, key: &str) -> Vec<&CanonicalAddressRecord>;
    fn by_nysiis(&self, key: &str) -> Vec<&CanonicalAddressRecord>;
    /// False when no record has any phonetic key (index never built)
    fn has_phonetic_keys(&self) -> bool;
}

// ============================================================================
// CORPUS INDEX
// ============================================================================

#[derive(Debug, Default)]
pub struct CorpusIndex {
    /// Sorted by address_id
    records: Vec<CanonicalAddressRecord>,
    by_address: HashMap<String, Vec<usize>>,
    by_prefix: HashMap<String, Vec<usize>>,
    by_metaphone: HashMap<String, Vec<usize>>,
    by_soundex: HashMap<String, Vec<usize>>,
    by_nysiis: HashMap<String, Vec<usize>>,
    prefix_len: usize,
    keyed_records: usize,
}

impl CorpusIndex {
    /// Build lookup tables from stored records
    ///
    /// Phonetic tables only contain keys that were stored for the current
    /// address text, so an unbuilt or stale corpus is visible through
    /// `has_phonetic_keys`.
    pub fn build(mut records: Vec<CanonicalAddressRecord>, prefix_len: usize) -> Self {
        records.sort_by_key(|r| r.address_id);
        records.dedup_by_key(|r| r.address_id);

        let mut index = CorpusIndex {
            prefix_len,
            ..Default::default()
        };

        for (pos, record) in records.iter().enumerate() {
            index.by_address.entry(record.address.clone()).or_default().push(pos);
            let fresh = !record.needs_keys();

            // Stored prefix is reused only when fresh and built with the same length
            let expected_len = record.address.chars().count().min(prefix_len);
            let prefix = match &record.blocking_prefix {
                Some(p) if fresh && p.chars().count() == expected_len => p.clone(),
                _ => blocking_prefix(&record.address, prefix_len),
            };
            index.by_prefix.entry(prefix).or_default().push(pos);

            if let Some(keys) = record.keys.as_ref().filter(|_| fresh) {
                if !keys.is_empty() {
                    index.keyed_records += 1;
                }
                for (table, key) in [
                    (&mut index.by_metaphone, &keys.metaphone),
                    (&mut index.by_soundex, &keys.soundex),
                    (&mut index.by_nysiis, &keys.nysiis),
                ] {
                    if !key.is_empty() {
                        table.entry(key.clone()).or_default().push(pos);
                    }
                }
            }
        }

        index.records = records;
        index
    }

    /// Build from plain (id, address) pairs, computing every key up front
    pub fn from_addresses<'a, I>(addresses: I, generator: &PhoneticKeyGenerator, prefix_len: usize) -> Self
    where
        I: IntoIterator<Item = (i64, &'a str)>,
    {
        let records = addresses
            .into_iter()
            .map(|(id, address)| {
                let mut record = CanonicalAddressRecord::new(id, address);
                CanonicalKeyUpdate::compute(&record, generator, prefix_len).apply_to(&mut record);
                record
            })
            .collect();
        Self::build(records, prefix_len)
    }

    /// Load every canonical record from storage
    pub fn load<S: MatchStore + ?Sized>(store: &S, prefix_len: usize) -> Result<Self> {
        let records = store.load_canonical()?;
        let index = Self::build(records, prefix_len);
        info!(
            records = index.len(),
            keyed = index.keyed_records,
            prefixes = index.by_prefix.len(),
            "corpus index loaded"
        );
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keyed_records(&self) -> usize {
        self.keyed_records
    }

    pub fn get(&self, address_id: i64) -> Option<&CanonicalAddressRecord> {
        self.records
            .binary_search_by_key(&address_id, |r| r.address_id)
            .ok()
            .map(|pos| &self.records[pos])
    }

    fn resolve(&self, table: &HashMap<String, Vec<usize>>, key: &str) -> Vec<&CanonicalAddressRecord> {
        table
            .get(key)
            .map(|positions| positions.iter().map(|&p| &self.records[p]).collect())
            .unwrap_or_default()
    }
}

impl CorpusLookup for CorpusIndex {
    fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    fn by_address(&self, normalized: &str) -> Vec<&CanonicalAddressRecord> {
        self.resolve(&self.by_address, normalized)
    }

    fn by_prefix(&self, prefix: &str) -> Vec<&CanonicalAddressRecord> {
        self.resolve(&self.by_prefix, prefix)
    }

    fn by_metaphone(&self, key: &str) -> Vec<&CanonicalAddressRecord> {
        self.resolve(&self.by_metaphone, key)
    }

    fn by_soundex(&self, key: &str) -> Vec<&CanonicalAddressRecord> {
        self.resolve(&self.by_soundex, key)
    }

    fn by_nysiis(&self, key: &str) -> Vec<&CanonicalAddressRecord> {
        self.resolve(&self.by_nysiis, key)
    }

    fn has_phonetic_keys(&self) -> bool {
        self.keyed_records > 0
    }
}
