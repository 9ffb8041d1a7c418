// Address Match - Core Library
// Normalization + exact → fuzzy → phonetic matching waterfall, used by the
// CLI, the lookup server and tests

pub mod config;
pub mod error;
pub mod normalizer;     // Raw text → parsed components → normalized key
pub mod phonetic;       // Metaphone / Soundex / NYSIIS keys
pub mod similarity;     // Trigram, word and edit similarity
pub mod corpus;         // Canonical Corpus Index
pub mod matching;       // Stage matchers + match state
pub mod store;          // Persistence contract + in-memory store
pub mod db;             // SQLite store, CSV ingest, audit events
pub mod waterfall;      // Stage sequencing, runs, single lookups
pub mod report;         // CSV exports

// Re-export commonly used types
pub use config::MatchConfig;
pub use error::{MatchError, Result};
pub use normalizer::{
    parse_address, Normalizer, ParseOutcome, ParseStrategy, ParsedAddress,
};
pub use phonetic::{compute_keys, PhoneticKeyGenerator, PhoneticKeys};
pub use similarity::{combined_similarity, edit_ratio, trigram_similarity, word_similarity};
pub use corpus::{
    ensure_corpus_keys, CanonicalAddressRecord, CanonicalKeyUpdate, CorpusIndex, CorpusLookup,
    IndexBuildStats,
};
pub use matching::{
    ExactMatcher, FuzzyMatcher, MatchType, MatchUpdate, PhoneticMatcher, StageMatcher,
    StageReport, TransactionMatchState,
};
pub use store::{MatchStore, MemoryStore, ParseUpdate, PendingTransaction};
pub use db::{
    insert_event, load_canonical_csv, load_transactions_csv, setup_database,
    CanonicalAddressRow, Event, IngestCounts, SqliteStore, TransactionRow,
};
pub use waterfall::{LookupMatch, LookupResponse, ParseReport, RunReport, Waterfall};
pub use report::{write_final_output, write_reports, write_unmatched_report};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
