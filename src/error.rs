// ⚠️ Error taxonomy for the matching engine
//
// Per-transaction failures (parse, empty, index) become unmatch reasons.
// Storage and IO failures abort the run and surface to the caller.

use crate::matching::{REASON_EMPTY_ADDRESS, REASON_FAILED_PARSE, REASON_NO_PHONETIC_KEYS};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatchError {
    /// Raw address could not be parsed into components
    #[error("failed parse: {0}")]
    ParseFailure(String),

    /// No text to match
    #[error("empty address")]
    EmptyAddress,

    /// Corpus lacks the keys a stage needs
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// Key update addressed a canonical record the store does not hold
    #[error("canonical address {0} does not exist")]
    UnknownCanonical(i64),

    /// Storage collaborator failed during read or write
    #[error("persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Config(String),
}

impl MatchError {
    /// Terminal reason to store on the transaction, for per-transaction errors
    pub fn unmatch_reason(&self) -> Option<&'static str> {
        match self {
            MatchError::EmptyAddress => Some(REASON_EMPTY_ADDRESS),
            MatchError::ParseFailure(_) => Some(REASON_FAILED_PARSE),
            MatchError::IndexUnavailable(_) => Some(REASON_NO_PHONETIC_KEYS),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons_for_per_transaction_errors() {
        assert_eq!(MatchError::EmptyAddress.unmatch_reason(), Some("empty address"));
        assert_eq!(MatchError::ParseFailure("x".into()).unmatch_reason(), Some("failed parse"));
        assert_eq!(
            MatchError::IndexUnavailable("phonetic".into()).unmatch_reason(),
            Some("no phonetic match (no canonical keys)")
        );
        // Store failures are never attributed to a transaction
        assert_eq!(MatchError::UnknownCanonical(7).unmatch_reason(), None);
        assert_eq!(MatchError::Persistence(rusqlite::Error::QueryReturnedNoRows).unmatch_reason(), None);
        assert_eq!(MatchError::Config("bad".into()).unmatch_reason(), None);
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(MatchError::EmptyAddress.to_string(), "empty address");
        assert_eq!(
            MatchError::ParseFailure("no text".into()).to_string(),
            "failed parse: no text"
        );
    }
}
