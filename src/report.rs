// 📊 CSV exports of match results

use crate::error::Result;
use crate::matching::TransactionMatchState;
use serde::Serialize;
use std::path::Path;

pub const FINAL_OUTPUT_FILE: &str = "final_output.csv";
pub const UNMATCHED_REPORT_FILE: &str = "unmatched_report.csv";

#[derive(Debug, Serialize)]
struct FinalOutputRow<'a> {
    transaction_id: i64,
    matched_address_id: Option<i64>,
    confidence_score: Option<f64>,
    match_type: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct UnmatchedRow<'a> {
    transaction_id: i64,
    raw_address: &'a str,
    unmatch_reason: Option<&'a str>,
}

/// One row per transaction; returns rows written
pub fn write_final_output(path: &Path, rows: &[TransactionMatchState]) -> Result<usize> {
    let mut writer = csv::Writer::from_path(path)?;
    for tx in rows {
        writer.serialize(FinalOutputRow {
            transaction_id: tx.transaction_id,
            matched_address_id: tx.matched_address_id,
            confidence_score: tx.confidence_score,
            match_type: tx.match_type.as_ref().map(|m| m.as_str()),
        })?;
    }
    writer.flush()?;
    Ok(rows.len())
}

/// Unmatched transactions only; returns rows written
pub fn write_unmatched_report(path: &Path, rows: &[TransactionMatchState]) -> Result<usize> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut written = 0;
    for tx in rows.iter().filter(|tx| !tx.is_matched()) {
        writer.serialize(UnmatchedRow {
            transaction_id: tx.transaction_id,
            raw_address: &tx.raw_address,
            unmatch_reason: tx.unmatch_reason.as_deref(),
        })?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

/// Both reports into `dir`, created if missing
pub fn write_reports(dir: &Path, rows: &[TransactionMatchState]) -> Result<(usize, usize)> {
    std::fs::create_dir_all(dir)?;
    let final_rows = write_final_output(&dir.join(FINAL_OUTPUT_FILE), rows)?;
    let unmatched_rows = write_unmatched_report(&dir.join(UNMATCHED_REPORT_FILE), rows)?;
    Ok((final_rows, unmatched_rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::{MatchType, MatchUpdate, REASON_NO_MATCH};

    fn rows() -> Vec<TransactionMatchState> {
        let mut matched = TransactionMatchState::new(1, "123 Main St");
        matched.apply(&MatchUpdate::Matched {
            transaction_id: 1,
            address_id: 7,
            match_type: MatchType::Exact,
            confidence: 1.0,
        });

        let mut unmatched = TransactionMatchState::new(2, "999 Nowhere, Blvd");
        unmatched.apply(&MatchUpdate::Unmatched {
            transaction_id: 2,
            reason: REASON_NO_MATCH.to_string(),
        });

        vec![matched, unmatched]
    }

    #[test]
    fn test_write_reports() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("reports");

        let (final_rows, unmatched_rows) = write_reports(&out, &rows()).unwrap();
        assert_eq!(final_rows, 2);
        assert_eq!(unmatched_rows, 1);

        let final_csv = std::fs::read_to_string(out.join(FINAL_OUTPUT_FILE)).unwrap();
        let mut lines = final_csv.lines();
        assert_eq!(
            lines.next(),
            Some("transaction_id,matched_address_id,confidence_score,match_type")
        );
        assert_eq!(lines.next(), Some("1,7,1.0,exact"));
        assert_eq!(lines.next(), Some("2,,,unmatched"));

        let mut rdr = csv::Reader::from_path(out.join(UNMATCHED_REPORT_FILE)).unwrap();
        let records: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(&records[0][0], "2");
        assert_eq!(&records[0][1], "999 Nowhere, Blvd");
        assert_eq!(&records[0][2], REASON_NO_MATCH);

        println!("✅ Report export test PASSED");
    }
}
