// 🏠 Address Normalizer - raw text → structured components → normalized key
//
// Two strategies, tried in order:
//   1. Tagger: token labeling (number, pre-directional, street name,
//      post-type, occupancy) in the spirit of a US address tagger
//   2. Regex: leading house number + directional / type vocabularies + "Unit X"
//
// Only ST and AVE survive as street types. Every other recognized type
// normalizes to empty: that is a product rule, not a parsing gap.

use lru::LruCache;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Mutex;

// ============================================================================
// VOCABULARIES
// ============================================================================

/// Directional words → abbreviation
const DIRECTIONALS: &[(&str, &str)] = &[
    ("N", "N"),
    ("S", "S"),
    ("E", "E"),
    ("W", "W"),
    ("NE", "NE"),
    ("NW", "NW"),
    ("SE", "SE"),
    ("SW", "SW"),
    ("NORTH", "N"),
    ("SOUTH", "S"),
    ("EAST", "E"),
    ("WEST", "W"),
    ("NORTHEAST", "NE"),
    ("NORTHWEST", "NW"),
    ("SOUTHEAST", "SE"),
    ("SOUTHWEST", "SW"),
];

/// Recognized street-type words → abbreviation
const STREET_TYPES: &[(&str, &str)] = &[
    ("STREET", "ST"),
    ("ST", "ST"),
    ("STR", "ST"),
    ("AVENUE", "AVE"),
    ("AVE", "AVE"),
    ("AV", "AVE"),
    ("BOULEVARD", "BLVD"),
    ("BLVD", "BLVD"),
    ("ROAD", "RD"),
    ("RD", "RD"),
    ("LANE", "LN"),
    ("LN", "LN"),
    ("COURT", "CT"),
    ("CT", "CT"),
    ("DRIVE", "DR"),
    ("DR", "DR"),
    ("PLACE", "PL"),
    ("PL", "PL"),
    ("WAY", "WAY"),
    ("TERRACE", "TER"),
    ("TER", "TER"),
    ("CIRCLE", "CIR"),
    ("CIR", "CIR"),
    ("PARKWAY", "PKWY"),
    ("PKWY", "PKWY"),
    ("HIGHWAY", "HWY"),
    ("HWY", "HWY"),
    ("SQUARE", "SQ"),
    ("SQ", "SQ"),
    ("PLAZA", "PLZ"),
    ("PLZ", "PLZ"),
];

/// Street types kept in the normalized output
const RETAINED_STREET_TYPES: &[&str] = &["ST", "AVE"];

/// Occupancy designators recognized by the tagger
const OCCUPANCY_TYPES: &[&str] = &[
    "APT", "APARTMENT", "UNIT", "STE", "SUITE", "FL", "FLOOR", "RM", "ROOM",
];

// Same shape the tagger accepts, so "12B" and "37-12" stay whole on reparse
static LEADING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d[0-9A-Za-z-]*)").expect("valid regex"));
// "Unit 5", "Unit #5", "Unit5"; "Unity" is not a unit
static UNIT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bunit(?:(?:\s+|\s*#\s*)([A-Za-z0-9-]+)|(\d[A-Za-z0-9-]*))").expect("valid regex")
});
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

fn lookup<'a>(table: &'a [(&str, &str)], word: &str) -> Option<&'a str> {
    table.iter().find(|(k, _)| *k == word).map(|(_, v)| *v)
}

/// Abbreviate a directional; unknown words pass through upper-cased
pub fn normalize_directional(directional: &str) -> String {
    let upper = directional.trim().trim_end_matches('.').to_uppercase();
    lookup(DIRECTIONALS, &upper).map(str::to_string).unwrap_or(upper)
}

/// Abbreviate a street type, keeping only ST and AVE
///
/// Example:
/// - "Street" → "ST"
/// - "Boulevard" → "" (recognized, but not retained)
pub fn normalize_street_type(street_type: &str) -> String {
    let upper = street_type.trim().trim_end_matches('.').to_uppercase();
    if upper.is_empty() {
        return String::new();
    }
    let abbreviated = lookup(STREET_TYPES, &upper).unwrap_or(&upper);
    if RETAINED_STREET_TYPES.contains(&abbreviated) {
        abbreviated.to_string()
    } else {
        String::new()
    }
}

fn is_directional(word: &str) -> bool {
    lookup(DIRECTIONALS, word).is_some()
}

fn is_street_type(word: &str) -> bool {
    lookup(STREET_TYPES, word).is_some()
}

fn is_occupancy_type(word: &str) -> bool {
    OCCUPANCY_TYPES.contains(&word)
}

/// Accept a unit only if it is purely numeric, or has both a letter and a digit
/// once non-alphanumerics are stripped. Returns the cleaned unit.
pub fn clean_unit(candidate: &str) -> Option<String> {
    let cleaned: String = candidate.chars().filter(|c| c.is_alphanumeric()).collect();
    if cleaned.is_empty() {
        return None;
    }
    let all_digits = cleaned.chars().all(|c| c.is_ascii_digit());
    let has_letter = cleaned.chars().any(|c| c.is_alphabetic());
    let has_digit = cleaned.chars().any(|c| c.is_ascii_digit());
    if all_digits || (has_letter && has_digit) {
        Some(cleaned.to_uppercase())
    } else {
        None
    }
}

/// Upper-case and collapse runs of whitespace into single spaces
pub fn collapse_upper(s: &str) -> String {
    WHITESPACE.replace_all(s.trim(), " ").to_uppercase()
}

// ============================================================================
// PARSED ADDRESS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseStrategy {
    /// Token tagger produced a street name and a street type
    Tagger,

    /// Tagger was incomplete; regex tokenizer produced the components
    Regex,
}

impl ParseStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseStrategy::Tagger => "tagger",
            ParseStrategy::Regex => "regex",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedAddress {
    pub street_number: String,
    pub pre_directional: String,
    pub street_name: String,
    /// Only "ST", "AVE" or empty
    pub street_type: String,
    pub unit: String,
    pub normalized_address: String,
}

impl ParsedAddress {
    fn build(
        street_number: &str,
        pre_directional: &str,
        street_name: &str,
        street_type: &str,
        unit: Option<String>,
        strategy: &ParseStrategy,
    ) -> Self {
        let mut normalized = [street_number, pre_directional, street_name, street_type]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");

        let unit = unit.unwrap_or_default();
        if !unit.is_empty() {
            match strategy {
                ParseStrategy::Tagger => normalized.push_str(&format!(" APT {unit}")),
                ParseStrategy::Regex => normalized.push_str(&format!(" {unit}")),
            }
        }

        ParsedAddress {
            street_number: street_number.to_uppercase(),
            pre_directional: pre_directional.to_uppercase(),
            street_name: collapse_upper(street_name),
            street_type: street_type.to_string(),
            unit,
            normalized_address: collapse_upper(&normalized),
        }
    }
}

/// Result of `Normalizer::parse`, tagged with the strategy that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseOutcome {
    Tagged(ParsedAddress),
    Fallback(ParsedAddress),
    /// Input was empty or not text
    Unparseable,
}

impl ParseOutcome {
    pub fn is_ok(&self) -> bool {
        !matches!(self, ParseOutcome::Unparseable)
    }

    pub fn address(&self) -> Option<&ParsedAddress> {
        match self {
            ParseOutcome::Tagged(a) | ParseOutcome::Fallback(a) => Some(a),
            ParseOutcome::Unparseable => None,
        }
    }

    pub fn into_address(self) -> Option<ParsedAddress> {
        match self {
            ParseOutcome::Tagged(a) | ParseOutcome::Fallback(a) => Some(a),
            ParseOutcome::Unparseable => None,
        }
    }

    pub fn strategy(&self) -> Option<ParseStrategy> {
        match self {
            ParseOutcome::Tagged(_) => Some(ParseStrategy::Tagger),
            ParseOutcome::Fallback(_) => Some(ParseStrategy::Regex),
            ParseOutcome::Unparseable => None,
        }
    }
}

// ============================================================================
// TAGGER
// ============================================================================

#[derive(Debug, Clone)]
struct Token {
    /// Upper-cased, edge punctuation removed
    word: String,
    /// Comma-separated clause this token belongs to
    clause: usize,
}

fn tokenize(raw: &str) -> Vec<Token> {
    let mut tokens = Vec::new();

    for (clause, part) in raw.split(',').enumerate() {
        for piece in part.split_whitespace() {
            let trimmed = piece.trim_matches(|c: char| matches!(c, '.' | ';' | ':' | '(' | ')'));

            // "#4B" → occupancy marker + identifier
            if let Some(rest) = trimmed.strip_prefix('#') {
                tokens.push(Token { word: "#".to_string(), clause });
                if !rest.is_empty() {
                    tokens.push(Token { word: rest.to_uppercase(), clause });
                }
                continue;
            }

            if !trimmed.is_empty() {
                tokens.push(Token { word: trimmed.to_uppercase(), clause });
            }
        }
    }

    tokens
}

fn looks_like_address_number(word: &str) -> bool {
    word.chars().next().is_some_and(|c| c.is_ascii_digit())
        && word.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Label tokens and return a parse only when both street name and street type were found
pub fn tag_address(raw: &str) -> Option<ParsedAddress> {
    let tokens = tokenize(raw);
    if tokens.is_empty() {
        return None;
    }

    let mut i = 0;
    let mut street_number = "";
    if looks_like_address_number(&tokens[0].word) {
        street_number = &tokens[0].word;
        i = 1;
    }

    let street_clause = tokens.get(i).map(|t| t.clause)?;

    // Street segment: same clause, up to the first occupancy marker
    let seg_end = tokens[i..]
        .iter()
        .position(|t| t.clause != street_clause || t.word == "#" || is_occupancy_type(&t.word))
        .map(|p| i + p)
        .unwrap_or(tokens.len());

    let mut pre_directional = "";
    if seg_end - i >= 3 && is_directional(&tokens[i].word) {
        pre_directional = &tokens[i].word;
        i += 1;
    }

    // First street-type word with at least one name token before it
    let type_pos = (i + 1..seg_end).find(|&p| is_street_type(&tokens[p].word))?;

    let street_name = tokens[i..type_pos]
        .iter()
        .map(|t| t.word.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let raw_street_type = &tokens[type_pos].word;

    if street_name.is_empty() || raw_street_type.is_empty() {
        return None;
    }

    // Occupancy anywhere after the street type
    let unit = tokens[type_pos + 1..]
        .iter()
        .position(|t| t.word == "#" || is_occupancy_type(&t.word))
        .and_then(|p| {
            let marker = type_pos + 1 + p;
            let mut id_pos = marker + 1;
            // "Apt #4B"
            if tokens.get(id_pos).is_some_and(|t| t.word == "#") {
                id_pos += 1;
            }
            tokens.get(id_pos)
        })
        .and_then(|t| clean_unit(&t.word));

    Some(ParsedAddress::build(
        street_number,
        &normalize_directional(pre_directional),
        &street_name,
        &normalize_street_type(raw_street_type),
        unit,
        &ParseStrategy::Tagger,
    ))
}

// ============================================================================
// REGEX FALLBACK
// ============================================================================

/// Regex tokenizer used when the tagger cannot find both street name and type
pub fn regex_address(raw: &str) -> ParsedAddress {
    let street_part = raw.split(',').next().unwrap_or("");

    let unit = UNIT_PATTERN
        .captures(street_part)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .and_then(|m| clean_unit(m.as_str()));
    let without_unit = UNIT_PATTERN.replace(street_part, " ");

    let (street_number, rest) = match LEADING_NUMBER.captures(&without_unit) {
        Some(caps) => {
            let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
            let number = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            (number.to_string(), without_unit[whole..].to_string())
        }
        None => (String::new(), without_unit.to_string()),
    };

    let mut words: Vec<String> = rest
        .split_whitespace()
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_uppercase())
        .filter(|w| !w.is_empty())
        .collect();

    let mut pre_directional = String::new();
    if words.len() >= 2 && is_directional(&words[0]) {
        pre_directional = normalize_directional(&words.remove(0));
    }

    let mut street_type = String::new();
    if words.len() >= 2 && words.last().is_some_and(|w| is_street_type(w)) {
        if let Some(last) = words.pop() {
            street_type = normalize_street_type(&last);
        }
    }

    ParsedAddress::build(
        &street_number,
        &pre_directional,
        &words.join(" "),
        &street_type,
        unit,
        &ParseStrategy::Regex,
    )
}

/// Parse without memoization
pub fn parse_address(raw: &str) -> ParseOutcome {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.chars().any(|c| c.is_control() && !c.is_whitespace()) {
        return ParseOutcome::Unparseable;
    }

    match tag_address(trimmed) {
        Some(parsed) => ParseOutcome::Tagged(parsed),
        None => ParseOutcome::Fallback(regex_address(trimmed)),
    }
}

// ============================================================================
// NORMALIZER (memoized)
// ============================================================================

/// Memoizing front-end for `parse_address`, bounded by an LRU of `capacity` entries
pub struct Normalizer {
    cache: Mutex<LruCache<String, ParseOutcome>>,
}

impl Normalizer {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Normalizer {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn parse(&self, raw: &str) -> ParseOutcome {
        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(raw) {
                return hit.clone();
            }
        }

        let outcome = parse_address(raw);

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(raw.to_string(), outcome.clone());
        outcome
    }

    /// Normalized string, `None` when the input is unparseable
    pub fn normalize(&self, raw: &str) -> Option<String> {
        self.parse(raw).into_address().map(|a| a.normalized_address)
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(10_000)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_address_with_unit_and_zip() {
        let outcome = parse_address("123 N Main Street Apt 4B, 11211");
        let parsed = match &outcome {
            ParseOutcome::Tagged(p) => p,
            other => panic!("expected tagger path, got {:?}", other),
        };

        assert_eq!(parsed.street_number, "123");
        assert_eq!(parsed.pre_directional, "N");
        assert_eq!(parsed.street_name, "MAIN");
        assert_eq!(parsed.street_type, "ST");
        assert_eq!(parsed.unit, "4B");
        assert_eq!(parsed.normalized_address, "123 N MAIN ST APT 4B");
    }

    #[test]
    fn test_non_retained_street_type_is_empty() {
        let parsed = parse_address("45 Lexington Boulevard").into_address().unwrap();
        assert_eq!(parsed.street_type, "");
        assert_eq!(parsed.street_name, "LEXINGTON");
        assert_eq!(parsed.normalized_address, "45 LEXINGTON");
    }

    #[test]
    fn test_full_directional_abbreviated() {
        let parsed = parse_address("200 North Bedford Avenue").into_address().unwrap();
        assert_eq!(parsed.pre_directional, "N");
        assert_eq!(parsed.street_type, "AVE");
        assert_eq!(parsed.normalized_address, "200 N BEDFORD AVE");
    }

    #[test]
    fn test_directional_not_taken_when_it_is_the_name() {
        // "West St": W-E-S-T is the street name itself
        let parsed = parse_address("10 West St").into_address().unwrap();
        assert_eq!(parsed.pre_directional, "");
        assert_eq!(parsed.street_name, "WEST");
        assert_eq!(parsed.normalized_address, "10 WEST ST");
    }

    #[test]
    fn test_type_word_as_street_name() {
        let parsed = parse_address("100 Court Street").into_address().unwrap();
        assert_eq!(parsed.street_name, "COURT");
        assert_eq!(parsed.street_type, "ST");
    }

    #[test]
    fn test_hash_unit() {
        let parsed = parse_address("12 Grand St #3R").into_address().unwrap();
        assert_eq!(parsed.unit, "3R");
        assert_eq!(parsed.normalized_address, "12 GRAND ST APT 3R");

        let parsed = parse_address("12 Grand St Apt #7").into_address().unwrap();
        assert_eq!(parsed.unit, "7");
    }

    #[test]
    fn test_invalid_unit_dropped() {
        // Letters only: neither numeric nor alphanumeric
        let parsed = parse_address("12 Grand St Apt B").into_address().unwrap();
        assert_eq!(parsed.unit, "");
        assert_eq!(parsed.normalized_address, "12 GRAND ST");
    }

    #[test]
    fn test_clean_unit_rules() {
        assert_eq!(clean_unit("4B"), Some("4B".to_string()));
        assert_eq!(clean_unit("12"), Some("12".to_string()));
        assert_eq!(clean_unit("4-B"), Some("4B".to_string()));
        assert_eq!(clean_unit("PH"), None);
        assert_eq!(clean_unit("--"), None);
    }

    #[test]
    fn test_regex_fallback_unit_without_apt() {
        // No street type → tagger gives up → regex path
        let outcome = parse_address("77 Kent Unit 5");
        assert_eq!(outcome.strategy(), Some(ParseStrategy::Regex));
        let parsed = outcome.into_address().unwrap();
        assert_eq!(parsed.street_number, "77");
        assert_eq!(parsed.street_name, "KENT");
        assert_eq!(parsed.unit, "5");
        assert_eq!(parsed.normalized_address, "77 KENT 5");
    }

    #[test]
    fn test_regex_fallback_directly() {
        let parsed = regex_address("9 south Wythe Boulevard Unit 2A, Brooklyn");
        assert_eq!(parsed.street_number, "9");
        assert_eq!(parsed.pre_directional, "S");
        assert_eq!(parsed.street_name, "WYTHE");
        assert_eq!(parsed.street_type, "");
        assert_eq!(parsed.normalized_address, "9 S WYTHE 2A");
    }

    #[test]
    fn test_regex_keeps_compound_house_numbers() {
        let parsed = regex_address("37-12 MAIN");
        assert_eq!(parsed.street_number, "37-12");
        assert_eq!(parsed.normalized_address, "37-12 MAIN");

        let parsed = regex_address("12B MAIN");
        assert_eq!(parsed.street_number, "12B");
        assert_eq!(parsed.normalized_address, "12B MAIN");
    }

    #[test]
    fn test_regex_unit_without_space() {
        let parsed = regex_address("77 Kent Unit5");
        assert_eq!(parsed.unit, "5");
        assert_eq!(parsed.normalized_address, "77 KENT 5");

        let parsed = regex_address("77 Kent Unit#4B");
        assert_eq!(parsed.unit, "4B");

        // A street named Unity keeps its name
        let parsed = regex_address("5 Unity");
        assert_eq!(parsed.unit, "");
        assert_eq!(parsed.normalized_address, "5 UNITY");
    }

    #[test]
    fn test_tagger_directly_requires_name_and_type() {
        assert!(tag_address("123 Main").is_none());
        assert!(tag_address("Street").is_none());
        assert!(tag_address("123 Main St").is_some());
    }

    #[test]
    fn test_empty_and_non_text_are_unparseable() {
        assert_eq!(parse_address(""), ParseOutcome::Unparseable);
        assert_eq!(parse_address("   "), ParseOutcome::Unparseable);
        assert_eq!(parse_address("12\u{0}34"), ParseOutcome::Unparseable);
    }

    #[test]
    fn test_incomplete_address_is_still_ok() {
        let outcome = parse_address("---");
        assert!(outcome.is_ok());
        assert_eq!(outcome.address().unwrap().normalized_address, "");
    }

    #[test]
    fn test_normalization_idempotent() {
        for raw in [
            "123 N Main Street Apt 4B, 11211",
            "200 North Bedford Avenue",
            "12 Grand St #3R",
            "45 Lexington Boulevard",
            "77 Kent Unit 5",
            "  500   driggs   ave  ",
            "37-12 Main Boulevard",
            "12B Main Boulevard",
            "12 Grand Boulevard #3R",
            "37-12 Main Unit 5",
        ] {
            let first = parse_address(raw).into_address().unwrap();
            let second = parse_address(&first.normalized_address).into_address().unwrap();
            assert_eq!(
                first.normalized_address, second.normalized_address,
                "not idempotent for {raw:?}"
            );
        }
    }

    #[test]
    fn test_tagged_components_stable_on_reparse() {
        let first = parse_address("123 N Main Street Apt 4B").into_address().unwrap();
        let second = parse_address(&first.normalized_address).into_address().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_normalizer_memoizes() {
        let normalizer = Normalizer::new(2);
        let a = normalizer.parse("123 Main St");
        let b = normalizer.parse("123 Main St");
        assert_eq!(a, b);
        assert_eq!(normalizer.cached_entries(), 1);

        normalizer.parse("1 A St");
        normalizer.parse("2 B St");
        // Bounded by capacity
        assert_eq!(normalizer.cached_entries(), 2);
        assert_eq!(normalizer.normalize("123 Main St").as_deref(), Some("123 MAIN ST"));
    }

    #[test]
    fn test_collapse_upper() {
        assert_eq!(collapse_upper("  123  main\tst "), "123 MAIN ST");
    }
}
