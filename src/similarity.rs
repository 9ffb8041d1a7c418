// 📐 String similarity scorers for the fuzzy and phonetic stages
//
// Trigrams follow the usual padded-word convention: every alphanumeric word
// is lower-cased and padded with two leading blanks and one trailing blank,
// so "st" yields {"  s", " st", "st "}.

use rapidfuzz::distance::indel;
use std::collections::HashSet;

type Trigram = [char; 3];

/// Ordered trigrams of `s` (duplicates kept, word order preserved)
pub fn trigrams(s: &str) -> Vec<Trigram> {
    let mut out = Vec::new();

    for word in s
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = "  "
            .chars()
            .chain(word.chars().flat_map(char::to_lowercase))
            .chain(" ".chars())
            .collect();
        for window in padded.windows(3) {
            out.push([window[0], window[1], window[2]]);
        }
    }

    out
}

fn trigram_set(s: &str) -> HashSet<Trigram> {
    trigrams(s).into_iter().collect()
}

/// Shared trigrams over the union of both trigram sets, in [0, 1]
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let set_a = trigram_set(a);
    let set_b = trigram_set(b);
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let shared = set_a.intersection(&set_b).count();
    let union = set_a.len() + set_b.len() - shared;
    shared as f64 / union as f64
}

/// Best similarity between the trigrams of `a` and any contiguous extent of
/// the ordered trigrams of `b`, in [0, 1].
///
/// Extra leading or trailing words in `b` (a unit suffix, a city) do not
/// lower the score, because the best extent simply excludes them.
pub fn word_similarity(a: &str, b: &str) -> f64 {
    let set_a = trigram_set(a);
    let seq_b = trigrams(b);
    if set_a.is_empty() || seq_b.is_empty() {
        return 0.0;
    }

    let mut best = 0.0_f64;
    for start in 0..seq_b.len() {
        let mut extent: HashSet<Trigram> = HashSet::new();
        let mut shared = 0usize;

        for trigram in &seq_b[start..] {
            if extent.insert(*trigram) && set_a.contains(trigram) {
                shared += 1;
            }
            let union = set_a.len() + extent.len() - shared;
            let score = shared as f64 / union as f64;
            if score > best {
                best = score;
            }
        }

        if best >= 1.0 {
            break;
        }
    }

    best
}

/// Average of trigram similarity and word similarity
pub fn combined_similarity(a: &str, b: &str) -> f64 {
    (trigram_similarity(a, b) + word_similarity(a, b)) / 2.0
}

/// Normalized edit similarity on a 0-100 scale (insertions and deletions only)
pub fn edit_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    indel::normalized_similarity(a.chars(), b.chars()) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_trigrams_padding() {
        let t = trigrams("ST");
        assert_eq!(t, vec![[' ', ' ', 's'], [' ', 's', 't'], ['s', 't', ' ']]);
    }

    #[test]
    fn test_identical_strings_score_one() {
        assert!(approx(trigram_similarity("123 MAIN ST", "123 MAIN ST"), 1.0));
        assert!(approx(word_similarity("123 MAIN ST", "123 MAIN ST"), 1.0));
        assert!(approx(combined_similarity("123 MAIN ST", "123 MAIN ST"), 1.0));
    }

    #[test]
    fn test_typo_scores() {
        // 13 trigrams vs 12, 11 shared → 11 / 14
        let sim = trigram_similarity("123 MAIN STT", "123 MAIN ST");
        assert!(approx(sim, 11.0 / 14.0));
        let combined = combined_similarity("123 MAIN STT", "123 MAIN ST");
        assert!(combined > 0.7);
    }

    #[test]
    fn test_word_similarity_ignores_extra_words_in_second() {
        let full = word_similarity("123 MAIN ST", "123 MAIN ST APT 4B");
        assert!(approx(full, 1.0));
        // Plain trigram similarity is penalized by the extra words
        assert!(trigram_similarity("123 MAIN ST", "123 MAIN ST APT 4B") < 1.0);
    }

    #[test]
    fn test_unrelated_strings_score_low() {
        assert!(combined_similarity("123 MAIN ST", "987 BEDFORD AVE") < 0.2);
        assert_eq!(trigram_similarity("", "123 MAIN ST"), 0.0);
        assert_eq!(word_similarity("123 MAIN ST", ""), 0.0);
    }

    #[test]
    fn test_scores_are_bounded() {
        for (a, b) in [("A", "B"), ("12 ELM ST", "12 ELM"), ("X Y Z", "Z Y X")] {
            for score in [trigram_similarity(a, b), word_similarity(a, b), combined_similarity(a, b)] {
                assert!((0.0..=1.0).contains(&score));
            }
        }
    }

    #[test]
    fn test_edit_ratio() {
        assert!(approx(edit_ratio("ABC", "ABC"), 100.0));
        // 2 * lcs / total = 2 * 3 / 7
        let r = edit_ratio("ABCD", "ABC");
        assert!(approx(r, 600.0 / 7.0));
        assert!(approx(edit_ratio("", ""), 100.0));
    }
}
