//! Trigram similarity with the same semantics as Postgres `pg_trgm`'s
//! `similarity()`, for stores that cannot ask the database.

use std::collections::HashSet;

/// The distinct trigrams of `text`: lowercased, split into alphanumeric
/// words, each padded with two leading blanks and one trailing blank.
pub fn trigrams(text: &str) -> HashSet<[char; 3]> {
    let lowered = text.to_lowercase();
    let mut set = HashSet::new();

    for word in lowered.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let padded: Vec<char> = "  "
            .chars()
            .chain(word.chars())
            .chain(std::iter::once(' '))
            .collect();
        for window in padded.windows(3) {
            set.insert([window[0], window[1], window[2]]);
        }
    }

    set
}

/// Shared trigrams over all distinct trigrams, in `[0, 1]`.
/// Zero when either side has no trigrams.
pub fn similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    let total = ta.len() + tb.len() - shared;
    shared as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_names_score_one() {
        assert_eq!(similarity("上海星河社", "上海星河社"), 1.0);
        assert_eq!(similarity("ChinaJoy", "chinajoy"), 1.0);
    }

    #[test]
    fn suffix_variant_scores_five_eighths() {
        // 6 vs 7 trigrams, 5 shared
        assert_eq!(similarity("上海星河社", "上海星河社团"), 5.0 / 8.0);
    }

    #[test]
    fn punctuation_splits_words() {
        assert_eq!(trigrams("BW-2024"), trigrams("bw 2024"));
        assert_eq!(trigrams("a").len(), 2);
    }

    #[test]
    fn unrelated_names_score_low() {
        assert!(similarity("上海星河社", "北京月光剧团") < 0.1);
        assert_eq!(similarity("", "上海星河社"), 0.0);
        assert_eq!(similarity("!!!", "???"), 0.0);
    }

    #[test]
    fn similarity_is_symmetric() {
        let a = "上海星河Cosplay社";
        let b = "上海星河社";
        assert_eq!(similarity(a, b), similarity(b, a));
        assert!(similarity(a, b) > 0.2 && similarity(a, b) < 0.3);
    }
}
