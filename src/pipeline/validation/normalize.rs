//! Text normalization and fuzzy catalog presence checks.
//!
//! Both sides of every comparison go through `normalize` first. Presence is a
//! partial (substring-aligned) similarity: the candidate is aligned against
//! its best-matching stretch of the haystack, so OCR noise inside a name costs
//! a few points rather than the whole match.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Lowercase, compatibility-decompose (NFKD), drop combining marks, trim.
///
/// Ligatures and accented letters compare equal to their ASCII spelling:
/// "Ｃafé ﬁle" → "cafe file". Idempotent.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect();
    // Lowercasing can reintroduce composed letters (e.g. KELVIN SIGN, ANGSTROM SIGN).
    let decomposed: String = folded.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    decomposed.trim().to_string()
}

/// Best similarity (0-100) of `needle` against any substring of `haystack`.
///
/// The score is `1 - d / len(needle)`, where `d` is the smallest edit
/// distance between the needle and a substring of the haystack. A needle at
/// least as long as the haystack is compared whole (normalized Levenshtein).
/// An empty needle scores 0.
pub fn partial_ratio(needle: &str, haystack: &str) -> f64 {
    let needle_chars: Vec<char> = needle.chars().collect();
    if needle_chars.is_empty() {
        return 0.0;
    }

    if haystack.chars().count() <= needle_chars.len() {
        return strsim::normalized_levenshtein(needle, haystack) * 100.0;
    }

    let distance = best_substring_distance(&needle_chars, haystack);
    (1.0 - distance as f64 / needle_chars.len() as f64) * 100.0
}

/// Semi-global edit distance: haystack characters before and after the
/// aligned stretch are free. One pass over the haystack, one reused column.
fn best_substring_distance(needle: &[char], haystack: &str) -> usize {
    // column[i]: cost of aligning needle[..i] to a substring ending at the
    // current haystack position. column[0] stays 0 so a match may start anywhere.
    let mut column: Vec<usize> = (0..=needle.len()).collect();
    let mut best = needle.len();

    for h in haystack.chars() {
        let mut diagonal = column[0];
        for i in 1..=needle.len() {
            let left = column[i];
            let substitution = diagonal + usize::from(needle[i - 1] != h);
            column[i] = substitution.min(left + 1).min(column[i - 1] + 1);
            diagonal = left;
        }
        best = best.min(column[needle.len()]);
        if best == 0 {
            break;
        }
    }
    best
}

/// Whether a normalized catalog entry is present in normalized text.
/// Present means the partial ratio strictly exceeds `threshold`.
pub fn is_approved_present(candidate: &str, haystack: &str, threshold: u8) -> bool {
    partial_ratio(candidate, haystack) > f64::from(threshold)
}

/// First catalog entry present in `normalized_text`, in catalog order.
/// Entries are normalized here; blank entries never match.
pub fn find_first_present<'a>(
    entries: &'a [String],
    normalized_text: &str,
    threshold: u8,
) -> Option<&'a str> {
    if normalized_text.is_empty() {
        return None;
    }
    entries.iter().map(String::as_str).find(|entry| {
        let candidate = normalize(entry);
        let present = is_approved_present(&candidate, normalized_text, threshold);
        tracing::trace!(entry = %candidate, present, "Catalog entry checked");
        present
    })
}
