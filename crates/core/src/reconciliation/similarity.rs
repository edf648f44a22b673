//! Description similarity for fuzzy matching.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Scores how alike two descriptions are, in `[0, 1]`.
pub trait DescriptionSimilarity: Send + Sync {
    /// Similarity of `a` and `b`; symmetric.
    fn score(&self, a: &str, b: &str) -> Decimal;
}

/// Jaccard index over normalised tokens.
///
/// Text is NFKD-decomposed with combining marks dropped, lowercased, and
/// split on anything that is not alphanumeric. Two descriptions without any
/// token score zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenJaccard;

impl DescriptionSimilarity for TokenJaccard {
    fn score(&self, a: &str, b: &str) -> Decimal {
        let left = tokens(a);
        let right = tokens(b);
        let union = left.union(&right).count();
        if union == 0 {
            return Decimal::ZERO;
        }
        let common = left.intersection(&right).count();
        Decimal::from(common) / Decimal::from(union)
    }
}

/// Normalised tokens of a description.
#[must_use]
pub fn tokens(input: &str) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    let mut current = String::new();
    for ch in input.nfkd() {
        if is_combining_mark(ch) {
            continue;
        }
        if ch.is_alphanumeric() {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            tokens.insert(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.insert(current);
    }
    tokens
}
