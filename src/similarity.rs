//! Name and ingredient-set scoring. Both scorers return values in `[0.0, 1.0]`.

use rapidfuzz::distance::indel;
use std::collections::HashSet;
use std::hash::Hash;

/// Minimum name score for resolving a misspelled medicine name.
pub const NAME_FALLBACK_THRESHOLD: f64 = 0.8;
/// Minimum name score for resolving a misspelled ingredient.
pub const INGREDIENT_FALLBACK_THRESHOLD: f64 = 0.7;
/// Cheaper substitutes at or above this ingredient overlap are "close".
pub const CLOSE_SUBSTITUTE_THRESHOLD: f64 = 0.7;
/// Lower bound for "loose" cheaper substitutes.
pub const LOOSE_SUBSTITUTE_THRESHOLD: f64 = 0.4;
/// Minimum ingredient overlap for price-aware suggestions.
pub const SUGGESTION_THRESHOLD: f64 = 0.5;

// Float slack when comparing the Indel upper bound against a cutoff.
const BOUND_EPSILON: f64 = 1e-9;

/// Case-insensitive longest-matching-blocks ratio: `2 * M / (|a| + |b|)` where `M`
/// is the total size of the matching blocks found by recursively taking the longest
/// common substring and recursing on both sides of it.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    NameMatcher::new(a).score(b)
}

/// Scores many candidates against one query without re-normalising the query.
#[derive(Debug, Clone)]
pub struct NameMatcher {
    query: Vec<char>,
}

impl NameMatcher {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_lowercase().chars().collect(),
        }
    }

    pub fn score(&self, candidate: &str) -> f64 {
        let candidate: Vec<char> = candidate.to_lowercase().chars().collect();
        symmetric_ratio(&self.query, &candidate)
    }

    /// Returns the score only when it reaches `cutoff`.
    ///
    /// The Indel similarity (longest common subsequence based) is never below the
    /// block ratio, so candidates whose Indel score misses the cutoff are skipped
    /// without running the block matcher.
    pub fn score_at_least(&self, candidate: &str, cutoff: f64) -> Option<f64> {
        let candidate: Vec<char> = candidate.to_lowercase().chars().collect();
        let bound =
            indel::normalized_similarity(self.query.iter().copied(), candidate.iter().copied());
        if bound + BOUND_EPSILON < cutoff {
            return None;
        }
        let score = symmetric_ratio(&self.query, &candidate);
        (score >= cutoff).then_some(score)
    }
}

/// Jaccard index of two sets, `None` when both are empty.
pub fn jaccard<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> Option<f64> {
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return None;
    }
    Some(intersection as f64 / union as f64)
}

// Block matching picks the earliest of equally long matches, which can make the
// ratio depend on argument order; scoring both orders keeps it symmetric.
fn symmetric_ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matched = matching_chars(a, b).max(matching_chars(b, a));
    2.0 * matched as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut pending = vec![(0, a.len(), 0, b.len())];
    let mut matched = 0;
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_match(a, b, alo, ahi, blo, bhi);
        if size == 0 {
            continue;
        }
        matched += size;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            pending.push((i + size, ahi, j + size, bhi));
        }
    }
    matched
}

/// Longest common substring of `a[alo..ahi]` and `b[blo..bhi]`; ties resolve to the
/// smallest start in `a`, then in `b`.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let width = bhi - blo;
    let mut previous = vec![0usize; width + 1];
    let mut current = vec![0usize; width + 1];
    let mut best = (alo, blo, 0);
    for i in alo..ahi {
        for j in blo..bhi {
            let col = j - blo + 1;
            current[col] = if a[i] == b[j] { previous[col - 1] + 1 } else { 0 };
            let size = current[col];
            if size > best.2 {
                best = (i + 1 - size, j + 1 - size, size);
            }
        }
        std::mem::swap(&mut previous, &mut current);
    }
    best
}
