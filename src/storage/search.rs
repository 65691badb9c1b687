//! Fuzzy matching contract
//!
//! The storage engine treats approximate matching as an opaque ranking
//! oracle: it hands over records made of weighted text fields and gets back
//! the indices of matching records with a score between 0.0 (perfect) and
//! 1.0 (no resemblance). Anything implementing [`FuzzyMatcher`] can be
//! plugged into the storage manager.

use strsim::normalized_damerau_levenshtein;

/// Score cut-off used by the storage manager
pub const DEFAULT_THRESHOLD: f64 = 0.6;

/// Floor applied to per-field scores so a perfect field still composes
const MIN_FIELD_SCORE: f64 = 0.001;

/// A named field and its relative weight
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedField {
    pub name: &'static str,
    pub weight: f64,
}

impl WeightedField {
    pub const fn new(name: &'static str, weight: f64) -> Self {
        Self { name, weight }
    }
}

/// Field values of one candidate, parallel to the `WeightedField` list.
/// A field may hold several values (e.g. a list of categories).
#[derive(Debug, Clone, Default)]
pub struct FuzzyRecord<'a> {
    pub fields: Vec<Vec<&'a str>>,
}

/// A ranked hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuzzyMatch {
    /// Position of the record in the input slice
    pub index: usize,
    pub score: f64,
}

/// Approximate string matching capability
pub trait FuzzyMatcher: Send + Sync {
    /// Returns every record scoring at or below `threshold`, best first
    fn rank(
        &self,
        query: &str,
        fields: &[WeightedField],
        records: &[FuzzyRecord<'_>],
        threshold: f64,
    ) -> Vec<FuzzyMatch>;
}

/// Edit-distance matcher
///
/// Each field value is scored against the query by the best normalized
/// Damerau-Levenshtein similarity over the whole value and over every
/// window of as many words as the query has; a case-insensitive substring
/// hit scores perfectly. Field scores are combined as a weighted geometric
/// mean, so one strong field is enough to surface a record.
#[derive(Debug, Clone, Copy, Default)]
pub struct EditDistanceMatcher;

impl EditDistanceMatcher {
    fn value_score(query: &str, value: &str) -> f64 {
        let value = value.to_lowercase();
        if value.contains(query) {
            return 0.0;
        }

        let query_words = query.split_whitespace().count().max(1);
        let words: Vec<&str> = value.split_whitespace().collect();

        let mut best = normalized_damerau_levenshtein(query, &value);
        if words.len() > query_words {
            for window in words.windows(query_words) {
                let similarity = normalized_damerau_levenshtein(query, &window.join(" "));
                best = best.max(similarity);
            }
        }

        1.0 - best
    }

    fn field_score(query: &str, values: &[&str]) -> Option<f64> {
        values
            .iter()
            .map(|v| Self::value_score(query, v))
            .reduce(f64::min)
    }
}

impl FuzzyMatcher for EditDistanceMatcher {
    fn rank(
        &self,
        query: &str,
        fields: &[WeightedField],
        records: &[FuzzyRecord<'_>],
        threshold: f64,
    ) -> Vec<FuzzyMatch> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }

        let mut matches: Vec<FuzzyMatch> = records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| {
                let mut log_sum = 0.0;
                let mut weight_sum = 0.0;

                for (field, values) in fields.iter().zip(&record.fields) {
                    // Empty fields neither help nor hurt
                    if let Some(score) = Self::field_score(&query, values) {
                        log_sum += field.weight * score.max(MIN_FIELD_SCORE).ln();
                        weight_sum += field.weight;
                    }
                }

                if weight_sum == 0.0 {
                    return None;
                }

                // Every field at the floor means a perfect match
                let mean = log_sum / weight_sum;
                let score = if mean <= MIN_FIELD_SCORE.ln() + 1e-9 {
                    0.0
                } else {
                    mean.exp()
                };
                (score <= threshold).then_some(FuzzyMatch { index, score })
            })
            .collect();

        matches.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.index.cmp(&b.index)));
        matches
    }
}
