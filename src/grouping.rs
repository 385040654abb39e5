//! Pairwise rhythmic comparison of matches that share a melodic pattern.
//!
//! Every unordered pair inside a pattern group is compared, so a group of k
//! matches costs k·(k−1)/2 comparisons. Total work is the sum of that over
//! groups; a pattern that recurs very often dominates the run time.

use std::collections::HashMap;

use thiserror::Error;

use crate::distance::{self, ShapeMismatch};
use crate::matches::{FieldValue, Match, MatchField, PatternKey};
use crate::ratios::RatedMatch;

#[derive(Error, Debug, PartialEq)]
pub enum GroupingError {
    #[error("Rows {first} and {second} in group {pattern}: {source}")]
    Shape {
        pattern: PatternKey,
        first: usize,
        second: usize,
        #[source]
        source: ShapeMismatch,
    },
    #[error("No row has a field \"{field}\"")]
    UnknownField { field: String },
    #[error("Threshold must be a non-negative number, got {0}")]
    InvalidThreshold(f64),
}

/// Both matches' values for one requested field.
#[derive(Debug, Clone, PartialEq)]
pub struct PairedField {
    pub field: MatchField,
    pub first: FieldValue,
    pub second: FieldValue,
}

/// Two matches of the same pattern and their rhythmic distance.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchPair {
    pub pattern: PatternKey,
    pub sum_diffs: f64,
    /// Data row numbers (from 1) of match 1 and match 2.
    pub rows: (usize, usize),
    pub fields: Vec<PairedField>,
}

/// One pattern group and how many pairs it will produce.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    pub pattern: PatternKey,
    pub size: usize,
    pub pairs: usize,
}

/// Map each pattern key to the positions of its members in `matches`.
/// Groups come out in first-encounter order; members keep input order.
pub fn group_indices<F>(matches: &[RatedMatch], pattern_key: F) -> Vec<(PatternKey, Vec<usize>)>
where
    F: Fn(&Match) -> PatternKey,
{
    let mut slots: HashMap<PatternKey, usize> = HashMap::new();
    let mut groups: Vec<(PatternKey, Vec<usize>)> = Vec::new();

    for (i, m) in matches.iter().enumerate() {
        let key = pattern_key(&m.item);
        match slots.get(&key) {
            Some(&slot) => groups[slot].1.push(i),
            None => {
                slots.insert(key.clone(), groups.len());
                groups.push((key, vec![i]));
            }
        }
    }

    groups
}

pub fn summarize_groups<F>(matches: &[RatedMatch], pattern_key: F) -> Vec<GroupSummary>
where
    F: Fn(&Match) -> PatternKey,
{
    group_indices(matches, pattern_key)
        .into_iter()
        .map(|(pattern, members)| {
            let size = members.len();
            GroupSummary {
                pattern,
                size,
                pairs: size * size.saturating_sub(1) / 2,
            }
        })
        .collect()
}

/// Compare every unordered pair of matches that share a pattern key.
///
/// Output is ordered by group (first encounter), then by combination order
/// within the group. Each pair carries both matches' values for every field
/// in `output_fields`, in that order; a row without a value for a field gets
/// [`FieldValue::Empty`]. A field that no row carries at all is an error.
pub fn group_and_distance<F>(
    matches: &[RatedMatch],
    pattern_key: F,
    output_fields: &[MatchField],
) -> Result<Vec<MatchPair>, GroupingError>
where
    F: Fn(&Match) -> PatternKey,
{
    for field in output_fields {
        if !matches.is_empty() && matches.iter().all(|m| m.item.field(field).is_none()) {
            return Err(GroupingError::UnknownField {
                field: field.name().to_string(),
            });
        }
    }

    let mut pairs = Vec::new();

    for (pattern, members) in group_indices(matches, pattern_key) {
        log::debug!("Group {}: {} matches", pattern, members.len());

        for (n, &i) in members.iter().enumerate() {
            for &j in &members[n + 1..] {
                let (a, b) = (&matches[i], &matches[j]);
                let sum_diffs =
                    distance::compare(&a.ratios, &b.ratios).map_err(|source| GroupingError::Shape {
                        pattern: pattern.clone(),
                        first: a.row,
                        second: b.row,
                        source,
                    })?;

                let fields = output_fields
                    .iter()
                    .map(|field| PairedField {
                        field: field.clone(),
                        first: a.item.field(field).unwrap_or(FieldValue::Empty),
                        second: b.item.field(field).unwrap_or(FieldValue::Empty),
                    })
                    .collect();

                pairs.push(MatchPair {
                    pattern: pattern.clone(),
                    sum_diffs,
                    rows: (a.row, b.row),
                    fields,
                });
            }
        }
    }

    log::info!("Compared {} pairs across {} matches", pairs.len(), matches.len());
    Ok(pairs)
}

/// Keep pairs whose distance is at most `threshold` (inclusive).
pub fn filter_within(mut pairs: Vec<MatchPair>, threshold: f64) -> Result<Vec<MatchPair>, GroupingError> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(GroupingError::InvalidThreshold(threshold));
    }
    pairs.retain(|p| p.sum_diffs <= threshold);
    Ok(pairs)
}
