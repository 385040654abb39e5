//! Duration ratios: each note's duration divided by the previous note's.

use serde::Deserialize;
use thiserror::Error;

use crate::matches::Match;

#[derive(Error, Debug, PartialEq)]
pub enum RatioError {
    #[error("Zero duration at note {index}: ratio is undefined")]
    ZeroDuration { index: usize },
    #[error("Invalid duration {value} at note {index}: durations must be positive and finite")]
    InvalidDuration { index: usize, value: f64 },
    #[error("Row {row}: {source}")]
    Row {
        row: usize,
        #[source]
        source: Box<RatioError>,
    },
}

/// What to do with a row whose durations can't produce ratios.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ZeroDurationPolicy {
    /// Drop the row and keep going.
    #[default]
    Skip,
    /// Stop at the first bad row.
    Abort,
}

/// Consecutive duration ratios: `out[i] = durations[i + 1] / durations[i]`.
/// Fewer than two durations yield an empty sequence.
pub fn compute_ratios(durations: &[f64]) -> Result<Vec<f64>, RatioError> {
    for (index, &value) in durations.iter().enumerate() {
        if value == 0.0 {
            return Err(RatioError::ZeroDuration { index });
        }
        if !value.is_finite() || value < 0.0 {
            return Err(RatioError::InvalidDuration { index, value });
        }
    }

    Ok(durations.windows(2).map(|w| w[1] / w[0]).collect())
}

/// A match together with its cached ratio sequence.
#[derive(Debug, Clone)]
pub struct RatedMatch {
    /// Data row number in the upstream table, counted from 1 like the table reader.
    pub row: usize,
    pub item: Match,
    pub ratios: Vec<f64>,
}

/// A row dropped under [`ZeroDurationPolicy::Skip`].
#[derive(Debug)]
pub struct SkippedRow {
    pub row: usize,
    pub error: RatioError,
}

pub struct Annotated {
    pub rated: Vec<RatedMatch>,
    pub skipped: Vec<SkippedRow>,
}

/// Compute ratios for every row, applying `policy` to rows with bad durations.
pub fn annotate(matches: Vec<Match>, policy: ZeroDurationPolicy) -> Result<Annotated, RatioError> {
    let mut rated = Vec::with_capacity(matches.len());
    let mut skipped = Vec::new();

    for (i, item) in matches.into_iter().enumerate() {
        let row = i + 1;
        match compute_ratios(&item.note_durations) {
            Ok(ratios) => rated.push(RatedMatch { row, item, ratios }),
            Err(e) => match policy {
                ZeroDurationPolicy::Abort => {
                    return Err(RatioError::Row {
                        row,
                        source: Box::new(e),
                    });
                }
                ZeroDurationPolicy::Skip => {
                    log::warn!(
                        "Skipping row {} ({}, {}, m. {}): {}",
                        row,
                        item.piece_title,
                        item.part,
                        item.start_measure,
                        e
                    );
                    skipped.push(SkippedRow { row, error: e });
                }
            },
        }
    }

    log::info!("Computed ratios for {} rows, skipped {}", rated.len(), skipped.len());
    Ok(Annotated { rated, skipped })
}
