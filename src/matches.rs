use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical grouping key for a melodic pattern: the interval sequence,
/// frozen into an immutable, hashable form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatternKey(Box<[i32]>);

impl PatternKey {
    /// Normalize an interval sequence into a grouping key.
    /// Two keys are equal iff their interval sequences are equal element by element.
    pub fn normalize(intervals: &[i32]) -> Self {
        Self(intervals.into())
    }

    pub fn intervals(&self) -> &[i32] {
        &self.0
    }

    /// Number of intervals (the vector length the pattern was searched with).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PatternKey {
    /// Tuple notation, e.g. `(2, -2, 3)`; single intervals keep the trailing comma.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, interval) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{interval}")?;
        }
        if self.0.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

/// One occurrence of a melodic pattern in a piece, as produced by the
/// upstream pattern search.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub pattern_generating_match: Vec<i32>,
    /// Interval sequence actually found. Differs from the generating pattern
    /// for close (non-exact) matches; absent when upstream didn't export it.
    pub pattern_matched: Option<Vec<i32>>,
    pub piece_title: String,
    pub part: String,
    pub start_measure: u32,
    pub end_measure: u32,
    pub note_durations: Vec<f64>,
    /// Remaining upstream columns, passed through untouched.
    pub extra: BTreeMap<String, String>,
}

impl Match {
    /// Default grouping accessor: the generating pattern.
    pub fn pattern_key(&self) -> PatternKey {
        PatternKey::normalize(&self.pattern_generating_match)
    }

    /// Look up a passthrough field by name. `None` if this row doesn't carry it.
    pub fn field(&self, field: &MatchField) -> Option<FieldValue> {
        match field {
            MatchField::PieceTitle => Some(FieldValue::Text(self.piece_title.clone())),
            MatchField::Part => Some(FieldValue::Text(self.part.clone())),
            MatchField::StartMeasure => Some(FieldValue::Measure(self.start_measure)),
            MatchField::EndMeasure => Some(FieldValue::Measure(self.end_measure)),
            MatchField::PatternMatched => self
                .pattern_matched
                .as_deref()
                .map(|p| FieldValue::Text(PatternKey::normalize(p).to_string())),
            MatchField::Extra(name) => self.extra.get(name).cloned().map(FieldValue::Text),
        }
    }
}

/// Which interval column identifies a pattern group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PatternSource {
    /// Group by `pattern_generating_match`.
    #[default]
    Generating,
    /// Group by `pattern_matched`, falling back to the generating pattern
    /// for rows that don't carry one.
    Matched,
}

impl PatternSource {
    pub fn key_of(self, m: &Match) -> PatternKey {
        match self {
            Self::Generating => m.pattern_key(),
            Self::Matched => m
                .pattern_matched
                .as_deref()
                .map(PatternKey::normalize)
                .unwrap_or_else(|| m.pattern_key()),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Generating => "pattern_generating_match",
            Self::Matched => "pattern_matched",
        }
    }
}

/// A column that can be carried from each match into the pair table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchField {
    PieceTitle,
    Part,
    StartMeasure,
    EndMeasure,
    PatternMatched,
    Extra(String),
}

impl MatchField {
    /// The four identifying fields reported by default.
    pub fn defaults() -> Vec<MatchField> {
        vec![
            Self::PieceTitle,
            Self::Part,
            Self::StartMeasure,
            Self::EndMeasure,
        ]
    }

    pub fn name(&self) -> &str {
        match self {
            Self::PieceTitle => "piece_title",
            Self::Part => "part",
            Self::StartMeasure => "start_measure",
            Self::EndMeasure => "end_measure",
            Self::PatternMatched => "pattern_matched",
            Self::Extra(name) => name,
        }
    }
}

impl From<&str> for MatchField {
    /// Any normalized column name not in the known set becomes `Extra`.
    fn from(s: &str) -> Self {
        let name = normalize_column(s);
        match name.as_str() {
            "piece_title" | "title" => Self::PieceTitle,
            "part" | "voice" => Self::Part,
            "start_measure" | "first_note_measure_number" => Self::StartMeasure,
            "end_measure" | "stop_measure" | "last_note_measure_number" => Self::EndMeasure,
            "pattern_matched" => Self::PatternMatched,
            _ => Self::Extra(name),
        }
    }
}

impl fmt::Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single passthrough value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Measure(u32),
    /// The row has no value for this column.
    Empty,
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Measure(m) => write!(f, "{m}"),
            Self::Empty => Ok(()),
        }
    }
}

/// Normalize a column header: trim, lowercase, spaces/dashes → underscores.
pub fn normalize_column(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}
