use thiserror::Error;

/// The two ratio sequences being compared have different lengths.
/// Matches grouped under one pattern always share a length, so this
/// points at a grouping bug upstream rather than bad user input.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("Ratio sequences differ in length: {left} vs {right}")]
pub struct ShapeMismatch {
    pub left: usize,
    pub right: usize,
}

/// Rhythmic dissimilarity of two ratio sequences: the sum of absolute
/// elementwise differences. Zero iff the sequences are equal.
pub fn compare(a: &[f64], b: &[f64]) -> Result<f64, ShapeMismatch> {
    if a.len() != b.len() {
        return Err(ShapeMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    Ok(a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum())
}
