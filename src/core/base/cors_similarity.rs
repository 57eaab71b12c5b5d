use faer::{Mat, MatRef};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::assert_ncols;
use crate::core::base::utils::normalise_matrix_row_l2;

//////////////////////////////
// ENUMS, TYPES, STRUCTURES //
//////////////////////////////

/// Similarity metric enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimilarityMetric {
    /// Cosine similarity, i.e., `dot(u, v) / (|u| * |v|)` in `[-1, 1]`
    #[serde(rename = "cosine_similarity")]
    Cosine,
}

impl SimilarityMetric {
    /// String representation as used in the configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityMetric::Cosine => "cosine_similarity",
        }
    }
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

////////////
// Params //
////////////

/// Parsing the similarity metric
///
/// ### Params
///
/// * `s` - string defining the similarity metric
///
/// ### Returns
///
/// The `SimilarityMetric`.
pub fn parse_similarity_metric(s: &str) -> Option<SimilarityMetric> {
    match s.to_lowercase().as_str() {
        "cosine_similarity" | "cosine" => Some(SimilarityMetric::Cosine),
        _ => None,
    }
}

////////////////////
// Row matrix ops //
////////////////////

/// Calculate the cosine similarity between the rows of two matrices
///
/// Both matrices need to have the same number of columns (features),
/// otherwise the function panics. Rows that are all zero yield a similarity
/// of `0` with any other row.
///
/// ### Params
///
/// * `mat_a` - The first matrix; rows are samples.
/// * `mat_b` - The second matrix; rows are samples.
///
/// ### Returns
///
/// The `nrow(mat_a) x nrow(mat_b)` cosine similarity matrix.
pub fn row_cos(mat_a: &MatRef<f64>, mat_b: &MatRef<f64>) -> Mat<f64> {
    assert_ncols!(mat_a, mat_b);

    let norm_a = normalise_matrix_row_l2(mat_a);
    let norm_b = normalise_matrix_row_l2(mat_b);

    norm_a.as_ref() * norm_b.as_ref().transpose()
}

/// Calculate the similarity between the rows of two matrices
///
/// ### Params
///
/// * `mat_a` - The first matrix; rows are samples.
/// * `mat_b` - The second matrix; rows are samples.
/// * `metric` - Which similarity metric to use.
///
/// ### Returns
///
/// The `nrow(mat_a) x nrow(mat_b)` similarity matrix.
pub fn row_similarity(
    mat_a: &MatRef<f64>,
    mat_b: &MatRef<f64>,
    metric: SimilarityMetric,
) -> Mat<f64> {
    match metric {
        SimilarityMetric::Cosine => row_cos(mat_a, mat_b),
    }
}

/////////////////
// Vector ops  //
/////////////////

/// Cosine similarity between two vectors
///
/// ### Params
///
/// * `a` - First vector.
/// * `b` - Second vector (same length).
///
/// ### Returns
///
/// The cosine similarity; `0` if either vector has zero norm.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    crate::assert_same_len!(a, b);

    let mut dot = 0_f64;
    let mut norm_a = 0_f64;
    let mut norm_b = 0_f64;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 1e-10 {
        dot / denom
    } else {
        0.0
    }
}
