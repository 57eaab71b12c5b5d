use csv::WriterBuilder;
use statrs::statistics::Statistics;
use std::path::Path;

use crate::core::base::cors_similarity::cosine_similarity;
use crate::core::data::expression::ExpressionMatrix;
use crate::error::{ImputeError, Result};
use crate::single_cell::gene_alignment::shared_genes;

/// File with the summary statistics
pub const STATS_FILE: &str = "stats.txt";

/// File with the per cell scores
pub const SCORES_FILE: &str = "scores.txt";

/////////////
// Helpers //
/////////////

/// Quantile of sorted values with linear interpolation between the closest
/// ranks
///
/// ### Params
///
/// * `sorted` - Values in ascending order. Must not be empty.
/// * `q` - The quantile in `[0, 1]`.
///
/// ### Returns
///
/// The interpolated quantile.
fn quantile_linear(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (pos - lower as f64)
}

////////////////
// Structures //
////////////////

/// QualitySummary
///
/// ### Fields
///
/// * `mean` - Mean of the scores.
/// * `median` - Median of the scores.
/// * `lower_quartile` - 25% quantile.
/// * `upper_quartile` - 75% quantile.
/// * `std_dev` - Population standard deviation.
#[derive(Debug, Clone, PartialEq)]
pub struct QualitySummary {
    pub mean: f64,
    pub median: f64,
    pub lower_quartile: f64,
    pub upper_quartile: f64,
    pub std_dev: f64,
}

impl QualitySummary {
    /// Summarise a set of scores
    ///
    /// Median and quartiles interpolate linearly between the closest ranks,
    /// so for `[1, 2, 3, 4]` the quartiles are `1.75` and `3.25`.
    ///
    /// ### Params
    ///
    /// * `scores` - The scores. Must not be empty.
    ///
    /// ### Returns
    ///
    /// The `QualitySummary`.
    pub fn from_scores(scores: &[f64]) -> Result<Self> {
        if scores.is_empty() {
            return Err(ImputeError::invalid_parameter(
                "cannot summarise an empty set of scores",
            ));
        }

        let mut sorted = scores.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        Ok(Self {
            mean: scores.iter().mean(),
            median: quantile_linear(&sorted, 0.5),
            lower_quartile: quantile_linear(&sorted, 0.25),
            upper_quartile: quantile_linear(&sorted, 0.75),
            std_dev: if scores.len() > 1 {
                scores.iter().population_std_dev()
            } else {
                0.0
            },
        })
    }
}

/// QualityReport
///
/// Agreement between measured and imputed expression of the target cells on
/// the genes both contain.
///
/// ### Fields
///
/// * `cells` - Target cells in the order of the imputed matrix.
/// * `scores` - Cosine similarity per cell.
/// * `summary` - Summary statistics of `scores`.
#[derive(Debug, Clone)]
pub struct QualityReport {
    pub cells: Vec<String>,
    pub scores: Vec<f64>,
    pub summary: QualitySummary,
}

impl QualityReport {
    /// Write `stats.txt` and `scores.txt`
    ///
    /// ### Params
    ///
    /// * `outdir` - The output directory; needs to exist.
    pub fn write_to(&self, outdir: &Path) -> Result<()> {
        let mut stats = WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(outdir.join(STATS_FILE))?;
        stats.write_record(["statistic", "value"])?;
        for (name, value) in [
            ("mean", self.summary.mean),
            ("median", self.summary.median),
            ("lower_quartile", self.summary.lower_quartile),
            ("upper_quartile", self.summary.upper_quartile),
            ("std_dev", self.summary.std_dev),
        ] {
            stats.write_record([name, value.to_string().as_str()])?;
        }
        stats.flush()?;

        let mut scores = WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(outdir.join(SCORES_FILE))?;
        scores.write_record(["cell", "score"])?;
        for (cell, score) in self.cells.iter().zip(&self.scores) {
            scores.write_record([cell.as_str(), score.to_string().as_str()])?;
        }
        scores.flush()?;

        Ok(())
    }
}

////////////////////
// Main functions //
////////////////////

/// Compare the imputed against the measured expression
///
/// ### Params
///
/// * `measured` - The measured target matrix.
/// * `imputed` - The imputed target matrix.
///
/// ### Returns
///
/// The `QualityReport` with one score per imputed cell.
pub fn validate_results(measured: &ExpressionMatrix, imputed: &ExpressionMatrix) -> Result<QualityReport> {
    let genes = shared_genes(measured, imputed);
    if genes.is_empty() {
        return Err(ImputeError::EmptyIntersection {
            n_target_genes: measured.n_genes(),
            n_source_genes: imputed.n_genes(),
        });
    }

    let measured = measured.select_genes(&genes)?;
    let imputed = imputed.select_genes(&genes)?;

    let scores = imputed
        .cells()
        .iter()
        .enumerate()
        .map(|(row, cell)| {
            let measured_row = measured
                .cell_position(cell)
                .ok_or_else(|| ImputeError::unknown_cell(cell.as_str(), "target"))?;
            Ok(cosine_similarity(
                &measured.row_values(measured_row),
                &imputed.row_values(row),
            ))
        })
        .collect::<Result<Vec<f64>>>()?;

    let summary = QualitySummary::from_scores(&scores)?;

    Ok(QualityReport {
        cells: imputed.cells().to_vec(),
        scores,
        summary,
    })
}
