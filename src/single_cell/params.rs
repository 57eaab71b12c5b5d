use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::base::cors_similarity::{parse_similarity_metric, SimilarityMetric};
use crate::core::data::tsv_io::check_input_file;
use crate::error::{ImputeError, Result};

////////////
// Params //
////////////

/// ImputationParams
///
/// ### Fields
///
/// * `metric` - Similarity metric. Only `"cosine_similarity"` is supported.
/// * `k_neighbours` - Number of neighbours per target cell.
/// * `consider_clusters` - Only search for neighbours within the same
///   cluster.
/// * `chunk_size` - Number of target cells per imputation chunk.
/// * `keep_artifacts` - Keep the chunk files after merging.
/// * `outdir` - Output directory; created if absent.
/// * `cell_name_column_idx` - Column of the cluster table with the cell
///   names.
/// * `verbose` - Controls verbosity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImputationParams {
    pub metric: String,
    pub k_neighbours: usize,
    pub consider_clusters: bool,
    pub chunk_size: usize,
    pub keep_artifacts: bool,
    pub outdir: PathBuf,
    pub cell_name_column_idx: usize,
    pub verbose: bool,
}

impl Default for ImputationParams {
    fn default() -> Self {
        Self {
            metric: SimilarityMetric::Cosine.as_str().to_string(),
            k_neighbours: 25,
            consider_clusters: true,
            chunk_size: 1000,
            keep_artifacts: true,
            outdir: PathBuf::from("imputation_output"),
            cell_name_column_idx: 0,
            verbose: false,
        }
    }
}

impl ImputationParams {
    /// Load the parameters from a JSON file
    ///
    /// Missing fields fall back to their defaults.
    ///
    /// ### Params
    ///
    /// * `path` - Path to the JSON file
    ///
    /// ### Returns
    ///
    /// The validated `ImputationParams`.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        check_input_file(path)?;
        let reader = BufReader::new(File::open(path)?);
        let params: Self = serde_json::from_reader(reader)?;
        params.validate()?;
        Ok(params)
    }

    /// Check the parameters
    ///
    /// ### Returns
    ///
    /// The parsed `SimilarityMetric` if all parameters are valid.
    pub fn validate(&self) -> Result<SimilarityMetric> {
        let metric =
            parse_similarity_metric(&self.metric).ok_or_else(|| ImputeError::InvalidMetric {
                metric: self.metric.clone(),
            })?;

        if self.k_neighbours == 0 {
            return Err(ImputeError::invalid_parameter(
                "k_neighbours needs to be a positive integer",
            ));
        }
        if self.chunk_size == 0 {
            return Err(ImputeError::invalid_parameter(
                "chunk_size needs to be a positive integer",
            ));
        }

        Ok(metric)
    }
}

/////////////////
// Run control //
/////////////////

/// RunControl
///
/// Deadline and cooperative cancellation for a run. Checked between stages
/// and between chunks, never inside a chunk.
///
/// ### Fields
///
/// * `started` - When the run started.
/// * `limit` - Optional time limit for the whole run.
/// * `cancel` - Optional flag; once set, remaining chunks are abandoned.
#[derive(Debug, Clone)]
pub struct RunControl {
    started: Instant,
    limit: Option<Duration>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    /// Run without deadline and cancellation
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            limit: None,
            cancel: None,
        }
    }

    /// Set a time limit, counted from the creation of the `RunControl`
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Attach a cancellation flag
    pub fn with_cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Has cancellation been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Fail if the deadline has passed
    ///
    /// ### Params
    ///
    /// * `stage` - Description of the current stage for the error message.
    pub fn check_deadline(&self, stage: &str) -> Result<()> {
        match self.limit {
            Some(limit) if self.started.elapsed() > limit => Err(ImputeError::DeadlineExceeded {
                limit,
                stage: stage.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Check cancellation and deadline before the next chunk
    ///
    /// ### Params
    ///
    /// * `completed_chunks` - Number of chunks finished so far.
    pub fn check_between_chunks(&self, completed_chunks: usize) -> Result<()> {
        if self.is_cancelled() {
            return Err(ImputeError::Cancelled { completed_chunks });
        }
        self.check_deadline(&format!("imputation chunk {}", completed_chunks))
    }
}
