//! Error types shared by every stage of the imputation workflow.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ImputeError>;

/// Errors that can occur during gene expression imputation.
///
/// Every variant carries the minimal context needed to locate the faulty
/// input (file path, cell, cluster or chunk).
#[derive(Debug, Error)]
pub enum ImputeError {
    /// A required input file does not exist.
    #[error("Input file not found: {}", path.display())]
    InputNotFound { path: PathBuf },

    /// The input exists, but is not something that can be read as a table.
    #[error("Invalid input type for {}: {reason}", path.display())]
    InvalidInputType { path: PathBuf, reason: String },

    /// A table could be opened, but its content is not usable.
    #[error("Malformed table {table} (line {line}): {message}")]
    MalformedTable {
        table: String,
        line: usize,
        message: String,
    },

    /// The two expression matrices do not share a single gene.
    #[error(
        "No shared genes between target ({n_target_genes} genes) and source ({n_source_genes} genes)"
    )]
    EmptyIntersection {
        n_target_genes: usize,
        n_source_genes: usize,
    },

    /// A parameter is outside of its valid range.
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// The similarity metric is not supported.
    #[error("Invalid similarity metric '{metric}'. Supported: 'cosine_similarity'")]
    InvalidMetric { metric: String },

    /// A target cell has no entry in the neighbour table.
    #[error("No neighbours found for target cell '{cell}'")]
    NoNeighbours { cell: String },

    /// A cell identifier is referenced, but absent from the matrix.
    #[error("Cell '{cell}' not found in the {matrix} matrix")]
    UnknownCell { cell: String, matrix: String },

    /// The neighbour weights of a target cell sum to zero.
    #[error("Neighbour weights of target cell '{cell}' sum to zero")]
    ZeroWeightSum { cell: String },

    /// A chunk index is missing at merge time.
    #[error("Chunk {expected} is missing (found chunk indices {found:?})")]
    MissingChunk { expected: usize, found: Vec<usize> },

    /// The same chunk index was found more than once at merge time.
    #[error("Chunk {index} is present more than once")]
    DuplicateChunk { index: usize },

    /// The run exceeded its time limit.
    #[error("Deadline of {limit:.2?} exceeded during {stage}")]
    DeadlineExceeded { limit: Duration, stage: String },

    /// The run was cancelled between two chunks.
    #[error("Run cancelled after {completed_chunks} completed chunks")]
    Cancelled { completed_chunks: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ImputeError {
    /// Create an InvalidParameter error.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Create a MalformedTable error.
    pub fn malformed(table: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::MalformedTable {
            table: table.into(),
            line,
            message: message.into(),
        }
    }

    /// Create an UnknownCell error.
    pub fn unknown_cell(cell: impl Into<String>, matrix: impl Into<String>) -> Self {
        Self::UnknownCell {
            cell: cell.into(),
            matrix: matrix.into(),
        }
    }
}
