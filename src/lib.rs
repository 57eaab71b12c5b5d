//! Gene expression imputation for target cells from their most similar
//! source cells.
//!
//! The workflow aligns the gene space of both datasets, finds the `k` most
//! similar source cells per target cell (optionally within clusters),
//! averages their expression weighted by similarity in chunks and merges the
//! chunks into the final matrix.

pub mod core;
pub mod error;
pub mod single_cell;
pub mod utils;

pub use crate::core::base::cors_similarity::SimilarityMetric;
pub use crate::core::data::expression::{
    ClusterAssignment, ClusterSource, ExpressionMatrix, MatrixSource,
};
pub use crate::error::{ImputeError, Result};
pub use crate::single_cell::chunk_merge::{merge_chunk_dir, merge_chunks};
pub use crate::single_cell::gene_alignment::{align_genes, AlignedMatrices};
pub use crate::single_cell::imputation::{impute_expression, impute_expression_to_dir};
pub use crate::single_cell::neighbour_similarity::{neighbour_table, NeighbourRecord, NeighbourTable};
pub use crate::single_cell::params::{ImputationParams, RunControl};
pub use crate::single_cell::pipeline::{expression_imputation, ImputationResult};
pub use crate::single_cell::quality::{validate_results, QualityReport};
