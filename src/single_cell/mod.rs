//! Contains the imputation of gene expression from a single cell reference
//! into target cells (e.g. spatial spots) that only measure a subset of the
//! genes. The stages build on the similarity and kNN helpers in `core`.

pub mod chunk_merge;
pub mod gene_alignment;
pub mod imputation;
pub mod neighbour_similarity;
pub mod params;
pub mod pipeline;
pub mod quality;
