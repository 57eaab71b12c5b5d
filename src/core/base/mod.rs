//! Module containing the similarity functions and matrix helpers.

pub mod cors_similarity;
pub mod utils;
