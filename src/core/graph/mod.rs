//! Anything and everything related to neighbour graphs

pub mod knn;
