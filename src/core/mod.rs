//! Core building blocks: similarities, data structures and graph helpers

pub mod base;
pub mod data;
pub mod graph;
