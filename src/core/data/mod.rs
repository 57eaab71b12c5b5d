//! Module containing anything and everything related to data and data
//! structures

pub mod expression;
pub mod synthetic_data;
pub mod tsv_io;
