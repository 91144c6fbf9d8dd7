//! # satfarm-format
//!
//! Problem file parsing for satfarm.
//!
//! Supports:
//! - **DIMACS CNF**: Standard SAT competition format

pub mod dimacs;

pub use dimacs::DimacsCnf;
