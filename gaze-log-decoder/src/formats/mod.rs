//! Input format parsers (ASC, exported JSON datasets)
//!
//! Each parser turns one source file into an ordered `TrialSet`. Format
//! selection by file extension lives in the session layer.

pub mod asc;
pub mod json;

pub use asc::AscParser;
pub use json::read_dataset;
