//! Storage layer for benchmark results.
//!
//! A whole `ResultStore` is persisted as one JSON document per benchmark.

pub mod result_file;

// Re-export key types
pub use result_file::ResultFile;
