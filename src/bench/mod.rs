//! Benchmark and target definitions.

pub mod config;

pub use config::{BenchmarkSpec, DEFAULT_MEASURE_CMD, ThreadScaling, load_benchmark, load_targets};
