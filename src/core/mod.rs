//! Core types for matrix-bench.
//!
//! This module contains the parameter space, the result data model and the
//! in-memory `ResultStore` populated by the engine.

pub mod env;
pub mod float;
pub mod schema;
pub mod space;
pub mod store;

// Re-export key types for convenience
pub use env::EnvironmentInfo;
pub use schema::{
    FieldStats, Facts, PermutationStats, RawRecord, SCHEMA_VERSION, Scalar, Statistic, Target,
};
pub use space::{ParamValue, ParameterSpace, Permutation, scale_threads_for_cpus};
pub use store::{ResultStore, TargetStats};
