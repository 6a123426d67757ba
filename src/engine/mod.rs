//! Engine module: executes a benchmark across targets and permutations.
//!
//! # Architecture
//!
//! - **template**: `{placeholder}` substitution for every command template.
//! - **environment**: the per-target child environment (preloads, library
//!   and search paths). The harness's own environment is never changed.
//! - **server**: start/prepare/shutdown of auxiliary servers, owned by a
//!   guard that terminates them when dropped.
//! - **capture**: profiler CSV and side-channel status file parsing.
//! - **hooks**: optional benchmark callbacks.
//! - **preflight**: setup checks that abort before anything runs.
//! - **runner**: the `ExecutionEngine` loop tying these together.
//!
//! # Failure handling
//!
//! Only preflight errors propagate. A server that fails to start or a single
//! failing invocation is recorded as an empty record, later replaced by a
//! NaN record with the shape of the last valid one.

pub mod capture;
pub mod environment;
pub mod hooks;
pub mod preflight;
pub mod runner;
pub mod server;
pub mod template;

// Re-export key types for convenience
pub use environment::ChildEnv;
pub use hooks::BenchmarkHooks;
pub use runner::{ExecutionEngine, RunSummary};
pub use server::{ServerGroup, ServerSpec};
pub use template::{Substitutions, TemplateError};
