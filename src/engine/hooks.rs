//! Optional per-benchmark callbacks.

use crate::core::{Permutation, RawRecord, Target};

/// Extracts benchmark-specific fields from a successful run's output.
pub type OutputHook =
    Box<dyn Fn(&mut RawRecord, &str, &str, &Target, &Permutation) -> anyhow::Result<()>>;

/// Called around each target's permutation sweep with the repetition index.
pub type TargetHook = Box<dyn Fn(&Target, usize) -> anyhow::Result<()>>;

pub type CleanupHook = Box<dyn Fn() -> anyhow::Result<()>>;

/// Callbacks a benchmark may provide. Absent callbacks are skipped; errors
/// returned by present ones are logged and never abort the run.
#[derive(Default)]
pub struct BenchmarkHooks {
    pub on_output_captured: Option<OutputHook>,
    pub before_target_run: Option<TargetHook>,
    pub after_target_run: Option<TargetHook>,
    /// Runs once after the last repetition.
    pub cleanup: Option<CleanupHook>,
}

impl BenchmarkHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_output_captured(
        mut self,
        hook: impl Fn(&mut RawRecord, &str, &str, &Target, &Permutation) -> anyhow::Result<()>
        + 'static,
    ) -> Self {
        self.on_output_captured = Some(Box::new(hook));
        self
    }

    pub fn before_target_run(
        mut self,
        hook: impl Fn(&Target, usize) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.before_target_run = Some(Box::new(hook));
        self
    }

    pub fn after_target_run(
        mut self,
        hook: impl Fn(&Target, usize) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.after_target_run = Some(Box::new(hook));
        self
    }

    pub fn cleanup(mut self, hook: impl Fn() -> anyhow::Result<()> + 'static) -> Self {
        self.cleanup = Some(Box::new(hook));
        self
    }
}

impl std::fmt::Debug for BenchmarkHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchmarkHooks")
            .field("on_output_captured", &self.on_output_captured.is_some())
            .field("before_target_run", &self.before_target_run.is_some())
            .field("after_target_run", &self.after_target_run.is_some())
            .field("cleanup", &self.cleanup.is_some())
            .finish()
    }
}
