//! Child process environment for one target.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::Target;

/// Environment handed to every process spawned for one target. The
/// harness's own environment is never modified.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChildEnv {
    vars: BTreeMap<String, String>,
}

impl ChildEnv {
    /// Start from the harness's inherited environment. Variables that are
    /// not valid UTF-8 are dropped.
    pub fn inherited() -> Self {
        Self::from_vars(
            std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))),
        )
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        ChildEnv {
            vars: vars.into_iter().collect(),
        }
    }

    /// Compose the environment for `target`: the preload list gets the
    /// instrumentation preloads and then the target's own, and the library
    /// path gets the target's directory appended.
    pub fn for_target(mut self, target: &Target, instrumentation_preloads: &[String]) -> Self {
        let mut preload: Vec<&str> = Vec::new();
        let existing = self.vars.get("LD_PRELOAD").cloned().unwrap_or_default();
        preload.extend(existing.split_whitespace());
        preload.extend(instrumentation_preloads.iter().map(String::as_str));
        preload.extend(target.preload.split_whitespace());
        let preload = preload.join(" ");
        if preload.is_empty() {
            self.vars.remove("LD_PRELOAD");
        } else {
            self.vars.insert("LD_PRELOAD".into(), preload);
        }

        if let Some(lib) = target.library_path.as_deref().filter(|l| !l.is_empty()) {
            self.append("LD_LIBRARY_PATH", lib);
        }
        self
    }

    /// Append `dirs` to `PATH`.
    pub fn with_search_paths(mut self, dirs: &[PathBuf]) -> Self {
        for dir in dirs {
            self.append("PATH", &dir.to_string_lossy());
        }
        self
    }

    fn append(&mut self, key: &str, value: &str) {
        let joined = match self.vars.get(key) {
            Some(current) if !current.is_empty() => format!("{current}:{value}"),
            _ => value.to_string(),
        };
        self.vars.insert(key.to_string(), joined);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn preload(&self) -> &str {
        self.get("LD_PRELOAD").unwrap_or_default()
    }

    pub fn library_path(&self) -> Option<&str> {
        self.get("LD_LIBRARY_PATH")
    }

    /// Directories of the child's `PATH`.
    pub fn search_path(&self) -> Vec<PathBuf> {
        self.get("PATH")
            .map(|p| std::env::split_paths(p).collect())
            .unwrap_or_default()
    }

    /// Apply to a command, replacing whatever it would have inherited.
    pub fn apply(&self, cmd: &mut std::process::Command) {
        cmd.env_clear().envs(&self.vars);
    }

    /// Resolve a bare program name against this environment's `PATH`.
    /// Names containing a slash are returned as given.
    pub fn resolve(&self, program: &str) -> PathBuf {
        if program.contains('/') {
            return PathBuf::from(program);
        }
        super::preflight::find_in(program, &self.search_path())
            .unwrap_or_else(|| Path::new(program).to_path_buf())
    }
}
