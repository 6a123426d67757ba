//! Environment detection for run facts.

use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::{BenchError, BenchResult};

use super::schema::Facts;

/// Host information recorded once per harness invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    pub os: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,

    pub arch: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_model: Option<String>,

    pub cpus: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_ram_bytes: Option<u64>,

    /// `LD_PRELOAD` inherited by the harness itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ld_preload: Option<String>,

    pub starttime: String,
}

impl Default for EnvironmentInfo {
    fn default() -> Self {
        EnvironmentInfo {
            hostname: None,
            os: std::env::consts::OS.to_string(),
            kernel: None,
            arch: std::env::consts::ARCH.to_string(),
            cpu_model: None,
            cpus: 1,
            total_ram_bytes: None,
            ld_preload: None,
            starttime: crate::now_string(),
        }
    }
}

impl EnvironmentInfo {
    /// Detect environment information from the current system
    pub fn detect() -> Self {
        use sysinfo::System;

        let mut sys = System::new_all();
        sys.refresh_all();

        let cpu_model = sys.cpus().first().map(|c| c.brand().to_string());
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or_else(|_| sys.cpus().len().max(1));

        EnvironmentInfo {
            hostname: System::host_name(),
            os: System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
            kernel: System::kernel_version(),
            arch: std::env::consts::ARCH.to_string(),
            cpu_model,
            cpus,
            total_ram_bytes: Some(sys.total_memory()),
            ld_preload: std::env::var("LD_PRELOAD").ok(),
            starttime: crate::now_string(),
        }
    }

    /// Write each detected value as a fact.
    pub fn record_into(&self, facts: &mut Facts) {
        if let Ok(serde_json::Value::Object(map)) = serde_json::to_value(self) {
            for (k, v) in map {
                facts.record(k, v);
            }
        }
        facts.record("harness_version", env!("CARGO_PKG_VERSION"));
    }
}

/// Version string of an executable from `<exe> --version`.
pub fn exe_version(executable: &Path) -> Option<String> {
    Command::new(executable)
        .arg("--version")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Write facts to `path`, or to `path/facts.json` if it is a directory.
pub fn store_facts(facts: &Facts, path: &Path) -> BenchResult<()> {
    let file = if path.is_dir() {
        path.join("facts.json")
    } else {
        path.to_path_buf()
    };
    tracing::info!(path = %file.display(), "saving facts");
    std::fs::write(&file, serde_json::to_vec_pretty(facts)?)?;
    Ok(())
}

pub fn load_facts(path: &Path) -> BenchResult<Facts> {
    let file = if path.is_dir() {
        path.join("facts.json")
    } else {
        path.to_path_buf()
    };
    let bytes = match std::fs::read(&file) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BenchError::NotFound(file));
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(path = %file.display(), "loading facts");
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_detect_has_os() {
        let env = EnvironmentInfo::detect();
        assert!(!env.os.is_empty());
        assert!(env.cpus >= 1);
    }

    #[test]
    fn test_record_into_does_not_overwrite() {
        let mut facts = Facts::default();
        facts.record("os", "custom");
        EnvironmentInfo::default().record_into(&mut facts);
        assert_eq!(facts.get("os"), Some(&serde_json::json!("custom")));
        assert!(facts.get("arch").is_some());
        assert!(facts.get("starttime").is_some());
    }

    #[test]
    fn test_facts_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut facts = Facts::default();
        facts.record("hostname", "bench-host");
        store_facts(&facts, dir.path()).unwrap();
        let loaded = load_facts(dir.path()).unwrap();
        assert_eq!(loaded, facts);
    }

    #[test]
    fn test_load_facts_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_facts(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, BenchError::NotFound(_)));
    }
}
