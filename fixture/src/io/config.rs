//! Runner defaults stored in a TOML file (default `fixture.toml`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::context::TestContext;
use crate::core::options::RunOptions;
use crate::io::sink::OutputSink;
use crate::memory::{Allocator, GuardedAllocator, SystemAllocator};
use crate::patch::DEFAULT_CAPACITY;

/// Suite defaults read from `fixture.toml`.
///
/// Every field is optional in the file; command-line options are applied on
/// top of the values loaded here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Print test labels and ` PASS` instead of progress dots.
    pub verbose: bool,

    /// Number of times the suite runs.
    pub repeat: u32,

    /// Only run tests whose group contains this substring.
    pub group_filter: Option<String>,

    /// Only run tests whose name contains this substring.
    pub name_filter: Option<String>,

    /// Route test allocations through the guarded allocator.
    pub guarded_allocator: bool,

    /// Maximum number of live pointer patches per test.
    pub patch_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            repeat: 1,
            group_filter: None,
            name_filter: None,
            guarded_allocator: true,
            patch_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.repeat == 0 {
            return Err(anyhow!("repeat must be > 0"));
        }
        if self.patch_capacity == 0 {
            return Err(anyhow!("patch_capacity must be > 0"));
        }
        Ok(())
    }

    /// Run options before any command-line arguments are applied.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            verbose: self.verbose,
            repeat: self.repeat,
            group_filter: self.group_filter.clone(),
            name_filter: self.name_filter.clone(),
        }
    }

    /// Build a context writing to `out` with the configured allocator and
    /// patch capacity.
    pub fn build_context(&self, out: Box<dyn OutputSink>) -> TestContext {
        let allocator: Box<dyn Allocator> = if self.guarded_allocator {
            Box::new(GuardedAllocator::new())
        } else {
            Box::new(SystemAllocator::new())
        };
        TestContext::new(self.run_options(), out)
            .with_allocator(allocator)
            .with_patch_capacity(self.patch_capacity)
    }
}

/// Read and validate `path`; a missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::sink::BufferSink;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RunnerConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("fixture.toml");
        fs::write(&path, "repeat = 3\ngroup_filter = \"Memory\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.repeat, 3);
        assert_eq!(cfg.group_filter.as_deref(), Some("Memory"));
        assert!(cfg.guarded_allocator);
        assert_eq!(cfg.patch_capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn zero_repeat_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("fixture.toml");
        fs::write(&path, "repeat = 0\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("repeat must be > 0"));
    }

    #[test]
    fn zero_patch_capacity_is_rejected() {
        let cfg = RunnerConfig {
            patch_capacity: 0,
            ..RunnerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn malformed_file_names_the_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("fixture.toml");
        fs::write(&path, "repeat = \"many\"\n").expect("write");
        let err = load_config(&path).expect_err("parse error");
        assert!(err.to_string().contains("fixture.toml"));
    }

    #[test]
    fn context_uses_configured_capacity() {
        let cfg = RunnerConfig {
            verbose: true,
            patch_capacity: 7,
            guarded_allocator: false,
            ..RunnerConfig::default()
        };
        let ctx = cfg.build_context(Box::new(BufferSink::new()));
        assert_eq!(ctx.patches().capacity(), 7);
        assert!(ctx.options().verbose);
    }
}
