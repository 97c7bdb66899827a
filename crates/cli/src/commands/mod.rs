//! CLI command modules

pub mod batch;
pub mod run;
pub mod validate;

pub use batch::{execute_batch_command, BatchArgs};
pub use run::{execute_grade_command, execute_run_command, GradeArgs, RunArgs};
pub use validate::execute_validate_command;

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use pystep_runtime::{EngineConfig, GradingEngine, PolicyConfig};

/// Command line settings layered over the environment configuration
#[derive(Debug, Clone, Default)]
pub struct EngineOverrides {
    pub allow: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl EngineOverrides {
    fn apply(&self, mut config: EngineConfig) -> Result<EngineConfig> {
        if let Some(allow) = &self.allow {
            let policy = PolicyConfig::from_csv(allow).with_context(|| format!("Invalid --allow list: {:?}", allow))?;
            config = config.with_policy(policy);
        }
        if let Some(ms) = self.timeout_ms {
            if ms == 0 {
                anyhow::bail!("--timeout-ms must be greater than zero");
            }
            config = config.with_timeout(Duration::from_millis(ms));
        }
        Ok(config)
    }
}

/// Build the engine from the environment plus command line overrides.
///
/// Configuration problems abort the process here, before any submission runs.
pub fn build_engine(overrides: &EngineOverrides) -> Result<GradingEngine> {
    let config = EngineConfig::from_env().context("Invalid engine configuration in environment")?;
    let config = overrides.apply(config)?;
    GradingEngine::new(config).context("Invalid engine configuration")
}

/// Read a program from a file, or from stdin when the path is `-`.
pub fn read_source(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("Failed to read program from stdin")?;
        return Ok(source);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read program file: {}", path.display()))
}

#[cfg(test)]
pub(crate) fn test_engine() -> GradingEngine {
    let config = EngineConfig {
        worker_stack_bytes: 64 * 1024 * 1024,
        ..EngineConfig::default()
    }
    .with_policy(PolicyConfig::from_csv("math,random,json,time").unwrap());
    GradingEngine::new(config).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_source_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "print('hi')").unwrap();
        assert_eq!(read_source(file.path()).unwrap(), "print('hi')\n");
    }

    #[test]
    fn test_read_source_missing_file() {
        let err = read_source(Path::new("/definitely/not/here.py")).unwrap_err();
        assert!(err.to_string().contains("Failed to read program file"));
    }

    #[test]
    fn test_overrides() {
        let overrides = EngineOverrides {
            allow: Some("math, json".to_string()),
            timeout_ms: Some(250),
        };
        let config = overrides.apply(EngineConfig::default()).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert!(config.policy.allows_module("json"));
        assert!(!config.policy.allows_module("random"));

        let zero = EngineOverrides {
            allow: None,
            timeout_ms: Some(0),
        };
        assert!(zero.apply(EngineConfig::default()).is_err());

        let empty = EngineOverrides {
            allow: Some(" , ".to_string()),
            timeout_ms: None,
        };
        assert!(empty.apply(EngineConfig::default()).is_err());

        let unchanged = EngineOverrides::default().apply(EngineConfig::default()).unwrap();
        assert_eq!(unchanged, EngineConfig::default());
    }
}
