//! Engine Configuration Module
//!
//! Configuration is loaded once at startup, from the environment or built
//! explicitly, and then shared read-only by every request.

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;

/// Default wall-clock limit per run (seconds)
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 2;

/// Default module allow-list
pub const DEFAULT_ALLOWED_IMPORTS: &str = "math,random,datetime,json";

/// Callables rejected by name before anything runs
pub const DEFAULT_BANNED_CALLABLES: &[&str] = &["open", "eval", "exec", "compile", "__import__"];

/// Advertised memory ceiling (MB). Not enforced by the engine.
pub const DEFAULT_MAX_MEMORY_MB: u64 = 128;

/// Largest accepted submission (64KB)
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 64 * 1024;

/// Largest captured standard output (1MB)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Deepest allowed chain of nested calls
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1000;

/// Stack reserved for each execution worker (256MB)
pub const DEFAULT_WORKER_STACK_BYTES: usize = 256 * 1024 * 1024;

pub const ENV_EXECUTION_TIMEOUT: &str = "EXECUTION_TIMEOUT";
pub const ENV_ALLOWED_IMPORTS: &str = "ALLOWED_IMPORTS";
pub const ENV_MAX_MEMORY_MB: &str = "MAX_MEMORY_MB";

/// Configuration errors. Raised at startup, never per request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },

    #[error("Module allow-list is empty")]
    EmptyAllowList,

    #[error("Invalid module name in allow-list: {name:?}")]
    InvalidModuleName { name: String },

    #[error("Execution timeout must be greater than zero")]
    ZeroTimeout,

    #[error("Memory limit must be greater than zero")]
    ZeroMemory,
}

/// What a submission may import and call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    allowed_modules: BTreeSet<String>,
    banned_callables: BTreeSet<String>,
    max_source_bytes: usize,
}

impl PolicyConfig {
    /// Build a policy from allow-listed top-level module names.
    pub fn new<I, S>(allowed_modules: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut modules = BTreeSet::new();
        for name in allowed_modules {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            if !is_module_name(name) {
                return Err(ConfigError::InvalidModuleName {
                    name: name.to_string(),
                });
            }
            modules.insert(name.to_string());
        }
        if modules.is_empty() {
            return Err(ConfigError::EmptyAllowList);
        }

        Ok(Self {
            allowed_modules: modules,
            banned_callables: DEFAULT_BANNED_CALLABLES.iter().map(|s| s.to_string()).collect(),
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
        })
    }

    /// Build a policy from a comma separated list such as `"math,random"`.
    pub fn from_csv(list: &str) -> Result<Self, ConfigError> {
        Self::new(list.split(','))
    }

    /// Replace the banned-callable set.
    pub fn with_banned_callables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.banned_callables = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_source_bytes(mut self, max_source_bytes: usize) -> Self {
        self.max_source_bytes = max_source_bytes;
        self
    }

    /// Whether an import of `module` is allowed. Only the first dotted
    /// component is checked, so `math.x` is judged as `math`.
    pub fn allows_module(&self, module: &str) -> bool {
        let top = module.split('.').next().unwrap_or(module);
        self.allowed_modules.contains(top)
    }

    pub fn is_banned(&self, callable: &str) -> bool {
        self.banned_callables.contains(callable)
    }

    pub fn allowed_modules(&self) -> impl Iterator<Item = &str> {
        self.allowed_modules.iter().map(String::as_str)
    }

    pub fn banned_callables(&self) -> impl Iterator<Item = &str> {
        self.banned_callables.iter().map(String::as_str)
    }

    pub fn max_source_bytes(&self) -> usize {
        self.max_source_bytes
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_modules: DEFAULT_ALLOWED_IMPORTS.split(',').map(str::to_string).collect(),
            banned_callables: DEFAULT_BANNED_CALLABLES.iter().map(|s| s.to_string()).collect(),
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Static import / call policy
    pub policy: PolicyConfig,
    /// Default wall-clock limit per run
    pub timeout: Duration,
    /// Advertised memory ceiling in MB (not enforced)
    pub max_memory_mb: u64,
    /// Captured stdout beyond this raises MemoryError in the program
    pub max_output_bytes: usize,
    /// Nested call limit before RecursionError
    pub max_call_depth: usize,
    /// Stack size of each worker thread
    pub worker_stack_bytes: usize,
    /// Seed for the `random` module, so runs are reproducible
    pub random_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            timeout: Duration::from_secs(DEFAULT_EXECUTION_TIMEOUT_SECS),
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            worker_stack_bytes: DEFAULT_WORKER_STACK_BYTES,
            random_seed: 0,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// `EXECUTION_TIMEOUT` is in seconds and may be fractional.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_EXECUTION_TIMEOUT) {
            let seconds: f64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                var: ENV_EXECUTION_TIMEOUT.to_string(),
                value: raw.clone(),
                reason: "expected a number of seconds".to_string(),
            })?;
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(ConfigError::InvalidValue {
                    var: ENV_EXECUTION_TIMEOUT.to_string(),
                    value: raw,
                    reason: "expected a non-negative number of seconds".to_string(),
                });
            }
            config.timeout = Duration::from_secs_f64(seconds);
        }

        if let Some(raw) = lookup(ENV_ALLOWED_IMPORTS) {
            config.policy = PolicyConfig::from_csv(&raw)?;
        }

        if let Some(raw) = lookup(ENV_MAX_MEMORY_MB) {
            config.max_memory_mb = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                var: ENV_MAX_MEMORY_MB.to_string(),
                value: raw.clone(),
                reason: "expected a whole number of megabytes".to_string(),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    /// Check the invariants every engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.policy.allowed_modules.is_empty() {
            return Err(ConfigError::EmptyAllowList);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_memory_mb == 0 {
            return Err(ConfigError::ZeroMemory);
        }
        Ok(())
    }
}

fn is_module_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.max_memory_mb, 128);
        let modules: Vec<&str> = config.policy.allowed_modules().collect();
        assert_eq!(modules, vec!["datetime", "json", "math", "random"]);
        assert!(config.policy.is_banned("eval"));
        assert!(config.policy.is_banned("__import__"));
        assert!(!config.policy.is_banned("print"));
    }

    #[test]
    fn test_environment_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("EXECUTION_TIMEOUT", "0.5"),
            ("ALLOWED_IMPORTS", " math , random "),
            ("MAX_MEMORY_MB", "64"),
        ]))
        .unwrap();
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.max_memory_mb, 64);
        assert!(config.policy.allows_module("math"));
        assert!(config.policy.allows_module("random"));
        assert!(!config.policy.allows_module("json"));
    }

    #[test]
    fn test_allows_module_uses_top_component() {
        let policy = PolicyConfig::from_csv("math").unwrap();
        assert!(policy.allows_module("math.tau"));
        assert!(!policy.allows_module("os.path"));
        assert!(!policy.allows_module("mathematics"));
    }

    #[test]
    fn test_empty_allow_list_is_rejected() {
        assert_eq!(PolicyConfig::from_csv(" , ").unwrap_err(), ConfigError::EmptyAllowList);
        let err = EngineConfig::from_lookup(lookup_from(&[("ALLOWED_IMPORTS", "")])).unwrap_err();
        assert_eq!(err, ConfigError::EmptyAllowList);
    }

    #[test]
    fn test_invalid_values() {
        let err = EngineConfig::from_lookup(lookup_from(&[("EXECUTION_TIMEOUT", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = EngineConfig::from_lookup(lookup_from(&[("EXECUTION_TIMEOUT", "0")])).unwrap_err();
        assert_eq!(err, ConfigError::ZeroTimeout);

        let err = EngineConfig::from_lookup(lookup_from(&[("MAX_MEMORY_MB", "0")])).unwrap_err();
        assert_eq!(err, ConfigError::ZeroMemory);

        let err = PolicyConfig::from_csv("math,os.path").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidModuleName { .. }));
    }

    #[test]
    fn test_custom_banned_callables() {
        let policy = PolicyConfig::default().with_banned_callables(["input"]);
        assert!(policy.is_banned("input"));
        assert!(!policy.is_banned("eval"));
    }
}
