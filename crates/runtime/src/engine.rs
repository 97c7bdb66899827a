//! Grading engine
//!
//! [`GradingEngine`] ties the pieces together: the policy validator rejects a
//! submission before anything runs, an accepted one is executed by the
//! supervisor inside a freshly built namespace, and the outcome is normalized
//! and, when an expectation is given, graded.
//!
//! Nothing here returns an error per request. Every failure becomes an
//! [`ExecutionResult`] with an error status.

use std::sync::Arc;
use std::time::Duration;

use pystep_protocol::{ExecutionResult, GradedResult, GradingRequest, GradingResponse, ValidationVerdict};
use tracing::{debug, info};

use crate::config::{ConfigError, EngineConfig, PolicyConfig};
use crate::execution::ExecutionSupervisor;
use crate::grading::{GradingComparator, ResultNormalizer};
use crate::sandbox::NamespaceBuilder;
use crate::validation::PolicyValidator;

/// Short identifier for a submission in logs.
pub fn submission_digest(source: &str) -> String {
    let hash = blake3::hash(source.as_bytes());
    hash.to_hex().as_str()[..12].to_string()
}

/// Validates, runs and grades submissions under one configuration
#[derive(Debug, Clone)]
pub struct GradingEngine {
    config: Arc<EngineConfig>,
    policy: Arc<PolicyConfig>,
    validator: PolicyValidator,
    supervisor: ExecutionSupervisor,
    normalizer: ResultNormalizer,
    comparator: GradingComparator,
}

impl GradingEngine {
    /// Build an engine. An invalid configuration is fatal to the caller.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let policy = Arc::new(config.policy.clone());
        info!(
            timeout_ms = config.timeout.as_millis() as u64,
            allowed = ?policy.allowed_modules().collect::<Vec<_>>(),
            max_memory_mb = config.max_memory_mb,
            "grading engine ready (memory limit is advisory)"
        );
        Ok(Self {
            validator: PolicyValidator::new(policy.clone()),
            supervisor: ExecutionSupervisor::new(&config),
            normalizer: ResultNormalizer,
            comparator: GradingComparator,
            config: Arc::new(config),
            policy,
        })
    }

    /// Engine configured from `EXECUTION_TIMEOUT`, `ALLOWED_IMPORTS` and `MAX_MEMORY_MB`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(EngineConfig::from_env()?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Static check only. Nothing is executed.
    pub fn validate_only(&self, source: &str) -> ValidationVerdict {
        let verdict = self.validator.validate(source);
        debug!(
            submission = %submission_digest(source),
            accepted = verdict.is_accepted(),
            "validated submission"
        );
        verdict
    }

    /// Run a submission without grading it. `timeout` overrides the configured deadline.
    pub async fn execute(&self, source: &str, input: &str, timeout: Option<Duration>) -> ExecutionResult {
        let digest = submission_digest(source);
        let program = match self.validator.check(source) {
            Ok(program) => program,
            Err(violations) => {
                let result = self.normalizer.violations(&violations);
                info!(submission = %digest, reason = %result.error, "submission rejected");
                return result;
            }
        };

        let deadline = timeout.unwrap_or(self.config.timeout);
        let namespace = NamespaceBuilder::new(self.policy.clone())
            .with_input(input)
            .with_random_seed(self.config.random_seed)
            .build();

        let raw = self.supervisor.run(program, namespace, deadline).await;
        if !raw.stderr.is_empty() {
            debug!(submission = %digest, stderr = %raw.stderr.trim_end(), "captured error channel");
        }
        let elapsed = raw.elapsed;
        let result = self.normalizer.normalize(raw, elapsed);
        info!(
            submission = %digest,
            status = ?result.status,
            execution_time_ms = result.execution_time_ms,
            "submission executed"
        );
        result
    }

    /// Run a submission and compare its output with `expected_output`.
    pub async fn execute_and_grade(
        &self,
        source: &str,
        expected_output: &str,
        input: &str,
        timeout: Option<Duration>,
    ) -> GradedResult {
        let result = self.execute(source, input, timeout).await;
        let graded = self.comparator.grade(result, expected_output);
        info!(
            submission = %submission_digest(source),
            passed = graded.passed,
            "submission graded"
        );
        graded
    }

    /// Serve one request: graded when it carries an expected output.
    pub async fn handle(&self, request: &GradingRequest) -> GradingResponse {
        let timeout = request.timeout_ms.map(Duration::from_millis);
        match &request.expected_output {
            Some(expected) => GradingResponse::Graded(
                self.execute_and_grade(&request.code, expected, &request.input_data, timeout)
                    .await,
            ),
            None => GradingResponse::Executed(self.execute(&request.code, &request.input_data, timeout).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pystep_protocol::ExecutionStatus;

    fn engine(modules: &str) -> GradingEngine {
        let config = EngineConfig {
            worker_stack_bytes: 64 * 1024 * 1024,
            ..EngineConfig::default()
        }
        .with_policy(PolicyConfig::from_csv(modules).unwrap());
        GradingEngine::new(config).unwrap()
    }

    #[test]
    fn test_digest_is_stable_and_short() {
        assert_eq!(submission_digest("print(1)"), submission_digest("print(1)"));
        assert_ne!(submission_digest("print(1)"), submission_digest("print(2)"));
        assert_eq!(submission_digest("").len(), 12);
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let config = EngineConfig::default().with_timeout(Duration::ZERO);
        assert_eq!(GradingEngine::new(config).unwrap_err(), ConfigError::ZeroTimeout);
    }

    #[test]
    fn test_validate_only_does_not_run() {
        let engine = engine("math");
        assert!(engine.validate_only("import math\nprint(1)").is_accepted());
        let verdict = engine.validate_only("import os");
        assert!(verdict.reason().unwrap().contains("os"));
    }

    #[tokio::test]
    async fn test_execute_with_input() {
        let engine = engine("math");
        let result = engine
            .execute("name = input('Name: ')\nprint('Hi,', name)", "Ana\n", None)
            .await;
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.output, "Hi, Ana\n");
    }

    #[tokio::test]
    async fn test_rejected_submission_is_not_run() {
        let engine = engine("math,random");
        let result = engine.execute("print('ran')\nimport os", "", None).await;
        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(result.output.is_empty());
        assert_eq!(result.execution_time_ms, 0.0);
        assert!(result.error.contains("'os'"));
    }

    #[tokio::test]
    async fn test_grading_passes_on_trimmed_match() {
        let engine = engine("math");
        let graded = engine
            .execute_and_grade("print(5 + 3)", " 8 \n", "", None)
            .await;
        assert!(graded.passed);
        assert_eq!(graded.actual, "8");
    }

    #[tokio::test]
    async fn test_timeout_override() {
        let engine = engine("math");
        let result = engine
            .execute("while True:\n    pass", "", Some(Duration::from_millis(100)))
            .await;
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.execution_time_ms, 100.0);
        assert_eq!(result.error, "execution time limit exceeded (100ms)");
    }

    #[tokio::test]
    async fn test_handle_picks_response_shape() {
        let engine = engine("math");
        let graded = engine
            .handle(&GradingRequest::new("print(2 ** 10)").with_expected_output("1024"))
            .await;
        match graded {
            GradingResponse::Graded(graded) => assert!(graded.passed),
            other => panic!("expected a graded response, got {:?}", other),
        }

        let executed = engine.handle(&GradingRequest::new("print(len('abc'))")).await;
        match executed {
            GradingResponse::Executed(result) => assert_eq!(result.output, "3\n"),
            other => panic!("expected an execution result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_random_is_reproducible_across_runs() {
        let engine = engine("random");
        let source = "import random\nprint([random.randint(1, 100) for _ in range(5)])";
        let first = engine.execute(source, "", None).await;
        let second = engine.execute(source, "", None).await;
        assert!(first.is_success());
        assert_eq!(first.output, second.output);
    }
}
