//! Result Normalizer and Grading Comparator
//!
//! A [`RawRun`] is folded into the wire [`ExecutionResult`], and a result is
//! graded against an expected output by trimming both sides and comparing
//! them exactly.

use std::time::Duration;

use pystep_protocol::{ExecutionResult, GradedResult};

use crate::execution::{RawRun, RunOutcome};
use crate::validation::PolicyViolation;

/// Convert a duration to fractional milliseconds.
pub fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Turns supervisor output into an [`ExecutionResult`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultNormalizer;

impl ResultNormalizer {
    /// Normalize a finished run. `elapsed` is the wall time measured by the caller.
    pub fn normalize(&self, raw: RawRun, elapsed: Duration) -> ExecutionResult {
        match raw.outcome {
            RunOutcome::Completed => ExecutionResult::success(raw.stdout, millis(elapsed)),
            RunOutcome::Faulted { message } => ExecutionResult::failure(raw.stdout, message, millis(elapsed)),
            RunOutcome::TimedOut { deadline } => ExecutionResult::failure(
                raw.stdout,
                timeout_message(deadline),
                millis(deadline),
            ),
        }
    }

    /// A submission the validator refused. Nothing ran, so no time passed.
    pub fn rejected(&self, reason: impl Into<String>) -> ExecutionResult {
        ExecutionResult::failure(String::new(), reason, 0.0)
    }

    /// Rejection from the validator's list of violations. The first one is reported.
    pub fn violations(&self, violations: &[PolicyViolation]) -> ExecutionResult {
        let reason = violations
            .first()
            .map(|violation| violation.to_string())
            .unwrap_or_else(|| "submission rejected".to_string());
        self.rejected(reason)
    }
}

pub fn timeout_message(deadline: Duration) -> String {
    format!("execution time limit exceeded ({}ms)", deadline.as_millis())
}

/// Decides pass/fail against an expected output
#[derive(Debug, Clone, Copy, Default)]
pub struct GradingComparator;

impl GradingComparator {
    pub fn grade(&self, result: ExecutionResult, expected: &str) -> GradedResult {
        let expected = expected.trim().to_string();
        if !result.is_success() {
            return GradedResult {
                execution: result,
                passed: false,
                expected,
                actual: String::new(),
            };
        }
        let actual = result.output.trim().to_string();
        GradedResult {
            passed: actual == expected,
            execution: result,
            expected,
            actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pystep_protocol::ExecutionStatus;

    fn raw(stdout: &str, outcome: RunOutcome) -> RawRun {
        RawRun {
            stdout: stdout.to_string(),
            stderr: String::new(),
            outcome,
            elapsed: Duration::from_millis(3),
        }
    }

    #[test]
    fn test_completed_run_is_success() {
        let result = ResultNormalizer.normalize(raw("8\n", RunOutcome::Completed), Duration::from_millis(4));
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.output, "8\n");
        assert!(result.error.is_empty());
        assert_eq!(result.execution_time_ms, 4.0);
    }

    #[test]
    fn test_fault_keeps_message_and_output() {
        let outcome = RunOutcome::Faulted {
            message: "ZeroDivisionError: division by zero".to_string(),
        };
        let result = ResultNormalizer.normalize(raw("before\n", outcome), Duration::from_millis(1));
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.error, "ZeroDivisionError: division by zero");
        assert_eq!(result.output, "before\n");
    }

    #[test]
    fn test_timeout_reports_deadline() {
        let outcome = RunOutcome::TimedOut {
            deadline: Duration::from_millis(100),
        };
        let result = ResultNormalizer.normalize(raw("partial\n", outcome), Duration::from_millis(117));
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.error, "execution time limit exceeded (100ms)");
        assert_eq!(result.execution_time_ms, 100.0);
        assert_eq!(result.output, "partial\n");
    }

    #[test]
    fn test_rejection_takes_no_time() {
        let violations = vec![PolicyViolation::DisallowedImport {
            module: "os".to_string(),
            line: 1,
        }];
        let result = ResultNormalizer.violations(&violations);
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.execution_time_ms, 0.0);
        assert_eq!(result.error, "import of module 'os' is not allowed (line 1)");
        assert_eq!(ResultNormalizer.violations(&[]).error, "submission rejected");
    }

    #[test]
    fn test_comparison_trims_only() {
        let passed = GradingComparator.grade(ExecutionResult::success("8".to_string(), 1.0), " 8 \n");
        assert!(passed.passed);
        assert_eq!(passed.expected, "8");
        assert_eq!(passed.actual, "8");

        let failed = GradingComparator.grade(ExecutionResult::success("08\n".to_string(), 1.0), "8");
        assert!(!failed.passed);
        assert_eq!(failed.actual, "08");

        let inner = GradingComparator.grade(ExecutionResult::success("a  b\n".to_string(), 1.0), "a b");
        assert!(!inner.passed);

        let case = GradingComparator.grade(ExecutionResult::success("Yes\n".to_string(), 1.0), "yes");
        assert!(!case.passed);
    }

    #[test]
    fn test_error_never_passes() {
        let result = ExecutionResult::failure("8\n".to_string(), "NameError: name 'x' is not defined", 2.0);
        let graded = GradingComparator.grade(result, "8\n");
        assert!(!graded.passed);
        assert_eq!(graded.actual, "");
        assert_eq!(graded.expected, "8");
        assert_eq!(graded.execution.output, "8\n");
    }
}
