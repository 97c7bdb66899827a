//! Execution and grading results.
//!
//! These are the only shapes a caller ever sees. Every failure mode of the
//! engine (policy rejection, runtime fault, deadline expiry) is folded into an
//! [`ExecutionResult`] with `status = "error"` and a non-empty `error`.

use serde::{Deserialize, Serialize};

/// Outcome class of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// The program ran to completion
    Success,
    /// The program was rejected, faulted or ran out of time
    Error,
}

/// Result of running one submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    /// Everything the program wrote to standard output, in order
    pub output: String,
    /// Empty on success, a single human-readable line otherwise
    pub error: String,
    /// Success or error
    pub status: ExecutionStatus,
    /// Wall-clock milliseconds; exactly the deadline when the run timed out
    #[serde(rename = "execution_time")]
    pub execution_time_ms: f64,
}

impl ExecutionResult {
    /// A run that completed normally.
    pub fn success(output: String, execution_time_ms: f64) -> Self {
        Self {
            output,
            error: String::new(),
            status: ExecutionStatus::Success,
            execution_time_ms,
        }
    }

    /// A run that did not complete normally.
    ///
    /// An empty message is replaced so that the error status always comes
    /// with something to show the student.
    pub fn failure(output: String, error: impl Into<String>, execution_time_ms: f64) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "unknown error".to_string();
        }
        Self {
            output,
            error,
            status: ExecutionStatus::Error,
            execution_time_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// An execution result with the comparison against an expected output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradedResult {
    #[serde(flatten)]
    pub execution: ExecutionResult,
    /// True only for a successful run whose trimmed output equals the trimmed expectation
    pub passed: bool,
    /// The expected output, trimmed
    pub expected: String,
    /// The produced output, trimmed; empty when the run failed
    pub actual: String,
}

/// Verdict of the static policy check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "verdict", rename_all = "lowercase")]
pub enum ValidationVerdict {
    Accepted,
    Rejected { reason: String },
}

impl ValidationVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationVerdict::Accepted)
    }

    /// Rejection reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            ValidationVerdict::Accepted => None,
            ValidationVerdict::Rejected { reason } => Some(reason),
        }
    }
}

/// Response to a [`crate::GradingRequest`]: graded when an expectation was
/// supplied, a plain execution result otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum GradingResponse {
    Graded(GradedResult),
    Executed(ExecutionResult),
}

impl GradingResponse {
    pub fn execution(&self) -> &ExecutionResult {
        match self {
            GradingResponse::Graded(graded) => &graded.execution,
            GradingResponse::Executed(result) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execution_result_wire_shape() {
        let result = ExecutionResult::success("hi\n".to_string(), 1.5);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({"output": "hi\n", "error": "", "status": "success", "execution_time": 1.5})
        );
    }

    #[test]
    fn test_failure_never_has_empty_error() {
        let result = ExecutionResult::failure(String::new(), "   ", 0.0);
        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.error, "unknown error");
        assert!(!result.is_success());
    }

    #[test]
    fn test_graded_result_is_flat() {
        let graded = GradedResult {
            execution: ExecutionResult::success("8\n".to_string(), 2.0),
            passed: true,
            expected: "8".to_string(),
            actual: "8".to_string(),
        };
        let value = serde_json::to_value(&graded).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["passed"], true);
        assert_eq!(value["actual"], "8");
        assert!(value.get("execution").is_none());

        let back: GradedResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, graded);
    }

    #[test]
    fn test_verdict_serialization() {
        let rejected = ValidationVerdict::Rejected {
            reason: "import of module 'os' is not allowed (line 1)".to_string(),
        };
        let value = serde_json::to_value(&rejected).unwrap();
        assert_eq!(value["verdict"], "rejected");
        assert!(rejected.reason().unwrap().contains("os"));
        assert!(ValidationVerdict::Accepted.is_accepted());
        assert_eq!(ValidationVerdict::Accepted.reason(), None);
    }

    #[test]
    fn test_response_picks_graded_shape() {
        let graded = GradingResponse::Graded(GradedResult {
            execution: ExecutionResult::failure(String::new(), "boom", 0.0),
            passed: false,
            expected: "x".to_string(),
            actual: String::new(),
        });
        let text = serde_json::to_string(&graded).unwrap();
        let back: GradingResponse = serde_json::from_str(&text).unwrap();
        assert!(matches!(back, GradingResponse::Graded(_)));
        assert_eq!(back.execution().error, "boom");

        let plain = GradingResponse::Executed(ExecutionResult::success("1\n".to_string(), 0.5));
        let text = serde_json::to_string(&plain).unwrap();
        let back: GradingResponse = serde_json::from_str(&text).unwrap();
        assert!(matches!(back, GradingResponse::Executed(_)));
    }
}
