//! Grading requests as they arrive from callers.

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

/// One submission to run, and optionally grade.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GradingRequest {
    /// Program source text
    pub code: String,
    /// Expected output; when absent the request is execute-only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    /// Text returned by every `input()` call
    #[serde(default)]
    pub input_data: String,
    /// Deadline override in milliseconds; the engine default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl GradingRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            expected_output: None,
            input_data: String::new(),
            timeout_ms: None,
        }
    }

    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input_data = input.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Parse and check a request from its JSON text.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        let request: GradingRequest = serde_json::from_str(text)?;
        request.validate()?;
        Ok(request)
    }

    /// Reject requests that can never be honoured.
    pub fn validate(&self) -> crate::Result<()> {
        if self.timeout_ms == Some(0) {
            return Err(ProtocolError::InvalidRequest {
                reason: "timeout_ms must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_request() {
        let request = GradingRequest::from_json(r#"{"code": "print(1)"}"#).unwrap();
        assert_eq!(request, GradingRequest::new("print(1)"));
        assert!(request.expected_output.is_none());
        assert!(request.input_data.is_empty());
    }

    #[test]
    fn test_full_request() {
        let request = GradingRequest::from_json(
            r#"{"code": "print(input())", "expected_output": "hi", "input_data": "hi\n", "timeout_ms": 500}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            GradingRequest::new("print(input())")
                .with_expected_output("hi")
                .with_input("hi\n")
                .with_timeout_ms(500)
        );
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = GradingRequest::from_json(r#"{"code": "", "timeout_ms": 0}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRequest { .. }));
    }

    #[test]
    fn test_malformed_json() {
        let err = GradingRequest::from_json("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::SerializationError { .. }));
    }
}
