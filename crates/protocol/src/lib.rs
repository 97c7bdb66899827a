//! PyStep protocol types
//!
//! This crate defines the wire-level types exchanged between the grading
//! engine and the services that call it: execution results, graded results,
//! validation verdicts and grading requests. Everything here is plain data
//! with a stable JSON shape.

pub mod errors;
pub mod request;
pub mod results;

pub use errors::ProtocolError;
pub use request::GradingRequest;
pub use results::{ExecutionResult, ExecutionStatus, GradedResult, GradingResponse, ValidationVerdict};

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Version of the PyStep protocol
pub const PROTOCOL_VERSION: &str = "0.1.0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version() {
        assert!(!PROTOCOL_VERSION.is_empty());
    }
}
