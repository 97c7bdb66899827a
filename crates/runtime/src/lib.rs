//! PyStep sandboxed execution and grading engine
//!
//! This crate runs short, untrusted Python-subset programs submitted by
//! students. A submission is statically checked against an import and call
//! policy, executed by an interpreter whose only reachable names come from an
//! explicit capability namespace, bounded by a wall-clock deadline, and its
//! output compared with an expected result.

pub mod ast;
pub mod config;
pub mod engine;
pub mod execution;
pub mod grading;
pub mod interpreter;
pub mod parser;
pub mod sandbox;
pub mod validation;

// Re-export key types for easy access
pub use config::{ConfigError, EngineConfig, PolicyConfig};
pub use engine::{submission_digest, GradingEngine};
pub use execution::{CancellationToken, ExecutionSupervisor, RawRun, RunOutcome, RunState};
pub use grading::{GradingComparator, ResultNormalizer};
pub use parser::{parse_program, SyntaxError};
pub use sandbox::{Capability, CapabilityNamespace, InputProvider, ModuleKind, NamespaceBuilder};
pub use validation::{PolicyValidator, PolicyViolation, ValidationReport};

pub use pystep_protocol::{ExecutionResult, ExecutionStatus, GradedResult, GradingRequest, GradingResponse, ValidationVerdict};

/// Convenience function to validate a submission against a policy
pub fn validate(source: &str, policy: &PolicyConfig) -> ValidationVerdict {
    validation::validate(source, policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_reexport() {
        let policy = PolicyConfig::from_csv("math").unwrap();
        assert!(validate("import math", &policy).is_accepted());
        assert!(!validate("import os", &policy).is_accepted());
    }
}
