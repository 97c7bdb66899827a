//! Validate command implementation
//!
//! Checks a program against the import and call policy without running it.

use std::path::Path;

use anyhow::Result;
use pystep_protocol::ValidationVerdict;
use pystep_runtime::GradingEngine;

use super::read_source;

/// Execute the validate command. Returns whether the program was accepted.
pub fn execute_validate_command(engine: &GradingEngine, file: &Path, json: bool) -> Result<bool> {
    let source = read_source(file)?;
    let verdict = engine.validate_only(&source);

    if json {
        println!("{}", serde_json::to_string(&verdict)?);
    } else {
        println!("{}", describe(&verdict));
    }
    Ok(verdict.is_accepted())
}

fn describe(verdict: &ValidationVerdict) -> String {
    match verdict {
        ValidationVerdict::Accepted => "✅ Submission accepted".to_string(),
        ValidationVerdict::Rejected { reason } => format!("❌ Submission rejected: {}", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_engine;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_describe() {
        assert_eq!(describe(&ValidationVerdict::Accepted), "✅ Submission accepted");
        let rejected = ValidationVerdict::Rejected {
            reason: "call to 'eval' is not allowed (line 1)".to_string(),
        };
        assert_eq!(
            describe(&rejected),
            "❌ Submission rejected: call to 'eval' is not allowed (line 1)"
        );
    }

    #[test]
    fn test_validate_command() {
        let engine = test_engine();

        let mut accepted = NamedTempFile::new().unwrap();
        writeln!(accepted, "import math\nprint(math.sqrt(16))").unwrap();
        assert!(execute_validate_command(&engine, accepted.path(), false).unwrap());

        let mut rejected = NamedTempFile::new().unwrap();
        writeln!(rejected, "import socket").unwrap();
        assert!(!execute_validate_command(&engine, rejected.path(), true).unwrap());
    }
}
