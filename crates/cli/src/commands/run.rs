//! Run and grade commands
//!
//! `pystep run` executes a program and echoes what it printed. `pystep grade`
//! also compares the output with an expected one and exits non-zero when the
//! submission does not pass.

use std::path::PathBuf;

use anyhow::{Context, Result};
use pystep_protocol::{ExecutionResult, GradedResult};
use pystep_runtime::GradingEngine;

use super::read_source;

/// Arguments for the run command
pub struct RunArgs {
    pub file: PathBuf,
    pub input: String,
    pub json: bool,
}

/// Arguments for the grade command
pub struct GradeArgs {
    pub file: PathBuf,
    pub expected: Option<String>,
    pub expected_file: Option<PathBuf>,
    pub input: String,
    pub json: bool,
}

/// Execute the run command. Returns whether the program completed.
pub async fn execute_run_command(engine: &GradingEngine, args: RunArgs) -> Result<bool> {
    let source = read_source(&args.file)?;
    let result = engine.execute(&source, &args.input, None).await;

    if args.json {
        println!("{}", serde_json::to_string(&result)?);
    } else {
        print!("{}", result.output);
        if let Some(summary) = error_summary(&result) {
            eprintln!("{}", summary);
        }
    }
    Ok(result.is_success())
}

/// Execute the grade command. Returns whether the submission passed.
pub async fn execute_grade_command(engine: &GradingEngine, args: GradeArgs) -> Result<bool> {
    let source = read_source(&args.file)?;
    let expected = match (args.expected, &args.expected_file) {
        (Some(expected), _) => expected,
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read expected output: {}", path.display()))?,
        (None, None) => anyhow::bail!("An expected output is required"),
    };

    let graded = engine.execute_and_grade(&source, &expected, &args.input, None).await;

    if args.json {
        println!("{}", serde_json::to_string(&graded)?);
    } else {
        println!("{}", grade_report(&graded));
    }
    Ok(graded.passed)
}

fn error_summary(result: &ExecutionResult) -> Option<String> {
    if result.is_success() {
        None
    } else {
        Some(format!("❌ {}", result.error))
    }
}

/// Human-readable verdict of a graded run.
fn grade_report(graded: &GradedResult) -> String {
    let mut lines = Vec::new();
    let time = graded.execution.execution_time_ms;
    if graded.passed {
        lines.push(format!("✅ Passed in {:.1}ms", time));
    } else {
        lines.push(format!("❌ Failed in {:.1}ms", time));
        lines.push(format!("   Expected: {:?}", graded.expected));
        if graded.execution.is_success() {
            lines.push(format!("   Actual:   {:?}", graded.actual));
        } else {
            lines.push(format!("   Error:    {}", graded.execution.error));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_engine;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn program(source: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(source.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_grade_report() {
        let passed = GradedResult {
            execution: ExecutionResult::success("8\n".to_string(), 1.5),
            passed: true,
            expected: "8".to_string(),
            actual: "8".to_string(),
        };
        assert_eq!(grade_report(&passed), "✅ Passed in 1.5ms");

        let wrong = GradedResult {
            execution: ExecutionResult::success("08\n".to_string(), 2.0),
            passed: false,
            expected: "8".to_string(),
            actual: "08".to_string(),
        };
        assert_eq!(
            grade_report(&wrong),
            "❌ Failed in 2.0ms\n   Expected: \"8\"\n   Actual:   \"08\""
        );

        let faulted = GradedResult {
            execution: ExecutionResult::failure(String::new(), "NameError: name 'x' is not defined", 0.5),
            passed: false,
            expected: "8".to_string(),
            actual: String::new(),
        };
        assert!(grade_report(&faulted).ends_with("Error:    NameError: name 'x' is not defined"));
    }

    #[test]
    fn test_error_summary() {
        assert_eq!(error_summary(&ExecutionResult::success(String::new(), 0.0)), None);
        let failed = ExecutionResult::failure(String::new(), "boom", 0.0);
        assert_eq!(error_summary(&failed).as_deref(), Some("❌ boom"));
    }

    #[tokio::test]
    async fn test_run_command_reports_completion() {
        let engine = test_engine();
        let ok = program("print('ok')");
        let passed = execute_run_command(
            &engine,
            RunArgs {
                file: ok.path().to_path_buf(),
                input: String::new(),
                json: true,
            },
        )
        .await
        .unwrap();
        assert!(passed);

        let bad = program("print(1 / 0)");
        let passed = execute_run_command(
            &engine,
            RunArgs {
                file: bad.path().to_path_buf(),
                input: String::new(),
                json: true,
            },
        )
        .await
        .unwrap();
        assert!(!passed);
    }

    #[tokio::test]
    async fn test_grade_command_reports_pass() {
        let engine = test_engine();
        let file = program("n = int(input())\nprint(n * 2)");
        let expected = program("8\n");

        let passed = execute_grade_command(
            &engine,
            GradeArgs {
                file: file.path().to_path_buf(),
                expected: None,
                expected_file: Some(expected.path().to_path_buf()),
                input: "4".to_string(),
                json: false,
            },
        )
        .await
        .unwrap();
        assert!(passed);

        let passed = execute_grade_command(
            &engine,
            GradeArgs {
                file: file.path().to_path_buf(),
                expected: Some("9".to_string()),
                expected_file: None,
                input: "4".to_string(),
                json: true,
            },
        )
        .await
        .unwrap();
        assert!(!passed);
    }
}
