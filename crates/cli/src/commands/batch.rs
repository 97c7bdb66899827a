//! Batch command implementation
//!
//! Reads one JSON [`GradingRequest`] per line and writes one JSON response
//! per line, in request order. Up to `jobs` requests run at once. A line that
//! is not a valid request still gets an error result, so every input line
//! has exactly one output line.

use std::collections::VecDeque;

use anyhow::{Context, Result};
use pystep_protocol::{ExecutionResult, GradingRequest, GradingResponse};
use pystep_runtime::GradingEngine;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Arguments for the batch command
pub struct BatchArgs {
    pub jobs: usize,
}

/// Counts for one batch session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub requests: usize,
    pub passed: usize,
    pub errors: usize,
}

impl BatchSummary {
    fn record(&mut self, response: &GradingResponse) {
        self.requests += 1;
        if let GradingResponse::Graded(graded) = response {
            if graded.passed {
                self.passed += 1;
            }
        }
        if !response.execution().is_success() {
            self.errors += 1;
        }
    }
}

/// Execute the batch command over stdin and stdout
pub async fn execute_batch_command(engine: &GradingEngine, args: BatchArgs) -> Result<bool> {
    let reader = BufReader::new(tokio::io::stdin());
    let mut writer = tokio::io::stdout();
    let summary = serve(engine, reader, &mut writer, args.jobs).await?;
    info!(
        requests = summary.requests,
        passed = summary.passed,
        errors = summary.errors,
        "batch finished"
    );
    Ok(true)
}

/// Answer a single request line.
pub async fn respond(engine: &GradingEngine, line: &str) -> GradingResponse {
    match GradingRequest::from_json(line) {
        Ok(request) => engine.handle(&request).await,
        Err(err) => {
            warn!(error = %err, "invalid grading request");
            GradingResponse::Executed(ExecutionResult::failure(String::new(), err.to_string(), 0.0))
        }
    }
}

/// Serve every request line from `reader`, writing responses to `writer`.
pub async fn serve<R, W>(engine: &GradingEngine, reader: R, writer: &mut W, jobs: usize) -> Result<BatchSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let jobs = jobs.max(1);
    let mut lines = reader.lines();
    let mut pending: VecDeque<JoinHandle<GradingResponse>> = VecDeque::new();
    let mut summary = BatchSummary::default();

    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        if line.trim().is_empty() {
            continue;
        }
        if pending.len() >= jobs {
            if let Some(handle) = pending.pop_front() {
                write_response(handle, writer, &mut summary).await?;
            }
        }
        let engine = engine.clone();
        pending.push_back(tokio::spawn(async move { respond(&engine, &line).await }));
    }

    while let Some(handle) = pending.pop_front() {
        write_response(handle, writer, &mut summary).await?;
    }
    writer.flush().await.context("Failed to flush responses")?;
    Ok(summary)
}

async fn write_response<W>(handle: JoinHandle<GradingResponse>, writer: &mut W, summary: &mut BatchSummary) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let response = handle.await.context("Grading task failed")?;
    summary.record(&response);
    let mut line = serde_json::to_string(&response)?;
    line.push('\n');
    writer
        .write_all(line.as_bytes())
        .await
        .context("Failed to write response")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_engine;

    #[tokio::test]
    async fn test_responses_follow_request_order() {
        let engine = test_engine();
        let input = concat!(
            r#"{"code": "import time\ntime.sleep(0.1)\nprint('slow')", "expected_output": "slow"}"#,
            "\n",
            r#"{"code": "print(6 * 7)", "expected_output": "41"}"#,
            "\n\n",
            r#"{"code": "print(input())", "input_data": "echo\n"}"#,
            "\n",
            "{not json\n",
        );
        let mut out = Vec::new();
        let summary = serve(&engine, input.as_bytes(), &mut out, 2).await.unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                requests: 4,
                passed: 1,
                errors: 1,
            }
        );

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["actual"], "slow");
        assert_eq!(lines[0]["passed"], true);
        assert_eq!(lines[1]["passed"], false);
        assert_eq!(lines[1]["actual"], "42");
        assert_eq!(lines[2]["output"], "echo\n");
        assert!(lines[2].get("passed").is_none());
        assert_eq!(lines[3]["status"], "error");
        assert!(lines[3]["error"].as_str().unwrap().starts_with("Serialization error"));
    }

    #[tokio::test]
    async fn test_respond_rejects_zero_timeout() {
        let engine = test_engine();
        let response = respond(&engine, r#"{"code": "print(1)", "timeout_ms": 0}"#).await;
        let result = response.execution();
        assert!(!result.is_success());
        assert_eq!(result.error, "Invalid request: timeout_ms must be greater than zero");
    }
}
