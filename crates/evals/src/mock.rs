//! Evaluation-only [`ToolExecutor`] that records calls and answers from a
//! script of expected tool calls.
//!
//! The mock never short-circuits a scenario: unknown tools get a generic
//! success stub and matched tools get their canned response whether or not
//! the arguments were right. Verification happens after the turn, from the
//! recorded call log.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use lenda_agent::executor::{ToolExecutor, ToolOutcome};
use lenda_core::agent::ExpectedToolCall;

/// One observed tool invocation.
#[derive(Clone, Debug, Serialize)]
pub struct RecordedCall {
    pub name: String,
    pub args: Value,
    pub at: DateTime<Utc>,
}

/// Scoped to a single scenario turn; a fresh instance is built per turn so
/// the call log never crosses turns.
pub struct MockToolExecutor {
    expectations: Vec<ExpectedToolCall>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockToolExecutor {
    pub fn new(expectations: &[ExpectedToolCall]) -> Self {
        Self { expectations: expectations.to_vec(), calls: Mutex::new(Vec::new()) }
    }

    /// Drains the call log in invocation order.
    pub fn recorded(&self) -> Vec<RecordedCall> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, name: &str, args: &Value) {
        let entry =
            RecordedCall { name: name.to_string(), args: args.clone(), at: Utc::now() };
        match self.calls.lock() {
            Ok(mut calls) => calls.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn execute(&self, name: &str, args: &Value, _context: &Value) -> Result<ToolOutcome> {
        self.record(name, args);

        let Some(expectation) = self.expectations.iter().find(|entry| entry.tool == name) else {
            warn!(
                event_name = "evals.mock.unexpected_call",
                tool = name,
                "model called a tool with no expectation this turn"
            );
            return Ok(ToolOutcome::ok("ok"));
        };

        // Canned response regardless of argument match: the conversation
        // must keep flowing so the mismatch surfaces in the report instead
        // of derailing the scenario.
        let outcome = serde_json::from_value::<ToolOutcome>(expectation.mock_response.clone())
            .unwrap_or_else(|_| ToolOutcome::ok_with_data("ok", expectation.mock_response.clone()));
        Ok(outcome)
    }
}
