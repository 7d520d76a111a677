//! Scenario-based evaluation harness for Lenda agents.
//!
//! Scripted multi-turn conversations replay through the real invocation
//! loop with the tool layer mocked; replies are graded semantically by a
//! secondary model and tool calls are verified against expectations.

pub mod judge;
pub mod mock;
pub mod runner;

pub use judge::{match_args_strict, ArgComparison, Judge, ModelJudge, SimilarityVerdict, Verdict};
pub use mock::{MockToolExecutor, RecordedCall};
pub use runner::{
    AgentEvalReport, EvalSummary, ScenarioResult, ScenarioRunner, ToolVerification, TurnResult,
    TurnSummary, TurnVerification,
};
