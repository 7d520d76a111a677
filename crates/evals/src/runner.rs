//! Drives scripted scenarios through the invocation loop and grades the
//! outcome.
//!
//! Turns within a scenario share one growing history, so later turns see the
//! conversational context earlier turns established. Scenarios run strictly
//! sequentially; the ordering of log output and the absence of rate-limit
//! bursts matter more here than throughput.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use lenda_agent::caller::ModelCaller;
use lenda_agent::invocation::{InvocationRequest, Invoker};
use lenda_core::agent::{Agent, ExpectedToolCall, MatchMode, Scenario};
use lenda_core::config::ModelsConfig;
use lenda_core::message::Message;
use lenda_core::tool::ToolDefinition;

use crate::judge::{match_args_strict, Judge, SimilarityVerdict};
use crate::mock::{MockToolExecutor, RecordedCall};

/// Verification detail for one expected tool call.
#[derive(Clone, Debug, Serialize)]
pub struct ToolVerification {
    pub tool: String,
    pub called: bool,
    pub args_matched: bool,
    pub reason: String,
}

/// Tool-call bookkeeping for one turn. Unexpected calls are reported but do
/// not by themselves fail the turn; the pass/fail flags are computed over
/// the declared expectations only.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TurnVerification {
    pub expected: Vec<ToolVerification>,
    pub unexpected: Vec<String>,
    pub all_expected_called: bool,
    pub all_args_matched: bool,
}

impl TurnVerification {
    pub fn passed(&self) -> bool {
        self.all_expected_called && self.all_args_matched
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TurnResult {
    pub turn: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<SimilarityVerdict>,
    pub verification: TurnVerification,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct TurnSummary {
    pub total_turns: usize,
    pub passed_turns: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub description: String,
    pub passed: bool,
    pub summary: TurnSummary,
    pub turns: Vec<TurnResult>,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct EvalSummary {
    pub total_scenarios: usize,
    pub passed_scenarios: usize,
    pub total_turns: usize,
    pub passed_turns: usize,
}

/// Roll-up for one agent's full evaluation run, serialized to JSON by the
/// CLI.
#[derive(Clone, Debug, Serialize)]
pub struct AgentEvalReport {
    pub agent: String,
    pub generated_at: DateTime<Utc>,
    pub passed: bool,
    pub summary: EvalSummary,
    pub scenarios: Vec<ScenarioResult>,
}

/// Runs scenarios for agents against real model and judge callers, with the
/// tool layer always mocked.
pub struct ScenarioRunner<'a> {
    catalog: &'a [ToolDefinition],
    models: &'a ModelsConfig,
    caller: &'a dyn ModelCaller,
    judge: &'a dyn Judge,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(
        catalog: &'a [ToolDefinition],
        models: &'a ModelsConfig,
        caller: &'a dyn ModelCaller,
        judge: &'a dyn Judge,
    ) -> Self {
        Self { catalog, models, caller, judge }
    }

    /// Replays one scenario turn by turn. A turn-level error becomes a
    /// failed turn result and ends the scenario; it never propagates.
    pub async fn run_scenario(
        &self,
        agent: &Agent,
        scenario: &Scenario,
        context: &Value,
    ) -> ScenarioResult {
        info!(
            event_name = "evals.scenario.start",
            agent = %agent.name,
            scenario = %scenario.id,
            turns = scenario.turns.len(),
            "running scenario"
        );

        let mut history: Vec<Message> = Vec::new();
        let mut turns = Vec::with_capacity(scenario.turns.len());

        for (index, turn) in scenario.turns.iter().enumerate() {
            let mock = MockToolExecutor::new(&turn.expected_tool_calls);
            let invoker = Invoker::new(agent, self.catalog, self.models, self.caller, &mock);
            let request = InvocationRequest {
                history: &history,
                text: turn.input.as_deref(),
                image: turn.image.as_deref(),
                context: context.clone(),
                new_session: index == 0,
            };

            match invoker.run(request).await {
                Ok(outcome) => {
                    history.extend(outcome.appended);

                    let similarity =
                        self.judge.similarity(&turn.expected_reply, &outcome.reply).await;
                    let verification = self
                        .verify_tools(&turn.expected_tool_calls, &mock.recorded())
                        .await;

                    let passed = similarity.is_similar() && verification.passed();
                    turns.push(TurnResult {
                        turn: index + 1,
                        input: turn.input.clone(),
                        reply: Some(outcome.reply),
                        similarity: Some(similarity),
                        verification,
                        passed,
                        error: None,
                    });
                }
                Err(error) => {
                    warn!(
                        event_name = "evals.scenario.turn_failed",
                        agent = %agent.name,
                        scenario = %scenario.id,
                        turn = index + 1,
                        error = %error,
                        "turn errored; recording failure and ending scenario"
                    );
                    turns.push(TurnResult {
                        turn: index + 1,
                        input: turn.input.clone(),
                        reply: None,
                        similarity: None,
                        verification: TurnVerification::default(),
                        passed: false,
                        error: Some(error.to_string()),
                    });
                    break;
                }
            }
        }

        let passed_turns = turns.iter().filter(|result| result.passed).count();
        let summary = TurnSummary { total_turns: scenario.turns.len(), passed_turns };
        ScenarioResult {
            scenario_id: scenario.id.clone(),
            description: scenario.description.clone(),
            passed: passed_turns == scenario.turns.len(),
            summary,
            turns,
        }
    }

    /// Runs every configured scenario for the agent and rolls up counts.
    /// Agents without an eval block produce an empty passing report.
    pub async fn run_agent_eval(&self, agent: &Agent) -> AgentEvalReport {
        let mut scenarios = Vec::new();

        if let Some(eval) = &agent.eval {
            for scenario in &eval.scenarios {
                scenarios.push(self.run_scenario(agent, scenario, &eval.context).await);
            }
        } else {
            warn!(
                event_name = "evals.agent.no_scenarios",
                agent = %agent.name,
                "agent has no evaluation block"
            );
        }

        let summary = EvalSummary {
            total_scenarios: scenarios.len(),
            passed_scenarios: scenarios.iter().filter(|result| result.passed).count(),
            total_turns: scenarios.iter().map(|result| result.summary.total_turns).sum(),
            passed_turns: scenarios.iter().map(|result| result.summary.passed_turns).sum(),
        };

        AgentEvalReport {
            agent: agent.name.clone(),
            generated_at: Utc::now(),
            passed: summary.passed_scenarios == summary.total_scenarios,
            summary,
            scenarios,
        }
    }

    /// Matches the turn's recorded calls against its expectations. Each
    /// recorded call satisfies at most one expectation; leftovers land in
    /// `unexpected`.
    async fn verify_tools(
        &self,
        expectations: &[ExpectedToolCall],
        recorded: &[RecordedCall],
    ) -> TurnVerification {
        let mut consumed = vec![false; recorded.len()];
        let mut expected = Vec::with_capacity(expectations.len());

        for expectation in expectations {
            let found = recorded
                .iter()
                .enumerate()
                .find(|(index, call)| !consumed[*index] && call.name == expectation.tool);

            let verification = match found {
                None => ToolVerification {
                    tool: expectation.tool.clone(),
                    called: false,
                    args_matched: false,
                    reason: "tool was not called".to_string(),
                },
                Some((index, call)) => {
                    consumed[index] = true;
                    let comparison = match &expectation.args {
                        None => None,
                        Some(args) => Some(match expectation.match_mode {
                            MatchMode::Strict => match_args_strict(args, &call.args),
                            MatchMode::Judge => self.judge.judge_args(args, &call.args).await,
                        }),
                    };
                    match comparison {
                        None => ToolVerification {
                            tool: expectation.tool.clone(),
                            called: true,
                            args_matched: true,
                            reason: "no expected arguments".to_string(),
                        },
                        Some(comparison) => ToolVerification {
                            tool: expectation.tool.clone(),
                            called: true,
                            args_matched: comparison.matched,
                            reason: comparison.reason,
                        },
                    }
                }
            };
            expected.push(verification);
        }

        let unexpected = recorded
            .iter()
            .enumerate()
            .filter(|(index, _)| !consumed[*index])
            .map(|(_, call)| call.name.clone())
            .collect();

        TurnVerification {
            all_expected_called: expected.iter().all(|entry| entry.called),
            all_args_matched: expected.iter().all(|entry| entry.args_matched),
            expected,
            unexpected,
        }
    }
}
