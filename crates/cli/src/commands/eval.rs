use serde_json::json;
use tracing::info;

use lenda_agent::caller::HttpModelCaller;
use lenda_core::agent::{load_agents, Agent};
use lenda_core::config::AppConfig;
use lenda_core::tool::{ParameterSchema, ToolDefinition};
use lenda_evals::judge::ModelJudge;
use lenda_evals::runner::{AgentEvalReport, ScenarioRunner};

use super::CommandResult;

/// Runs evaluation scenarios and renders the report. Setup failures (bad
/// config, unknown agent, unknown scenario) exit 2; failed scenarios exit 1.
pub async fn run(
    config: &AppConfig,
    agent_name: Option<&str>,
    scenario_id: Option<&str>,
    json: bool,
) -> CommandResult {
    let agents = match load_agents(&config.agents.path, &config.agents.disabled) {
        Ok(agents) => agents,
        Err(error) => return CommandResult::failure("agents_load", error.to_string(), 2),
    };

    let selected = match select_agents(agents, agent_name, scenario_id) {
        Ok(selected) => selected,
        Err(failure) => return failure,
    };

    let catalog = mock_catalog(&selected);
    let caller = HttpModelCaller::new();
    let judge = ModelJudge::new(
        &caller,
        config.models.evals.clone(),
        config.evals.similarity_threshold,
    );
    let runner = ScenarioRunner::new(&catalog, &config.models, &caller, &judge);

    let mut reports = Vec::with_capacity(selected.len());
    for agent in &selected {
        info!(event_name = "cli.eval.agent", agent = %agent.name, "evaluating agent");
        reports.push(runner.run_agent_eval(agent).await);
    }

    let all_passed = reports.iter().all(|report| report.passed);
    let output = if json { render_json(&reports) } else { render_summary(&reports) };
    CommandResult { exit_code: u8::from(!all_passed), output }
}

fn select_agents(
    agents: Vec<Agent>,
    agent_name: Option<&str>,
    scenario_id: Option<&str>,
) -> Result<Vec<Agent>, CommandResult> {
    let mut selected: Vec<Agent> = match agent_name {
        Some(name) => {
            let Some(agent) = agents.into_iter().find(|agent| agent.name == name) else {
                return Err(CommandResult::failure(
                    "unknown_agent",
                    format!("no agent named `{name}` in the agents file"),
                    2,
                ));
            };
            vec![agent]
        }
        None => agents.into_iter().filter(|agent| agent.eval.is_some()).collect(),
    };

    if let Some(id) = scenario_id {
        for agent in &mut selected {
            if let Some(eval) = &mut agent.eval {
                eval.scenarios.retain(|scenario| scenario.id == id);
            }
        }
        let any_left = selected
            .iter()
            .any(|agent| agent.eval.as_ref().is_some_and(|eval| !eval.scenarios.is_empty()));
        if !any_left {
            return Err(CommandResult::failure(
                "unknown_scenario",
                format!("no scenario with id `{id}` among the selected agents"),
                2,
            ));
        }
    }

    if selected.is_empty() {
        return Err(CommandResult::failure(
            "no_agents",
            "no agents with evaluation scenarios configured",
            2,
        ));
    }

    Ok(selected)
}

/// Tool definitions for mocked runs. The mock executor answers from canned
/// responses, so names are all the model needs; schemas stay empty.
fn mock_catalog(agents: &[Agent]) -> Vec<ToolDefinition> {
    let mut catalog: Vec<ToolDefinition> = Vec::new();
    for agent in agents {
        for name in &agent.allowed_tools {
            if !catalog.iter().any(|tool| &tool.name == name) {
                catalog.push(ToolDefinition {
                    name: name.clone(),
                    description: String::new(),
                    parameters: ParameterSchema::default(),
                });
            }
        }
    }
    catalog
}

fn render_json(reports: &[AgentEvalReport]) -> String {
    let value = if reports.len() == 1 { json!(reports[0]) } else { json!(reports) };
    serde_json::to_string_pretty(&value)
        .unwrap_or_else(|error| format!("{{\"error\":\"report serialization failed: {error}\"}}"))
}

fn render_summary(reports: &[AgentEvalReport]) -> String {
    let mut lines = Vec::new();
    for report in reports {
        lines.push(format!(
            "{}: {} ({}/{} scenarios, {}/{} turns)",
            report.agent,
            if report.passed { "PASS" } else { "FAIL" },
            report.summary.passed_scenarios,
            report.summary.total_scenarios,
            report.summary.passed_turns,
            report.summary.total_turns,
        ));
        for scenario in &report.scenarios {
            lines.push(format!(
                "  {} {} ({}/{} turns)",
                if scenario.passed { "ok  " } else { "FAIL" },
                scenario.scenario_id,
                scenario.summary.passed_turns,
                scenario.summary.total_turns,
            ));
            for turn in &scenario.turns {
                if turn.passed {
                    continue;
                }
                let reason = turn
                    .error
                    .clone()
                    .or_else(|| {
                        turn.similarity.as_ref().filter(|s| !s.is_similar()).map(|s| s.reason.clone())
                    })
                    .or_else(|| {
                        turn.verification
                            .expected
                            .iter()
                            .find(|entry| !entry.called || !entry.args_matched)
                            .map(|entry| format!("{}: {}", entry.tool, entry.reason))
                    })
                    .unwrap_or_else(|| "unknown failure".to_string());
                lines.push(format!("       turn {}: {}", turn.turn, reason));
            }
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use lenda_core::agent::Agent;

    use super::{mock_catalog, select_agents};

    fn agent(name: &str, scenario_ids: &[&str]) -> Agent {
        serde_json::from_value(json!({
            "name": name,
            "prompt": "p",
            "allowed_tools": ["listLoans"],
            "eval": {
                "scenarios": scenario_ids.iter().map(|id| json!({
                    "id": id,
                    "turns": [{ "input": "hi", "expected_reply": "hello" }],
                })).collect::<Vec<_>>(),
            }
        }))
        .unwrap()
    }

    #[test]
    fn unknown_agent_is_a_setup_failure() {
        let failure =
            select_agents(vec![agent("a", &["s1"])], Some("missing"), None).unwrap_err();
        assert_eq!(failure.exit_code, 2);
        assert!(failure.output.contains("unknown_agent"));
    }

    #[test]
    fn scenario_filter_keeps_only_the_named_scenario() {
        let selected =
            select_agents(vec![agent("a", &["s1", "s2"])], Some("a"), Some("s2")).unwrap();
        let eval = selected[0].eval.as_ref().unwrap();
        assert_eq!(eval.scenarios.len(), 1);
        assert_eq!(eval.scenarios[0].id, "s2");
    }

    #[test]
    fn unknown_scenario_is_a_setup_failure() {
        let failure =
            select_agents(vec![agent("a", &["s1"])], Some("a"), Some("nope")).unwrap_err();
        assert!(failure.output.contains("unknown_scenario"));
    }

    #[test]
    fn catalog_deduplicates_tool_names_across_agents() {
        let agents = vec![agent("a", &["s1"]), agent("b", &["s1"])];
        let catalog = mock_catalog(&agents);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].name, "listLoans");
    }
}
