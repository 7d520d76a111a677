use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A named persona: prompt, tool allow-list, and model defaults. Agents are
/// loaded once at process start and treated as immutable configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Fixed model name overriding the per-purpose selection, when set.
    #[serde(default)]
    pub model_override: Option<String>,
    #[serde(default)]
    pub eval: Option<EvalSpec>,
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    1024
}

/// Evaluation configuration for one agent: the context object passed to the
/// tool executor plus the scripted scenarios to replay.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvalSpec {
    #[serde(default = "empty_object")]
    pub context: Value,
    pub scenarios: Vec<Scenario>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A scripted multi-turn conversation with expected replies and expected
/// tool calls. Scenarios model one continuous session, not isolated calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub turns: Vec<ScenarioTurn>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioTurn {
    /// Human input text. May be absent when only an image is sent.
    #[serde(default)]
    pub input: Option<String>,
    /// Image reference (URL or data URI) sent alongside the text.
    #[serde(default)]
    pub image: Option<String>,
    /// Reply the assistant is expected to produce, compared semantically.
    pub expected_reply: String,
    #[serde(default)]
    pub expected_tool_calls: Vec<ExpectedToolCall>,
}

/// How expected tool arguments are compared against actual ones.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Strict,
    Judge,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExpectedToolCall {
    pub tool: String,
    /// Expected argument object. When absent, any arguments match.
    #[serde(default)]
    pub args: Option<Value>,
    #[serde(default)]
    pub match_mode: MatchMode,
    /// Canned result returned to the conversation when this tool is called,
    /// regardless of whether the arguments matched.
    #[serde(default = "empty_object")]
    pub mock_response: Value,
}

#[derive(Debug, Error)]
pub enum AgentLoadError {
    #[error("could not read agents file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse agents file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("duplicate agent name `{0}`")]
    DuplicateName(String),
}

#[derive(Debug, Deserialize)]
struct AgentsFile {
    #[serde(default)]
    agents: Vec<Agent>,
}

/// Loads agent definitions from a TOML document, dropping names listed in
/// `disabled`. Duplicate names are a configuration error.
pub fn load_agents(path: &Path, disabled: &[String]) -> Result<Vec<Agent>, AgentLoadError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| AgentLoadError::ReadFile { path: path.to_path_buf(), source })?;
    let file: AgentsFile = toml::from_str(&raw)
        .map_err(|source| AgentLoadError::ParseFile { path: path.to_path_buf(), source })?;

    let mut seen = BTreeSet::new();
    for agent in &file.agents {
        if !seen.insert(agent.name.clone()) {
            return Err(AgentLoadError::DuplicateName(agent.name.clone()));
        }
    }

    Ok(file
        .agents
        .into_iter()
        .filter(|agent| !disabled.contains(&agent.name))
        .collect())
}
