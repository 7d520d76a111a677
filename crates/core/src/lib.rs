//! Core types for the Lenda conversational assistant.
//!
//! This crate is pure data and lookup logic shared by the invocation loop
//! and the evaluation harness:
//!
//! - `message` - canonical conversation turns (roles, text or multimodal
//!   content, tool-call metadata)
//! - `tool` - the static tool catalog and the per-agent allow-list filter
//! - `registry` - vendor/model tables, vision capability lookup, validation
//! - `agent` - agent personas and scripted evaluation scenarios
//! - `config` - TOML configuration with env interpolation and overrides
//! - `errors` - the invocation-loop error taxonomy
//!
//! Nothing here performs I/O beyond reading configuration files; model and
//! tool side effects live behind traits in `lenda-agent`.

pub mod agent;
pub mod config;
pub mod errors;
pub mod message;
pub mod registry;
pub mod tool;

pub use agent::{Agent, AgentLoadError, EvalSpec, ExpectedToolCall, MatchMode, Scenario, ScenarioTurn};
pub use config::{AppConfig, ConfigError, LoadOptions, ModelsConfig, Purpose};
pub use errors::InvocationError;
pub use message::{tool_links_consistent, Content, ContentPart, Message, Role, ToolCall};
pub use registry::{
    is_vision_model, models_for, validate, vision_models_for, ModelConfig, RegistryError, Vendor,
};
pub use tool::{filter_tools, ParameterSchema, PropertySchema, ToolDefinition};
