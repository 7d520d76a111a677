use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported model vendors. Adding a vendor means extending the static
/// tables below; there is no dynamic discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    OpenAi,
    Anthropic,
    Google,
}

impl Vendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "open_ai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
        }
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const OPENAI_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-4.1", "gpt-4.1-mini", "o3-mini"];
const OPENAI_VISION_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-4.1"];

const ANTHROPIC_MODELS: &[&str] = &[
    "claude-sonnet-4-20250514",
    "claude-opus-4-20250514",
    "claude-3-5-haiku-20241022",
];
const ANTHROPIC_VISION_MODELS: &[&str] =
    &["claude-sonnet-4-20250514", "claude-opus-4-20250514"];

const GOOGLE_MODELS: &[&str] = &["gemini-2.0-flash", "gemini-2.0-flash-lite", "gemini-1.5-pro"];
const GOOGLE_VISION_MODELS: &[&str] = &["gemini-2.0-flash", "gemini-1.5-pro"];

/// All models known for a vendor.
pub fn models_for(vendor: Vendor) -> &'static [&'static str] {
    match vendor {
        Vendor::OpenAi => OPENAI_MODELS,
        Vendor::Anthropic => ANTHROPIC_MODELS,
        Vendor::Google => GOOGLE_MODELS,
    }
}

/// The vision-capable subset for a vendor.
pub fn vision_models_for(vendor: Vendor) -> &'static [&'static str] {
    match vendor {
        Vendor::OpenAi => OPENAI_VISION_MODELS,
        Vendor::Anthropic => ANTHROPIC_VISION_MODELS,
        Vendor::Google => GOOGLE_VISION_MODELS,
    }
}

pub fn is_vision_model(vendor: Vendor, model: &str) -> bool {
    vision_models_for(vendor).contains(&model)
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("model `{model}` is not available for vendor `{vendor}`")]
    InvalidModel { vendor: Vendor, model: String },
    #[error("model `{model}` on vendor `{vendor}` does not support vision input")]
    UnsupportedCapability { vendor: Vendor, model: String },
}

/// A resolved (vendor, model) pair plus the credential used to reach it.
#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub vendor: Vendor,
    pub model: String,
    pub api_key: Option<SecretString>,
}

impl ModelConfig {
    pub fn new(vendor: Vendor, model: impl Into<String>) -> Self {
        Self { vendor, model: model.into(), api_key: None }
    }

    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }
}

/// Validates a (vendor, model) pair against the static tables. Pure lookup,
/// no network access: the first line of defense against misconfiguration
/// before any paid API call is attempted.
pub fn validate(config: &ModelConfig, require_vision: bool) -> Result<(), RegistryError> {
    if !models_for(config.vendor).contains(&config.model.as_str()) {
        return Err(RegistryError::InvalidModel {
            vendor: config.vendor,
            model: config.model.clone(),
        });
    }
    if require_vision && !is_vision_model(config.vendor, &config.model) {
        return Err(RegistryError::UnsupportedCapability {
            vendor: config.vendor,
            model: config.model.clone(),
        });
    }
    Ok(())
}
