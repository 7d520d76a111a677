use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

use crate::registry::{self, ModelConfig, Vendor};

/// The functional slot a model fills. Each purpose resolves to its own
/// (vendor, model, api key) triple so the text, vision, and judge models can
/// come from different vendors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Purpose {
    Text,
    Vision,
    Evals,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub models: ModelsConfig,
    pub evals: EvalsConfig,
    pub session: SessionConfig,
    pub agents: AgentsConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ModelsConfig {
    pub text: ModelConfig,
    pub vision: ModelConfig,
    pub evals: ModelConfig,
}

impl ModelsConfig {
    pub fn for_purpose(&self, purpose: Purpose) -> &ModelConfig {
        match purpose {
            Purpose::Text => &self.text,
            Purpose::Vision => &self.vision,
            Purpose::Evals => &self.evals,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EvalsConfig {
    /// Judge confidence below this threshold downgrades `similar` to a
    /// dissimilar verdict.
    pub similarity_threshold: f64,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Inactivity window after which callers treat the next message as a new
    /// session. The invocation loop itself only consumes the resulting flag.
    pub timeout_minutes: u64,
}

#[derive(Clone, Debug)]
pub struct AgentsConfig {
    pub path: PathBuf,
    pub disabled: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            models: ModelsConfig {
                text: ModelConfig::new(Vendor::OpenAi, "gpt-4o-mini"),
                vision: ModelConfig::new(Vendor::OpenAi, "gpt-4o"),
                evals: ModelConfig::new(Vendor::OpenAi, "gpt-4o-mini"),
            },
            evals: EvalsConfig { similarity_threshold: 0.7 },
            session: SessionConfig { timeout_minutes: 30 },
            agents: AgentsConfig { path: PathBuf::from("agents.toml"), disabled: Vec::new() },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    models: Option<ModelsPatch>,
    evals: Option<EvalsPatch>,
    session: Option<SessionPatch>,
    agents: Option<AgentsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelsPatch {
    text: Option<ModelPatch>,
    vision: Option<ModelPatch>,
    evals: Option<ModelPatch>,
}

#[derive(Debug, Deserialize)]
struct ModelPatch {
    vendor: Option<Vendor>,
    model: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EvalsPatch {
    similarity_threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SessionPatch {
    timeout_minutes: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AgentsPatch {
    path: Option<PathBuf>,
    disabled: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("lenda.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(models) = patch.models {
            apply_model_patch(&mut self.models.text, models.text);
            apply_model_patch(&mut self.models.vision, models.vision);
            apply_model_patch(&mut self.models.evals, models.evals);
        }

        if let Some(evals) = patch.evals {
            if let Some(threshold) = evals.similarity_threshold {
                self.evals.similarity_threshold = threshold;
            }
        }

        if let Some(session) = patch.session {
            if let Some(timeout_minutes) = session.timeout_minutes {
                self.session.timeout_minutes = timeout_minutes;
            }
        }

        if let Some(agents) = patch.agents {
            if let Some(path) = agents.path {
                self.agents.path = path;
            }
            if let Some(disabled) = agents.disabled {
                self.agents.disabled = disabled;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        for (purpose_key, model) in [
            ("TEXT", &mut self.models.text),
            ("VISION", &mut self.models.vision),
            ("EVALS", &mut self.models.evals),
        ] {
            if let Some(value) = read_env(&format!("LENDA_{purpose_key}_MODEL")) {
                model.model = value;
            }
            if let Some(value) = read_env(&format!("LENDA_{purpose_key}_API_KEY")) {
                model.api_key = Some(SecretString::from(value));
            }
        }

        if let Some(value) = read_env("LENDA_SIMILARITY_THRESHOLD") {
            self.evals.similarity_threshold = value.parse().map_err(|_| {
                ConfigError::Validation(format!(
                    "invalid LENDA_SIMILARITY_THRESHOLD value `{value}`"
                ))
            })?;
        }

        if let Some(value) = read_env("LENDA_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env("LENDA_LOG_FORMAT") {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (purpose, model) in [
            ("models.text", &self.models.text),
            ("models.vision", &self.models.vision),
            ("models.evals", &self.models.evals),
        ] {
            registry::validate(model, false)
                .map_err(|error| ConfigError::Validation(format!("{purpose}: {error}")))?;
        }

        if registry::validate(&self.models.vision, true).is_err() {
            return Err(ConfigError::Validation(format!(
                "models.vision: `{}` must be vision-capable",
                self.models.vision.model
            )));
        }

        if !(0.0..=1.0).contains(&self.evals.similarity_threshold) {
            return Err(ConfigError::Validation(
                "evals.similarity_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.session.timeout_minutes == 0 {
            return Err(ConfigError::Validation(
                "session.timeout_minutes must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn apply_model_patch(target: &mut ModelConfig, patch: Option<ModelPatch>) {
    let Some(patch) = patch else {
        return;
    };
    if let Some(vendor) = patch.vendor {
        target.vendor = vendor;
    }
    if let Some(model) = patch.model {
        target.model = model;
    }
    if let Some(api_key) = patch.api_key {
        target.api_key = Some(SecretString::from(api_key));
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("lenda.toml"), PathBuf::from("config/lenda.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{interpolate_env_vars, AppConfig, ConfigError, LoadOptions, LogFormat};
    use crate::config::Purpose;
    use crate::registry::Vendor;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_are_valid_and_threshold_is_seven_tenths() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.evals.similarity_threshold, 0.7);
        assert_eq!(config.session.timeout_minutes, 30);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn file_patch_overrides_per_purpose_models() {
        let file = write_temp(
            r#"
[models.text]
vendor = "anthropic"
model = "claude-3-5-haiku-20241022"

[models.vision]
vendor = "google"
model = "gemini-2.0-flash"

[evals]
similarity_threshold = 0.85
"#,
        );
        let config = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
        })
        .unwrap();

        assert_eq!(config.models.for_purpose(Purpose::Text).vendor, Vendor::Anthropic);
        assert_eq!(config.models.for_purpose(Purpose::Vision).model, "gemini-2.0-flash");
        assert_eq!(config.evals.similarity_threshold, 0.85);
        // Untouched purpose keeps its default.
        assert_eq!(config.models.for_purpose(Purpose::Evals).model, "gpt-4o-mini");
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let error = AppConfig::load(LoadOptions {
            config_path: Some("/definitely/not/here.toml".into()),
            require_file: true,
        })
        .unwrap_err();
        assert!(matches!(error, ConfigError::MissingConfigFile(_)));
    }

    #[test]
    fn unknown_model_fails_validation() {
        let file = write_temp("[models.text]\nmodel = \"gpt-9000\"\n");
        let error = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
        })
        .unwrap_err();
        assert!(matches!(error, ConfigError::Validation(_)));
    }

    #[test]
    fn vision_purpose_must_select_a_vision_capable_model() {
        let file = write_temp("[models.vision]\nmodel = \"o3-mini\"\n");
        let error = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
        })
        .unwrap_err();
        assert!(error.to_string().contains("vision-capable"));
    }

    #[test]
    fn interpolation_substitutes_environment_values() {
        std::env::set_var("LENDA_TEST_INTERP_KEY", "sk-test-123");
        let output = interpolate_env_vars("api_key = \"${LENDA_TEST_INTERP_KEY}\"").unwrap();
        assert_eq!(output, "api_key = \"sk-test-123\"");
        std::env::remove_var("LENDA_TEST_INTERP_KEY");
    }

    #[test]
    fn unterminated_interpolation_is_rejected() {
        let error = interpolate_env_vars("api_key = \"${OOPS").unwrap_err();
        assert!(matches!(error, ConfigError::UnterminatedInterpolation));
    }

    #[test]
    fn out_of_range_threshold_fails_validation() {
        let file = write_temp("[evals]\nsimilarity_threshold = 1.5\n");
        let error = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
        })
        .unwrap_err();
        assert!(error.to_string().contains("similarity_threshold"));
    }
}
