use secrecy::ExposeSecret;

use lenda_core::config::AppConfig;
use lenda_core::registry::ModelConfig;

/// Renders the effective configuration, one line per field, with API keys
/// redacted to a short prefix.
pub fn run(config: &AppConfig) -> String {
    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    for (purpose, model) in [
        ("models.text", &config.models.text),
        ("models.vision", &config.models.vision),
        ("models.evals", &config.models.evals),
    ] {
        lines.push(format!("  {purpose}.vendor = {}", model.vendor));
        lines.push(format!("  {purpose}.model = {}", model.model));
        lines.push(format!("  {purpose}.api_key = {}", render_api_key(model)));
    }

    lines.push(format!(
        "  evals.similarity_threshold = {}",
        config.evals.similarity_threshold
    ));
    lines.push(format!("  session.timeout_minutes = {}", config.session.timeout_minutes));
    lines.push(format!("  agents.path = {}", config.agents.path.display()));
    lines.push(format!("  agents.disabled = {:?}", config.agents.disabled));
    lines.push(format!("  logging.level = {}", config.logging.level));
    lines.push(format!("  logging.format = {:?}", config.logging.format));

    lines.join("\n")
}

fn render_api_key(model: &ModelConfig) -> String {
    match &model.api_key {
        None => "(unset)".to_string(),
        Some(api_key) => redact(api_key.expose_secret()),
    }
}

fn redact(token: &str) -> String {
    if token.len() <= 6 {
        "***".to_string()
    } else {
        format!("{}***", &token[..6])
    }
}
