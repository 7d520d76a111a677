pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use lenda_core::config::{AppConfig, LoadOptions, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "lenda",
    about = "Lenda agent evaluation CLI",
    long_about = "Run scripted evaluation scenarios against Lenda agents and inspect the \
effective configuration.",
    after_help = "Examples:\n  lenda eval --agent loan-assistant\n  lenda eval --agent loan-assistant --scenario payment-flow --json\n  lenda config"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run evaluation scenarios for one agent or for all agents")]
    Eval {
        #[arg(long, help = "Agent name to evaluate (all configured agents when omitted)")]
        agent: Option<String>,
        #[arg(long, help = "Run only the scenario with this id")]
        scenario: Option<String>,
        #[arg(long, help = "Path to the config file (lenda.toml by default)")]
        config: Option<PathBuf>,
        #[arg(long, help = "Path to the agents file, overriding the configured one")]
        agents: Option<PathBuf>,
        #[arg(long, help = "Emit the full machine-readable JSON report")]
        json: bool,
    },
    #[command(about = "Inspect effective configuration values with redacted secrets")]
    Config {
        #[arg(long, help = "Path to the config file (lenda.toml by default)")]
        config: Option<PathBuf>,
    },
}

fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        LogFormat::Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<AppConfig, commands::CommandResult> {
    let require_file = path.is_some();
    AppConfig::load(LoadOptions { config_path: path, require_file }).map_err(|error| {
        commands::CommandResult::failure("config_validation", error.to_string(), 2)
    })
}

pub async fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Eval { agent, scenario, config, agents, json } => {
            match load_config(config) {
                Ok(mut config) => {
                    init_logging(&config);
                    if let Some(agents_path) = agents {
                        config.agents.path = agents_path;
                    }
                    commands::eval::run(&config, agent.as_deref(), scenario.as_deref(), json)
                        .await
                }
                Err(failure) => failure,
            }
        }
        Command::Config { config } => match load_config(config) {
            Ok(config) => {
                commands::CommandResult { exit_code: 0, output: commands::config::run(&config) }
            }
            Err(failure) => failure,
        },
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
