pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use reqflow_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat, LoggingConfig};

use crate::commands::check::{CheckArgs, EntityArg};

#[derive(Debug, Parser)]
#[command(
    name = "reqflow",
    about = "Reqflow operator CLI",
    long_about = "Inspect client configuration, the stored session, view access, cheque grouping, and transition legality for the requisition workflow.",
    after_help = "Examples:\n  reqflow doctor --json\n  reqflow route /batches\n  reqflow cheques --requisitions ready.json --select r-1,r-2\n  reqflow check requisition --entity req.json --action '{\"action\":\"approve\"}'"
)]
pub struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    #[arg(long, global = true, help = "Config file to load instead of reqflow.toml")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override api.base_url")]
    api_base_url: Option<String>,
    #[arg(long, global = true, help = "Override session.storage_path")]
    session_dir: Option<PathBuf>,
}

impl GlobalArgs {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            require_file: self.config.is_some(),
            config_path: self.config.clone(),
            overrides: ConfigOverrides {
                api_base_url: self.api_base_url.clone(),
                session_storage_path: self.session_dir.clone(),
                ..ConfigOverrides::default()
            },
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, session storage, and API reachability")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Restore the stored session and report its state")]
    Session {
        #[arg(long, help = "Sign out locally by clearing the stored session")]
        clear: bool,
    },
    #[command(about = "Decide what the stored session may see at a location")]
    Route {
        location: String,
        #[arg(long, help = "Location to come back to after signing in")]
        return_to: Option<String>,
    },
    #[command(about = "Group selected requisitions by payee into cheque previews")]
    Cheques {
        #[arg(long, help = "JSON file holding a list of requisitions")]
        requisitions: PathBuf,
        #[arg(long, value_delimiter = ',', help = "Requisition ids to include (default: all)")]
        select: Vec<String>,
    },
    #[command(about = "Check whether an action is legal for an entity and an actor")]
    Check {
        #[arg(value_enum)]
        kind: EntityArg,
        #[arg(long, help = "JSON file holding the entity")]
        entity: PathBuf,
        #[arg(long, help = "Action as JSON, e.g. {\"action\":\"submit\"}; omit to list actions")]
        action: Option<String>,
        #[arg(long, help = "JSON file holding the actor (default: the stored session user)")]
        user: Option<PathBuf>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.global.load_options();

    if let Ok(config) = AppConfig::load(options.clone()) {
        init_logging(&config.logging);
    }

    let result = match cli.command {
        Command::Config => commands::config::run(&options),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(&options, json) }
        }
        Command::Session { clear } => commands::session::run(&options, clear),
        Command::Route { location, return_to } => {
            commands::route::run(&options, &location, return_to.as_deref())
        }
        Command::Cheques { requisitions, select } => commands::cheques::run(&requisitions, &select),
        Command::Check { kind, entity, action, user } => {
            commands::check::run(&options, &CheckArgs { kind, entity, action, user })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so command payloads on stdout stay parseable.
fn init_logging(config: &LoggingConfig) {
    let level = config.level.parse::<tracing::Level>().unwrap_or(tracing::Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_max_level(level);

    let installed = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(error) = installed {
        eprintln!("logging already initialized: {error}");
    }
}
