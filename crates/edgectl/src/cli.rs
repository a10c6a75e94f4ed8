use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};
use thiserror::Error;

use crate::config::Config;
use edge_ghost::{GhostError, GhostService};
use edge_mirage::{MirageError, MirageService};
use edge_session::CancelToken;
use edge_session::admin::{self, AdminError};

#[derive(Debug, Parser)]
#[command(name = "edgectl", version, about = "Run and drive Ghost and Mirage services")]
pub struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ghost edge service.
    Ghost {
        #[command(subcommand)]
        cmd: RunCmd,
    },
    /// Mirage orchestrator service.
    Mirage {
        #[command(subcommand)]
        cmd: RunCmd,
    },
    /// Send one JSON request to an admin listener and print the response.
    Admin(AdminArgs),
}

#[derive(Debug, Subcommand)]
pub enum RunCmd {
    /// Run in the foreground until the process is terminated.
    Run {
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
pub struct AdminArgs {
    #[arg(long, value_name = "HOST:PORT")]
    pub addr: String,

    pub action: String,

    /// Extra request fields as a JSON object; `action` is set from the
    /// positional argument.
    #[arg(long, value_name = "REQUEST")]
    pub json: Option<String>,

    #[arg(long, default_value_t = 5_000)]
    pub timeout_ms: u64,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CliError {
    #[error(transparent)]
    Ghost(#[from] GhostError),
    #[error(transparent)]
    Mirage(#[from] MirageError),
    #[error(transparent)]
    Admin(#[from] AdminError),
    #[error("invalid --json request: {0}")]
    InvalidRequest(String),
    #[error("{action} failed: {message}")]
    Remote { action: String, message: String },
    #[error("failed to write response: {0}")]
    Output(#[from] std::io::Error),
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

pub fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Ghost { .. } => "ghost run",
        Command::Mirage { .. } => "mirage run",
        Command::Admin(_) => "admin",
    }
}

/// The `--config` path of a run command.
pub fn config_path(command: &Command) -> Option<&std::path::Path> {
    match command {
        Command::Ghost {
            cmd: RunCmd::Run { config },
        }
        | Command::Mirage {
            cmd: RunCmd::Run { config },
        } => config.as_deref(),
        Command::Admin(_) => None,
    }
}

pub fn is_service(command: &Command) -> bool {
    !matches!(command, Command::Admin(_))
}

pub fn run(cli: Cli, config: Config) -> Result<(), CliError> {
    match cli.command {
        Command::Ghost { .. } => {
            let service = GhostService::bootstrap(config.ghost)?;
            service.serve(&CancelToken::new())?;
            Ok(())
        }
        Command::Mirage { .. } => {
            let service = MirageService::bootstrap(config.mirage)?;
            service.serve(&CancelToken::new())?;
            Ok(())
        }
        Command::Admin(args) => run_admin(args, &mut std::io::stdout()),
    }
}

fn run_admin(args: AdminArgs, out: &mut impl Write) -> Result<(), CliError> {
    let request = admin_request(&args)?;
    let response = admin::call(&args.addr, &request, Duration::from_millis(args.timeout_ms))?;
    let rendered = serde_json::to_string_pretty(&response)
        .map_err(|err| CliError::Output(std::io::Error::other(err)))?;
    writeln!(out, "{rendered}")?;
    if response.ok {
        return Ok(());
    }
    Err(CliError::Remote {
        action: args.action,
        message: response.error.unwrap_or_default(),
    })
}

fn admin_request(args: &AdminArgs) -> Result<serde_json::Value, CliError> {
    let mut request = match args.json.as_deref().map(str::trim) {
        None | Some("") => serde_json::Map::new(),
        Some(raw) => match serde_json::from_str(raw) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) => return Err(CliError::InvalidRequest("expected a JSON object".into())),
            Err(err) => return Err(CliError::InvalidRequest(err.to_string())),
        },
    };
    request.insert(
        "action".into(),
        serde_json::Value::String(args.action.trim().to_string()),
    );
    Ok(serde_json::Value::Object(request))
}
