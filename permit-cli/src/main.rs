//! `permit`: evaluate capability requests against a permission broker
//!
//! ```text
//! permit check --allow-net=0.0.0.0:8000 net:0.0.0.0:8000 read:/etc/hosts
//! permit query --deny-env env:AWS_SECRET
//! permit config --allow-read=/tmp
//! ```

mod tracing_support;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use permit_broker::audit::FileAuditSink;
use permit_broker::permission::{
    BrokerBuilder, FlagConfig, PermissionFlags, PermissionsConfig, TerminalPromptHandler,
};
use permit_broker::{PermissionBroker, PermissionRequest, PermissionState};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_support::{TracingConfig, TracingFormat};

const APP_NAME: &str = "permit";

#[derive(Parser, Debug)]
#[command(name = "permit", version, about = "Permission-gated capability broker")]
struct Cli {
    /// Permissions file (default: <config dir>/permit/permissions.json)
    #[arg(long, env = "PERMIT_CONFIG")]
    config: Option<PathBuf>,

    /// Append audit events as JSON lines to FILE
    #[arg(long, value_name = "FILE")]
    audit_log: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "compact")]
    log_format: TracingFormat,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check requests, prompting for undecided ones
    Check {
        #[command(flatten)]
        args: RequestArgs,

        /// Deny a prompt left unanswered for SECS seconds
        #[arg(long, value_name = "SECS")]
        prompt_timeout: Option<u64>,
    },
    /// Print the current state of each request without prompting
    Query {
        #[command(flatten)]
        args: RequestArgs,
    },
    /// Print the effective configuration (file merged with flags) as JSON
    Config {
        #[command(flatten)]
        args: RequestArgs,
    },
}

#[derive(Args, Debug)]
struct RequestArgs {
    /// Permission flags (--allow-net[=SCOPE], --deny-read=PATH, -A, --no-prompt)
    /// followed by requests: KIND or KIND:SCOPE, e.g. net:0.0.0.0:8000
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

impl RequestArgs {
    /// Split into permission flags and parsed requests
    fn parse(&self) -> anyhow::Result<(PermissionFlags, Vec<PermissionRequest>)> {
        let (flags, rest) = FlagConfig::default().parse_args(&self.args)?;
        let requests = rest
            .iter()
            .filter(|arg| arg.as_str() != "--")
            .map(|arg| {
                arg.parse::<PermissionRequest>()
                    .with_context(|| format!("invalid request `{arg}`"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok((flags, requests))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing = TracingConfig::default()
        .with_format(cli.log_format)
        .with_verbosity(cli.verbose);
    if let Err(e) = tracing_support::init_subscriber(&tracing) {
        eprintln!("permit: failed to initialize logging: {e}");
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let allowed = match &cli.command {
        Command::Check {
            args,
            prompt_timeout,
        } => {
            let (flags, requests) = args.parse()?;
            let prompt = match prompt_timeout {
                Some(secs) => TerminalPromptHandler::with_timeout(Duration::from_secs(*secs)),
                None => TerminalPromptHandler::new(),
            };
            let mut builder = BrokerBuilder::new().config(config).flags(flags).prompt(prompt);
            if let Some(path) = &cli.audit_log {
                let sink = FileAuditSink::new(path)
                    .with_context(|| format!("cannot open audit log {}", path.display()))?;
                builder = builder.audit(sink);
            }
            let broker = builder.build()?;
            check(&broker, &requests, &mut out)?
        }
        Command::Query { args } => {
            let (flags, requests) = args.parse()?;
            let broker = BrokerBuilder::new()
                .config(config)
                .flags(flags)
                .no_prompt(true)
                .build()?;
            query(&broker, &requests, &mut out)?
        }
        Command::Config { args } => {
            let (flags, requests) = args.parse()?;
            if !requests.is_empty() {
                anyhow::bail!("`config` takes permission flags only");
            }
            let mut config = config;
            flags.merge_into(&mut config);
            // Reject anything that would fail at broker start-up
            config.entries()?;
            writeln!(out, "{}", serde_json::to_string_pretty(&config)?)?;
            true
        }
    };

    Ok(if allowed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<PermissionsConfig> {
    let config = match path {
        Some(path) => PermissionsConfig::load(path)?,
        None => PermissionsConfig::load_default(APP_NAME)?,
    };
    Ok(config)
}

/// Gate each request; returns whether all were allowed
fn check(
    broker: &PermissionBroker,
    requests: &[PermissionRequest],
    out: &mut impl Write,
) -> anyhow::Result<bool> {
    if requests.is_empty() {
        anyhow::bail!("no requests given");
    }

    let mut all_allowed = true;
    for request in requests {
        match broker.check_request(request) {
            Ok(()) => writeln!(out, "allow\t{request}")?,
            Err(denied) => {
                all_allowed = false;
                tracing::info!(%request, "denied");
                writeln!(out, "deny\t{request}\t{denied}")?;
            }
        }
    }
    Ok(all_allowed)
}

/// Print the resolved state of each request; returns whether all are granted
fn query(
    broker: &PermissionBroker,
    requests: &[PermissionRequest],
    out: &mut impl Write,
) -> anyhow::Result<bool> {
    if requests.is_empty() {
        anyhow::bail!("no requests given");
    }

    let mut all_granted = true;
    for request in requests {
        let state = broker.query(request.kind, request.scope.as_ref());
        all_granted &= state == PermissionState::Granted;
        writeln!(out, "{state}\t{request}")?;
    }
    Ok(all_granted)
}
