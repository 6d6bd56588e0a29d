use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};

use command_watcher::{
    load_config_or_default, CommandArgs, ProcessOptions, ReportFields, Reporter, RunOptions,
    Status, Watch, WatchError, WatchOptions,
};

/// Exit code used when the command is killed by `--timeout`.
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Run a command once, capture its output, and report the result to the
/// configured channels (e-mail, Icinga, beep).
#[derive(Parser, Debug)]
#[command(name = "command-watcher", version, about)]
pub struct Cli {
    /// Config file path (default: /etc/command-watcher.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Service name the results are reported under
    #[arg(short, long, default_value = command_watcher::watch::DEFAULT_SERVICE_NAME)]
    service_name: String,

    /// Human-readable service name (used when Icinga creates the service)
    #[arg(long)]
    display_name: Option<String>,

    /// Non-zero exit code that still counts as success (repeatable)
    #[arg(long = "ignore-exit-code", value_name = "CODE")]
    ignore_exit_codes: Vec<i32>,

    /// Do not send a CRITICAL report from the run itself on failure;
    /// the final report carries the outcome instead
    #[arg(long)]
    no_raise: bool,

    /// Run the command through `sh -c`
    #[arg(long)]
    shell: bool,

    /// Working directory of the command
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Extra environment variable for the command (repeatable)
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    env: Vec<(String, String)>,

    /// Kill the command after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Debug output (channel delivery, process lifecycle)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// The command. A single argument is split like a shell would.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

/// How the watched command ended, as far as the final report cares.
enum Outcome {
    Finished(i32),
    /// `Watch::run` already sent the CRITICAL report.
    Failed(i32),
    NotStarted(String),
    TimedOut(u64),
    /// SIGINT or SIGTERM arrived while the command was running.
    Interrupted(SignalKind),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_env("COMMAND_WATCHER_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let config = match load_config_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "cannot load configuration");
            return 1;
        }
    };

    let reporter = Reporter::from_config(&config, cli.display_name.as_deref());
    let mut watch = Watch::new(
        WatchOptions {
            service_name: cli.service_name.clone(),
            service_display_name: cli.display_name.clone(),
            raise_exceptions: !cli.no_raise,
        },
        reporter,
    );

    let options = RunOptions {
        log: true,
        ignore_exit_codes: cli.ignore_exit_codes.clone(),
        process: ProcessOptions {
            cwd: cli.cwd.clone(),
            env: cli.env.iter().cloned().collect(),
            shell: cli.shell,
            // On a terminal the command shares our process group, so Ctrl-C
            // and terminal input reach it directly.
            foreground: std::io::stdin().is_terminal(),
        },
    };
    let args = command_args(cli.command);

    // Leaving the select drops the run future, which kills the command.
    let outcome = tokio::select! {
        result = exit_code(&mut watch, args, &options) => match result {
            Ok(code) => Outcome::Finished(code),
            Err(WatchError::CommandFailure { exit_code, .. }) => Outcome::Failed(exit_code),
            Err(e) => Outcome::NotStarted(e.to_string()),
        },
        () = deadline(cli.timeout) => Outcome::TimedOut(cli.timeout.unwrap_or_default()),
        kind = shutdown_signal() => Outcome::Interrupted(kind),
    };

    match outcome {
        Outcome::TimedOut(secs) => watch
            .logger()
            .critical(format!("Timeout: killed after {secs}s")),
        Outcome::Interrupted(kind) => watch
            .logger()
            .critical(format!("Interrupted by {}, command killed", signal_name(kind))),
        _ => {}
    }
    finish(&watch, outcome, &options).await
}

async fn exit_code(
    watch: &mut Watch,
    args: CommandArgs,
    options: &RunOptions,
) -> Result<i32, WatchError> {
    watch.run(args, options).await.map(|p| p.exit_code())
}

/// Completes after `timeout` seconds, or never.
async fn deadline(timeout: Option<u64>) {
    match timeout {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending().await,
    }
}

/// Completes on the first SIGINT or SIGTERM.
async fn shutdown_signal() -> SignalKind {
    let (mut interrupt, mut terminate) =
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(interrupt), Ok(terminate)) => (interrupt, terminate),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "cannot install signal handlers");
                return std::future::pending().await;
            }
        };
    tokio::select! {
        _ = interrupt.recv() => SignalKind::interrupt(),
        _ = terminate.recv() => SignalKind::terminate(),
    }
}

fn signal_name(kind: SignalKind) -> &'static str {
    if kind == SignalKind::interrupt() {
        "SIGINT"
    } else {
        "SIGTERM"
    }
}

/// Send the final report and map the outcome to the process exit code.
async fn finish(watch: &Watch, outcome: Outcome, options: &RunOptions) -> i32 {
    let (status, custom_message, exit_code) = match outcome {
        Outcome::Finished(code) if code == 0 || options.ignore_exit_codes.contains(&code) => {
            (Status::Ok, None, code)
        }
        Outcome::Finished(code) => (
            Status::Critical,
            Some(format!("The command exits with a non-zero return code ({code}).")),
            code,
        ),
        Outcome::Failed(code) => return exit_status(code),
        Outcome::NotStarted(reason) => (Status::Critical, Some(reason), 1),
        Outcome::TimedOut(secs) => (
            Status::Critical,
            Some(format!("Timeout: the command did not finish within {secs}s.")),
            TIMEOUT_EXIT_CODE,
        ),
        Outcome::Interrupted(kind) => (
            Status::Critical,
            Some(format!("Interrupted by {}.", signal_name(kind))),
            128 + kind.as_raw_value(),
        ),
    };

    let fields = ReportFields {
        custom_message,
        ..Default::default()
    };
    if let Err(e) = watch.final_report(status, fields).await {
        tracing::error!(error = %e, "final report failed");
    }
    exit_status(exit_code)
}

/// Shells report a signal-terminated child as 128 + signal.
fn exit_status(code: i32) -> i32 {
    if code < 0 {
        128 - code
    } else {
        code
    }
}

fn command_args(mut command: Vec<String>) -> CommandArgs {
    if command.len() == 1 {
        CommandArgs::Line(command.remove(0))
    } else {
        CommandArgs::Argv(command)
    }
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}
