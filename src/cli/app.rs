//! Main CLI application

use crate::config::find_deofile;
use crate::logging::init_logging;
use crate::utils::format_elapsed;
use crate::Deo;
use anyhow::{anyhow, bail, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command, ValueEnum};
use clap_complete::{generate, Shell};
use colored::Colorize;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Target run when none is given
pub const DEFAULT_TARGET: &str = "default";

/// Log level as exposed on the CLI
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Build the clap command
pub fn build_command() -> Command {
    Command::new("deo")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A programmable task runner with dependency-ordered targets")
        .arg(
            Arg::new("targets")
                .value_name("TARGET")
                .help("Targets to run, in order [default: default]")
                .num_args(0..)
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .help("Path to deofile.yml")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Logging level; overrides -v, -q and DEO_LOG")
                .value_parser(value_parser!(LogLevel)),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Print verbose output (-vv for trace)")
                .action(ArgAction::Count)
                .conflicts_with("quiet"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only print warnings and errors")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list")
                .short('l')
                .long("list")
                .help("List the targets defined in the deofile")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("completions")
                .long("completions")
                .value_name("SHELL")
                .help("Print a shell completion script")
                .value_parser(value_parser!(Shell)),
        )
}

/// Get the verbosity offset from matches: positive is louder
fn get_verbosity(matches: &ArgMatches) -> i8 {
    if matches.get_flag("quiet") {
        -1
    } else {
        matches.get_count("verbose").min(i8::MAX as u8) as i8
    }
}

/// Targets named on the command line, or the default target
fn get_targets(matches: &ArgMatches) -> Vec<String> {
    let targets: Vec<String> = matches
        .get_many::<String>("targets")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    if targets.is_empty() {
        vec![DEFAULT_TARGET.to_string()]
    } else {
        targets
    }
}

fn print_targets(deo: &Deo) {
    let targets = deo.targets();
    if targets.is_empty() {
        println!("No targets defined");
        return;
    }

    let width = targets.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    for (name, deps) in targets {
        if deps.is_empty() {
            println!("  {}", name.bold());
        } else {
            println!(
                "  {:width$}  {} {}",
                name.bold(),
                "<-".dimmed(),
                deps.join(", ").dimmed(),
                width = width
            );
        }
    }
}

/// Run the CLI application with the process arguments
pub async fn run() -> Result<()> {
    run_from(std::env::args_os()).await
}

/// Run the CLI application with provided arguments
pub async fn run_from<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = build_command().get_matches_from(args);

    if let Some(shell) = matches.get_one::<Shell>("completions") {
        generate(*shell, &mut build_command(), "deo", &mut io::stdout());
        return Ok(());
    }

    init_logging(
        matches.get_one::<LogLevel>("log-level").copied(),
        get_verbosity(&matches),
    )?;

    let start = Instant::now();
    let path = match matches.get_one::<PathBuf>("file") {
        Some(path) => path.clone(),
        None => find_deofile()?,
    };

    let deo = Deo::with_builtin_tasks();
    deo.load_deofile(&path)?;

    if matches.get_flag("list") {
        print_targets(&deo);
        return Ok(());
    }

    let targets = get_targets(&matches);
    let result = execute(&deo, &targets).await;

    debug!("Cleaning up running tasks...");
    let disposal_errors = deo.kill().await;
    for e in &disposal_errors {
        error!("{}", e);
    }
    debug!("Clean up complete");

    info!("All tasks completed in {}", format_elapsed(start.elapsed()));

    result?;
    if !disposal_errors.is_empty() {
        bail!("{} task(s) failed to clean up", disposal_errors.len());
    }
    Ok(())
}

/// Run the targets, then wait for long-running ones to stop
async fn execute(deo: &Deo, targets: &[String]) -> Result<()> {
    tokio::select! {
        result = deo.run_tasks(targets) => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            return Ok(());
        }
    }

    if !deo.is_running() {
        return Ok(());
    }

    info!("Tasks are still running, press CTRL+C to stop");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            debug!("Received interrupt");
            Ok(())
        }
        _ = deo.wait_until_idle() => {
            // every long-running task stopped on its own, which only happens on failure
            let failed = deo.failed_tasks();
            if failed.is_empty() {
                Ok(())
            } else {
                Err(anyhow!("task(s) failed after start: {}", failed.join(", ")))
            }
        }
    }
}
