mod commands;
mod config;
mod errors;
mod output;
mod signals;

use std::path::PathBuf;

use crate::{
    commands::Commands,
    config::Config,
    errors::{CliError, EXIT_CONFIG, EXIT_OK, Result},
};
use clap::Parser;
use colored::Colorize;
use stackup_core::validator::GateStatus;
use stackup_core::{Stack, UpOptions};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// stackup - validate, start and stop a local service stack
#[derive(Parser, Debug)]
#[command(name = "stackup")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the stack file (default: stackup.yaml in this or a parent directory)
    #[arg(short = 'f', long = "file", global = true)]
    pub file: Option<String>,

    /// Environment file to use instead of the stack file's `env_file`
    #[arg(long = "env-file", global = true)]
    pub env_file: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_CONFIG } else { EXIT_OK };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        if !e.is_reported() {
            eprintln!("{} {}", "Error:".red().bold(), e);
        }
        std::process::exit(e.exit_code());
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let stack_path = Config::resolve_stack_path(&cli.file)?;
    let stack = Stack::load(&stack_path, cli.env_file.as_deref())?;

    match cli.command {
        Commands::Validate { json } => handle_validate(&stack, json).await,
        Commands::Plan { json } => handle_plan(&stack, json),
        Commands::Up {
            detach,
            ignore_errors,
        } => handle_up(&stack, detach, ignore_errors).await,
        Commands::Down => handle_down(&stack).await,
        Commands::Status { json } => handle_status(&stack, json),
    }
}

async fn handle_validate(stack: &Stack, json: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    signals::cancel_on_signal(cancel.clone());

    let summary = stack.validate(&cancel).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        output::print_validation(&summary);
    }

    if cancel.is_cancelled() {
        return Err(CliError::Interrupted);
    }
    match summary.status {
        GateStatus::Ok => Ok(()),
        status => Err(CliError::Validation(status)),
    }
}

fn handle_plan(stack: &Stack, json: bool) -> Result<()> {
    let plan = stack.plan()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        output::print_plan(&plan);
    }
    Ok(())
}

async fn handle_up(stack: &Stack, detach: bool, ignore_errors: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    signals::cancel_on_signal(cancel.clone());

    let report = match stack.up(UpOptions { ignore_errors }, &cancel).await {
        Ok(report) => report,
        Err(e) => {
            match &e {
                stackup_core::LaunchError::Validation { summary } => {
                    output::print_validation(summary)
                }
                stackup_core::LaunchError::Startup { result, .. } => output::print_startup(result),
                stackup_core::LaunchError::Stack(_) => {}
            }
            return Err(e.into());
        }
    };

    if report.validation.status != GateStatus::Ok {
        output::print_validation(&report.validation);
    }
    output::print_startup(&report.startup);

    if detach {
        println!("Stack is up. Stop it with `stackup down`.");
        return Ok(());
    }

    println!("Stack is up. Press Ctrl-C to stop.");
    cancel.cancelled().await;
    info!("Stopping stack");

    let shutdown = stack.down().await?;
    output::print_shutdown(&shutdown);
    if !shutdown.is_complete() {
        return Err(CliError::ShutdownIncomplete(
            shutdown
                .incomplete()
                .iter()
                .map(|s| s.service.clone())
                .collect(),
        ));
    }
    Ok(())
}

async fn handle_down(stack: &Stack) -> Result<()> {
    let report = stack.down().await?;
    output::print_shutdown(&report);

    if report.is_complete() {
        Ok(())
    } else {
        let mut remaining: Vec<String> = report
            .incomplete()
            .iter()
            .map(|s| s.service.clone())
            .collect();
        if let Some(compose) = report.compose.as_ref().filter(|c| c.error.is_some()) {
            remaining.push(format!("compose project {}", compose.project));
        }
        Err(CliError::ShutdownIncomplete(remaining))
    }
}

fn handle_status(stack: &Stack, json: bool) -> Result<()> {
    let records = stack.status()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        output::print_status(&records);
    }
    Ok(())
}
