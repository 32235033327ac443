mod api;
mod app;
mod auth;
mod classify;
mod cli;
mod config;
mod model;
mod routes;
mod scan;
mod session;
mod storage;
mod transport;

#[cfg(test)]
mod testing;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "attend", about = "Campus attendance client", version)]
pub struct Args {
    #[arg(long, env = "ATTEND_BASE_URL", help = "Backend base URL (overrides config)")]
    pub base_url: Option<String>,

    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "ATTEND_STATE_DIR",
        help = "Directory holding the saved session"
    )]
    pub state_dir: Option<PathBuf>,

    #[arg(long, value_name = "MS", help = "Request timeout in milliseconds")]
    pub timeout_ms: Option<u64>,

    #[arg(long, global = true, help = "Print responses as JSON")]
    pub json: bool,

    #[arg(long, global = true, help = "Debug output (HTTP requests, page guards)")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: cli::Command,
}

fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => config::Config::load_from(path)?,
        None => config::Config::load()?,
    };

    // CLI flags win over every config layer
    if let Some(base_url) = &args.base_url {
        cfg.api.base_url = base_url.clone();
    }
    if let Some(timeout_ms) = args.timeout_ms {
        cfg.api.timeout_ms = timeout_ms;
    }
    if let Some(dir) = &args.state_dir {
        cfg.session.dir = Some(dir.clone());
    }

    if let Err(errors) = cfg.validate() {
        eprintln!("Invalid configuration:");
        for error in &errors {
            eprintln!("  {}", error);
        }
        return Ok(ExitCode::FAILURE);
    }

    init_logging(&cfg, args.debug);

    let ctx = app::AppContext::from_config(cfg)?;
    let printer = cli::Printer::new(args.json);

    let outcome = match &args.command {
        cli::Command::Shell => {
            cli::run_shell(&ctx, &printer)?;
            cli::Outcome::Done
        }
        command => cli::run_command(&ctx, command, &printer)?,
    };
    Ok(outcome.exit_code())
}

/// Logs go to stderr. `--debug` beats RUST_LOG, which beats the config filter.
fn init_logging(cfg: &config::Config, debug: bool) {
    let filter = if debug {
        EnvFilter::new("attend=debug")
    } else if let Ok(filter) = EnvFilter::try_from_default_env() {
        filter
    } else {
        EnvFilter::new(cfg.logging.filter.as_deref().unwrap_or("attend=warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
