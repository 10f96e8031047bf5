//! fast-ci CLI
//!
//! Runs one node of an orchestrated CI build:
//! - `run` joins the build and executes the test batches it is handed
//! - `context` shows which build this node would join
//! - `config` manages the session config file

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fast_ci::commands::{self, RunOptions};
use fast_ci::output::print_error;
use fci_core::config::RunContext;

#[derive(Parser)]
#[command(name = "fast-ci")]
#[command(author, version, about = "Distributed test runner for fast.ci orchestrated builds")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(flatten)]
    context: ContextArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the detected run context
#[derive(Args)]
struct ContextArgs {
    /// Name of the test suite being distributed
    #[arg(long, global = true, env = "FAST_CI_RUN_KEY")]
    run_key: Option<String>,

    /// Build shared by all nodes
    #[arg(long, global = true, env = "BUILD_ID")]
    build_id: Option<String>,

    /// Commit under test (default: detected from CI, then git)
    #[arg(long, global = true)]
    commit: Option<String>,

    /// Branch under test (default: detected from CI, then git)
    #[arg(long, global = true)]
    branch: Option<String>,

    /// Orchestrator host
    #[arg(long, global = true, env = "FAST_CI_API_URL")]
    api_url: Option<String>,

    /// Secret used to authenticate with the orchestrator
    #[arg(long, global = true, env = "FAST_CI_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,
}

impl ContextArgs {
    fn resolve(self) -> Result<RunContext> {
        let mut builder = RunContext::builder().detect_process_env();
        if let Some(run_key) = self.run_key {
            builder = builder.run_key(run_key);
        }
        if let Some(build_id) = self.build_id {
            builder = builder.build_id(build_id);
        }
        if let Some(commit) = self.commit {
            builder = builder.commit(commit);
        }
        if let Some(branch) = self.branch {
            builder = builder.branch(branch);
        }
        if let Some(api_url) = self.api_url {
            builder = builder.api_host(api_url);
        }
        if let Some(secret_key) = self.secret_key {
            builder = builder.secret_key(secret_key);
        }
        builder.build().context("Invalid run context")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Join the build and run the test batches handed out by the orchestrator
    Run {
        /// Command that runs tests; each batch's test ids are appended to it
        #[arg(long, value_name = "CMD")]
        command: String,
        /// Test inventory, submitted if this node becomes the leader
        tests: Vec<String>,
        /// Read more test ids from a file, one per line
        #[arg(long, value_name = "FILE")]
        tests_from: Option<PathBuf>,
        /// Heartbeat interval in seconds (overrides config)
        #[arg(long, value_name = "SECS")]
        heartbeat: Option<u64>,
        /// Connect over TLS (overrides config)
        #[arg(long)]
        secure: bool,
    },

    /// Print the detected run context as JSON
    Context,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            command,
            tests,
            tests_from,
            heartbeat,
            secure,
        } => {
            let mut session_config = commands::load_session_config(cli.config.as_ref())?;
            if let Some(secs) = heartbeat {
                session_config.heartbeat_interval = Some(Duration::from_secs(secs));
            }
            if secure {
                session_config.secure = true;
            }
            let context = cli.context.resolve()?;

            let options = RunOptions {
                command,
                tests,
                tests_from,
            };
            commands::run_command(context, session_config, options).await?;
        }

        Commands::Context => {
            commands::load_session_config(cli.config.as_ref())?;
            let context = cli.context.resolve()?;
            commands::context_command(&context)?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(cli.config.as_ref())?,
            ConfigAction::Init { force } => commands::config_init(cli.config.as_ref(), force)?,
            ConfigAction::Path => {
                println!("{}", commands::config_file(cli.config.as_ref()).display());
            }
        },
    }

    Ok(())
}
