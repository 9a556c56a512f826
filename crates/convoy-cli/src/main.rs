mod config;
mod daemon_cmd;
mod model_cmds;
mod plan_cmds;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};

use config::ConvoyConfig;

#[derive(Parser)]
#[command(name = "convoy", about = "Deployment orchestration control plane")]
struct Cli {
    /// Configuration file path (overrides CONVOY_CONF; default /etc/convoyd.conf)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file path (overrides CONVOY_DATABASE_PATH and the config file)
    #[arg(long, global = true)]
    database_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Declarative model management
    Model {
        #[command(subcommand)]
        command: ModelCommands,
    },
    /// Compile a plan from the current model
    Create,
    /// Run the plan to completion
    Run,
    /// Stop the running plan at the next phase boundary
    Stop,
    /// Remove the plan (the success ledger is kept)
    Remove,
    /// Show the plan's phases and tasks
    Show,
    /// Run the control-plane service in the foreground
    Daemon,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum ModelCommands {
    /// Sync the model store to match a declarative TOML document
    Sync {
        /// Path to the model document
        file: String,
    },
    /// List model items with their lifecycle states
    Show,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match ConvoyConfig::resolve(cli.config.as_deref(), cli.database_path.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    };

    let result: anyhow::Result<()> = match cli.command {
        Commands::Model { command } => model_cmds::run_model_command(command, &config.model_path),
        Commands::Create => plan_command(plan_cmds::run_plan_command(PlanCommands::Create, &config).await),
        Commands::Run => plan_command(plan_cmds::run_plan_command(PlanCommands::Run, &config).await),
        Commands::Stop => plan_command(plan_cmds::run_plan_command(PlanCommands::Stop, &config).await),
        Commands::Remove => plan_command(plan_cmds::run_plan_command(PlanCommands::Remove, &config).await),
        Commands::Show => plan_command(plan_cmds::run_plan_command(PlanCommands::Show, &config).await),
        Commands::Daemon => daemon_cmd::run_daemon(&config).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(error) = result {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

/// A plan command the transport layer can issue.
#[derive(Debug, Clone, Copy)]
pub enum PlanCommands {
    Create,
    Run,
    Stop,
    Remove,
    Show,
}

/// Map an API error into the `<kind>    <message>` form matched by
/// external tooling.
fn plan_command(result: Result<(), convoy_core::ApiError>) -> anyhow::Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(error) => Err(anyhow::anyhow!("{}    {}", error.kind(), error)),
    }
}
