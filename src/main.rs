mod commands;
mod context;
mod driver;
mod error;
mod executor;
mod expr;
mod graph;
mod manifest;
mod output;
mod outputs;
mod plan;
mod provider;
mod render;
mod state;
mod traits;
mod vars;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{
    ApplyCommand, DestroyCommand, InitCommand, OutputCommand, PlanCommand, ValidateCommand,
};
use context::Context;
use driver::RunConfig;
use error::EngineError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lattice")]
#[command(about = "Declarative resource provisioning against a remote management API", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the stack manifest
    #[arg(long, global = true, default_value = "lattice.yaml")]
    manifest: PathBuf,

    /// Path to the state file
    #[arg(long, global = true, default_value = "lattice.state.json")]
    state: PathBuf,

    /// Variable override file (NAME=VALUE lines)
    #[arg(long, global = true)]
    var_file: Option<PathBuf>,

    /// Base URL of the resource-management API
    #[arg(
        long,
        global = true,
        env = "LATTICE_API_URL",
        default_value = "http://localhost:8080"
    )]
    endpoint: String,

    /// Bearer token for the resource-management API
    #[arg(long, global = true, env = "LATTICE_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Maximum number of actions executed concurrently
    #[arg(long, global = true, default_value_t = 4)]
    parallelism: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold a starter manifest and an empty state file
    Init {
        /// Stack name for the generated manifest
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Check the manifest, variables and dependency graph without touching state
    Validate,

    /// Show what would change (optionally saving the plan for a later apply)
    Plan {
        /// Write the plan to this file
        #[arg(long)]
        out: Option<PathBuf>,

        /// Compare recorded state against the remote API before planning
        #[arg(long)]
        refresh: bool,
    },

    /// Execute changes to make reality match the manifest
    Apply {
        /// Apply a previously saved plan file instead of replanning
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Skip the interactive approval prompt
        #[arg(long)]
        auto_approve: bool,
    },

    /// Destroy every resource recorded in state
    Destroy {
        /// Skip the interactive approval prompt
        #[arg(long)]
        auto_approve: bool,
    },

    /// Show stack outputs (all, or one bare value by name)
    Output {
        /// Output name to print on its own
        name: Option<String>,
    },
}

fn run(ctx: &Context, config: &RunConfig, command: Commands) -> Result<i32> {
    match command {
        Commands::Init { name } => InitCommand::execute(ctx, config, name.as_deref()),
        Commands::Validate => ValidateCommand::execute(ctx, config),
        Commands::Plan { out, refresh } => {
            PlanCommand::execute(ctx, config, out.as_deref(), refresh)
        }
        Commands::Apply { plan, auto_approve } => {
            ApplyCommand::execute(ctx, config, plan.as_deref(), auto_approve)
        }
        Commands::Destroy { auto_approve } => DestroyCommand::execute(ctx, config, auto_approve),
        Commands::Output { name } => OutputCommand::execute(ctx, config, name.as_deref()),
    }
}

fn main() {
    let cli = Cli::parse();
    let ctx = Context::new();

    let config = RunConfig {
        manifest_path: cli.manifest,
        state_path: cli.state,
        var_file: cli.var_file,
        endpoint: cli.endpoint,
        credentials: cli.token,
        parallelism: cli.parallelism,
    };

    let code = match run(&ctx, &config, cli.command) {
        Ok(code) => code,
        Err(err) => {
            ctx.output.error(&format!("{:#}", err));
            err.downcast_ref::<EngineError>()
                .map(EngineError::exit_code)
                .unwrap_or(1)
        }
    };

    std::process::exit(code);
}
