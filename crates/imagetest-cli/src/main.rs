mod config;
mod harness_cmds;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};

use imagetest_core::HarnessController;
use imagetest_core::engine::DockerEngine;

use config::ResolvedConfig;
use state::StateStore;

#[derive(Parser)]
#[command(
    name = "imagetest",
    about = "Provision and tear down containerized test harnesses"
)]
struct Cli {
    /// Provider config file (overrides IMAGETEST_CONFIG env var)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for harness state files (overrides IMAGETEST_STATE_DIR env var)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Docker CLI binary to drive
    #[arg(long, global = true, default_value = "docker")]
    docker: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter provider config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Show the container options a harness file resolves to (no engine calls)
    Plan {
        /// Path to the harness TOML file
        file: PathBuf,
        /// Print the launch plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Provision a harness from a TOML file
    Create {
        /// Path to the harness TOML file
        file: PathBuf,
    },
    /// Reconcile stored harness state with the container engine
    Read {
        /// Harness identifier
        id: String,
    },
    /// Re-apply a harness definition to an existing harness
    Update {
        /// Path to the harness TOML file
        file: PathBuf,
    },
    /// Tear down a harness and release its config volume
    Delete {
        /// Harness identifier
        id: String,
    },
    /// List recorded harnesses
    List,
    /// Print shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

fn cmd_init(cli_config: Option<&std::path::Path>, force: bool) -> anyhow::Result<()> {
    let path = cli_config
        .map(std::path::Path::to_path_buf)
        .unwrap_or_else(config::config_path);

    config::write_starter_config(&path, force)?;

    println!("Config written to {}", path.display());
    println!();
    println!("Next: write a harness file and run `imagetest plan <file>` to inspect it.");
    Ok(())
}

fn build_controller(resolved: &ResolvedConfig, docker: &str) -> HarnessController {
    let engine = DockerEngine::new().with_binary(docker);
    HarnessController::new(Arc::new(engine))
        .with_defaults(resolved.defaults.clone())
        .with_skip_policy(Arc::new(resolved.selection.clone()))
        .with_default_timeout(resolved.default_timeout)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            cmd_init(cli.config.as_deref(), force)?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "imagetest", &mut std::io::stdout());
        }
        command => {
            let resolved = ResolvedConfig::resolve(cli.config.as_deref(), cli.state_dir.as_deref())?;
            if let Some(source) = &resolved.source {
                tracing::debug!(config = %source.display(), "loaded provider config");
            }
            let ctl = build_controller(&resolved, &cli.docker);
            let store = StateStore::new(&resolved.state_dir);

            let result = match command {
                Commands::Plan { file, json } => harness_cmds::cmd_plan(&ctl, &file, json),
                Commands::Create { file } => harness_cmds::cmd_create(&ctl, &store, &file).await,
                Commands::Read { id } => harness_cmds::cmd_read(&ctl, &store, &id).await,
                Commands::Update { file } => harness_cmds::cmd_update(&ctl, &store, &file).await,
                Commands::Delete { id } => harness_cmds::cmd_delete(&ctl, &store, &id).await,
                Commands::List => harness_cmds::cmd_list(&store),
                Commands::Init { .. } | Commands::Completions { .. } => Ok(()),
            };

            if let Err(e) = result {
                eprintln!("{e:#}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
