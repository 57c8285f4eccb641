//! Graph economic layer CLI
//!
//! Inspect configuration and replay operation scripts against an
//! in-process protocol.

mod replay;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use graph_protocol::ProtocolConfig;
use graph_storage::FileSnapshotStore;
use replay::Replay;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "graph-econ")]
#[command(version)]
#[command(about = "Graph protocol economic layer: staking, curation, rewards and rebates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    Config {
        /// Configuration file path
        #[arg(short, long, env = "GRAPH_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Write a default configuration file
    Init {
        /// Output file
        #[arg(short, long, default_value = "graph.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Apply a JSON operation script and print the emitted events
    Replay {
        /// Operation script
        #[arg(short, long)]
        script: PathBuf,

        /// Configuration file path
        #[arg(short, long, env = "GRAPH_CONFIG")]
        config: Option<PathBuf>,

        /// Save the final state as a snapshot in this directory
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,

        /// Snapshot name
        #[arg(long, default_value = "replay")]
        snapshot_name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { config } => {
            let config = load_config(config.as_deref(), cli.verbose)?;
            print!("{}", config.to_toml()?);
        }

        Commands::Init { output, force } => {
            init_config(&output, force)?;
            println!("Wrote default configuration to {}", output.display());
        }

        Commands::Replay {
            script,
            config,
            snapshot_dir,
            snapshot_name,
        } => {
            let config = load_config(config.as_deref(), cli.verbose)?;
            let operations = replay::load_script(&script)?;
            tracing::info!(operations = operations.len(), script = %script.display(), "replaying");

            let mut replay = Replay::new(&config)?;
            let outcome = replay.run(&operations).await;

            for event in replay.events() {
                println!("{}", serde_json::to_string(&event)?);
            }
            outcome?;

            if let Some(dir) = snapshot_dir {
                let store = FileSnapshotStore::open(&dir)?;
                replay.protocol().save_snapshot(&store, &snapshot_name)?;
                tracing::info!(dir = %dir.display(), name = %snapshot_name, "snapshot saved");
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>, verbose: bool) -> Result<ProtocolConfig> {
    let mut config = ProtocolConfig::load(path).context("loading configuration")?;
    if verbose {
        config.logging.level = "debug".to_string();
    }
    graph_protocol::init_logging(&config.logging)?;
    Ok(config)
}

fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!("{} already exists, pass --force to overwrite", output.display());
    }
    let content = ProtocolConfig::default().to_toml()?;
    std::fs::write(output, content).with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_replay() {
        let cli = Cli::try_parse_from(["graph-econ", "-v", "replay", "--script", "ops.json"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Replay {
                script, snapshot_name, ..
            } => {
                assert_eq!(script, PathBuf::from("ops.json"));
                assert_eq!(snapshot_name, "replay");
            }
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.toml");

        init_config(&path, false).unwrap();
        let loaded = ProtocolConfig::from_toml(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.epochs.epoch_length, ProtocolConfig::default().epochs.epoch_length);

        assert!(init_config(&path, false).is_err());
        init_config(&path, true).unwrap();
    }
}
