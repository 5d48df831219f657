//! bootctl - boot synchronization for groups of ALSA cards
//!
//! Subcommands:
//! - `bootctl check <card>` - Report whether a card is in a live boot epoch
//! - `bootctl update <card> --group <name>` - Register a card's boot
//! - `bootctl remove <card>` - Drop a card (and stale peers) from its groups
//! - `bootctl wait <card>` - Block until the card's state is restored
//! - `bootctl groups` - List persisted groups
//! - `bootctl config` - Show the effective configuration

use std::path::PathBuf;

use anyhow::{Context, Result};
use bootconf::BootConfig;
use clap::{Parser, Subcommand};
use tracing::error;

mod commands;
mod telemetry;

#[derive(Parser)]
#[command(name = "bootctl")]
#[command(about = "Boot synchronization for groups of ALSA cards")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./bootsync.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Group file, overriding the configured path
    #[arg(long, global = true)]
    group_file: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report whether a card belongs to a live boot epoch
    Check {
        /// Card index
        card: i32,

        /// Expected synchronization window in seconds
        #[arg(long)]
        sync_time: Option<i64>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Register a card's boot with its group and write its boot element
    Update {
        /// Card index
        card: i32,

        /// Boot group name
        #[arg(short, long)]
        group: String,

        /// Synchronization window in seconds (default from config)
        #[arg(long)]
        sync_time: Option<i64>,

        /// Saved state has been re-applied to this card
        #[arg(long)]
        restored: bool,

        /// The card's previous boot epoch is no longer valid
        #[arg(long)]
        invalid: bool,
    },

    /// Remove a card from every group, pruning peers that went away
    Remove {
        /// Card index
        card: i32,
    },

    /// Wait until a card reports that its state was restored
    Wait {
        /// Card index
        card: i32,

        /// Timeout in seconds (0 = use the group's window)
        #[arg(short, long, default_value = "0")]
        timeout: i64,
    },

    /// List persisted boot groups
    Groups {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    Config {
        /// Also list the files and environment variables that were applied
        #[arg(long)]
        sources: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = BootConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(path) = cli.group_file {
        config.paths.group_file = path;
    }

    telemetry::init(&config.logging.log_level, cli.verbose);

    let result = match cli.command {
        Commands::Check {
            card,
            sync_time,
            json,
        } => commands::check(&config, card, sync_time, json),
        Commands::Update {
            card,
            group,
            sync_time,
            restored,
            invalid,
        } => commands::update(&config, card, &group, sync_time, restored, !invalid),
        Commands::Remove { card } => commands::remove(&config, card),
        Commands::Wait { card, timeout } => commands::wait(&config, card, timeout),
        Commands::Groups { json } => commands::groups(&config, json),
        Commands::Config { sources: show } => {
            commands::show_config(&config, show.then_some(&sources));
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
