//! reelsync CLI
//!
//! Command-line interface for reelsync - peer-to-peer cutting record sync.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use reelsync_core::{Config, SyncMode};

mod commands;
mod logging;
mod output;

use commands::SessionContext;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "reelsync")]
#[command(about = "reelsync - Peer-to-peer cutting record sync for shop-floor devices")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Use an in-process graph instead of websocket relays
    ///
    /// The in-process graph has no other peers, so it only exercises the
    /// mode, relay list and record commands; push, pull and relay test are
    /// refused as not connected.
    #[arg(long, global = true)]
    loopback: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show sync status and health
    Status,
    /// Show or change the sync mode
    Mode {
        /// New mode: offline, connected or full
        mode: Option<SyncMode>,
    },
    /// Enable record exchange in full mode
    Enable,
    /// Disable record exchange (mode is kept)
    Disable,
    /// Manage relay servers
    Relay {
        #[command(subcommand)]
        command: Option<RelayCommands>,
    },
    /// Manage local cutting records
    Record {
        #[command(subcommand)]
        command: RecordCommands,
    },
    /// Push local records to peers
    Push {
        /// Push every record, not only those created since the last push
        #[arg(long)]
        all: bool,
    },
    /// Pull records from peers and merge them locally
    Pull {
        /// How long to collect records (defaults to pull_timeout_ms)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Follow peer and status changes until interrupted
    Watch,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum RelayCommands {
    /// List configured relays
    #[command(alias = "ls")]
    List,
    /// Replace the relay list
    Set {
        /// Relay URLs (none clears the list)
        urls: Vec<String>,
    },
    /// Add a relay
    Add {
        /// Relay URL (ws://, wss://, http:// or https://)
        url: String,
    },
    /// Remove a relay
    #[command(alias = "rm")]
    Remove {
        /// Relay URL
        url: String,
    },
    /// Remove every relay
    Clear,
    /// Check whether a relay answers
    Test {
        /// Relay URL
        url: String,
        /// Seconds to wait (defaults to probe_timeout_secs)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Run a relay server
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:8765")]
        bind: String,
    },
}

#[derive(Subcommand)]
enum RecordCommands {
    /// Record a cut
    Add {
        /// Wire identifier
        #[arg(short, long)]
        wire_id: String,
        /// Cut length
        #[arg(short = 'l', long)]
        cut_length: f64,
        /// Length unit
        #[arg(short, long, default_value = "m")]
        unit: String,
        /// Who made the cut
        #[arg(short, long)]
        cutter: String,
    },
    /// List local records
    #[command(alias = "ls")]
    List,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, log_file, known_peers, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands work even when the config file is broken
    if let Some(Commands::Config { command }) = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(config_path, &output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, config_path, &output)
            }
        };
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    logging::init(&config);

    let ctx = SessionContext::new(config, cli.loopback);

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => commands::status::show(&ctx, &output).await,
        Commands::Mode { mode } => commands::mode::mode(&ctx, mode, &output).await,
        Commands::Enable => commands::mode::set_enabled(&ctx, true, &output),
        Commands::Disable => commands::mode::set_enabled(&ctx, false, &output),
        Commands::Relay { command } => handle_relay_command(command, &ctx, &output).await,
        Commands::Record { command } => match command {
            RecordCommands::Add {
                wire_id,
                cut_length,
                unit,
                cutter,
            } => commands::record::add(&ctx, wire_id, cut_length, unit, cutter, &output).await,
            RecordCommands::List => commands::record::list(&ctx, &output).await,
        },
        Commands::Push { all } => commands::exchange::push(&ctx, all, &output).await,
        Commands::Pull { timeout_ms } => commands::exchange::pull(&ctx, timeout_ms, &output).await,
        Commands::Watch => commands::watch::watch(&ctx, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

async fn handle_relay_command(
    command: Option<RelayCommands>,
    ctx: &SessionContext,
    output: &Output,
) -> Result<()> {
    match command {
        Some(RelayCommands::List) | None => commands::relay::list(ctx, output),
        Some(RelayCommands::Set { urls }) => commands::relay::set(ctx, urls, output),
        Some(RelayCommands::Add { url }) => commands::relay::add(ctx, url, output),
        Some(RelayCommands::Remove { url }) => commands::relay::remove(ctx, url, output),
        Some(RelayCommands::Clear) => commands::relay::set(ctx, Vec::new(), output),
        Some(RelayCommands::Test { url, timeout_secs }) => {
            commands::relay::test(ctx, url, timeout_secs, output).await
        }
        Some(RelayCommands::Serve { bind }) => commands::relay::serve(bind, output).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_loopback_help_names_its_limits() {
        let command = Cli::command();
        let loopback = command
            .get_arguments()
            .find(|arg| arg.get_id() == "loopback")
            .unwrap();

        let help = loopback.get_long_help().unwrap().to_string();
        assert!(help.contains("no other peers"));
        assert!(help.contains("refused as not connected"));
    }

    #[test]
    fn test_mode_parses_persisted_names() {
        let cli = Cli::try_parse_from(["reelsync", "--loopback", "mode", "full"]).unwrap();
        assert!(cli.loopback);
        assert!(matches!(cli.command, Some(Commands::Mode { .. })));
    }
}
