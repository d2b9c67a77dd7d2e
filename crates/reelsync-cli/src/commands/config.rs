//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use reelsync_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "log_file": config.log_file,
                    "syncable_collection": config.syncable_collection,
                    "node_prefix": config.node_prefix,
                    "known_peers": config.known_peers,
                    "pull_timeout_ms": config.pull_timeout_ms,
                    "probe_timeout_secs": config.probe_timeout_secs,
                    "sync_enabled_default": config.sync_enabled_default
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:             {}", config.data_dir.display());
            println!(
                "  log_file:             {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!("  syncable_collection:  {}", config.syncable_collection);
            println!("  node_prefix:          {}", config.node_prefix);
            println!(
                "  known_peers:          {}",
                if config.known_peers.is_empty() {
                    "(none)".to_string()
                } else {
                    config.known_peers.join(", ")
                }
            );
            println!("  pull_timeout_ms:      {}", config.pull_timeout_ms);
            println!("  probe_timeout_secs:   {}", config.probe_timeout_secs);
            println!("  sync_enabled_default: {}", config.sync_enabled_default);
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let unset = value.is_empty() || value == "none";

    match key {
        "data_dir" => {
            config.data_dir = value.into();
        }
        "log_file" => {
            config.log_file = if unset { None } else { Some(value.into()) };
        }
        "syncable_collection" => {
            if unset {
                bail!("syncable_collection cannot be empty");
            }
            config.syncable_collection = value.to_string();
        }
        "node_prefix" => {
            config.node_prefix = value.to_string();
        }
        "known_peers" => {
            config.known_peers = if unset {
                Vec::new()
            } else {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            };
        }
        "pull_timeout_ms" => {
            config.pull_timeout_ms = value
                .parse()
                .context("Invalid value for pull_timeout_ms. Use a number of milliseconds.")?;
        }
        "probe_timeout_secs" => {
            config.probe_timeout_secs = value
                .parse()
                .context("Invalid value for probe_timeout_secs. Use a number of seconds.")?;
        }
        "sync_enabled_default" => {
            config.sync_enabled_default = value
                .parse()
                .context("Invalid value for sync_enabled_default. Use 'true' or 'false'.")?;
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: data_dir, log_file, syncable_collection, node_prefix, \
                 known_peers, pull_timeout_ms, probe_timeout_secs, sync_enabled_default",
                key
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_known_peers() {
        let mut config = Config::default();
        apply(&mut config, "known_peers", "ws://a:1, ws://b:2").unwrap();
        assert_eq!(config.known_peers, vec!["ws://a:1", "ws://b:2"]);

        apply(&mut config, "known_peers", "none").unwrap();
        assert!(config.known_peers.is_empty());
    }

    #[test]
    fn test_apply_rejects_bad_values() {
        let mut config = Config::default();
        assert!(apply(&mut config, "pull_timeout_ms", "soon").is_err());
        assert!(apply(&mut config, "syncable_collection", "").is_err());
        assert!(apply(&mut config, "sync_url", "ws://x").is_err());
    }

    #[test]
    fn test_set_writes_to_given_path() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            format!("data_dir = {:?}\n", temp_dir.path().join("data")),
        )
        .unwrap();
        let output = Output::new(OutputFormat::Quiet);

        set("pull_timeout_ms".into(), "250".into(), Some(&path), &output).unwrap();

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("pull_timeout_ms = 250"));
    }
}
