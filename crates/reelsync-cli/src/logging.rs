//! Logging setup
//!
//! Only initializes if the REELSYNC_LOG environment variable is set, using
//! its value as the level for both reelsync crates. Logs go to
//! `config.log_file` when set, otherwise to stderr.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::info;
use tracing_subscriber::EnvFilter;

use reelsync_core::Config;

/// Environment variable holding the log level
const LOG_ENV: &str = "REELSYNC_LOG";

pub fn init(config: &Config) {
    let Ok(log_level) = std::env::var(LOG_ENV) else {
        return;
    };

    let env_filter = filter_for(&log_level);

    match config.log_file {
        Some(ref log_path) => {
            let log_file = match OpenOptions::new().create(true).append(true).open(log_path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
                    return;
                }
            };

            // Ignore error if already initialized
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(log_file))
                .try_init();

            info!("Logging to {:?}", log_path);
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}

fn filter_for(log_level: &str) -> EnvFilter {
    EnvFilter::new(format!(
        "reelsync_core={},reelsync_cli={}",
        log_level, log_level
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_covers_both_crates() {
        let filter = filter_for("debug").to_string();
        assert!(filter.contains("reelsync_core=debug"));
        assert!(filter.contains("reelsync_cli=debug"));
    }
}
