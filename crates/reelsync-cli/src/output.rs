//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use chrono::{Local, TimeZone};
use serde::Serialize;

use reelsync_core::{HealthReport, MergeReport, StatusSnapshot, SyncRecord};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a status snapshot
    pub fn print_status(&self, status: &StatusSnapshot) {
        match self.format {
            OutputFormat::Human => {
                println!(
                    "{} {} | mode: {} | peers: {} | sync {}",
                    if status.is_connected { "●" } else { "○" },
                    if status.is_connected {
                        "connected"
                    } else {
                        "disconnected"
                    },
                    status.sync_mode,
                    status.peer_count,
                    if status.is_enabled { "enabled" } else { "disabled" }
                );
            }
            OutputFormat::Json => print_json(status),
            OutputFormat::Quiet => println!("{}", status.sync_mode),
        }
    }

    /// Print the health report
    pub fn print_health(&self, report: &HealthReport) {
        match self.format {
            OutputFormat::Human => {
                println!("reelsync Status");
                println!("===============");
                println!();
                println!("Sync:");
                println!("  Mode:      {}", report.mode);
                println!(
                    "  Enabled:   {}",
                    if report.enabled { "yes" } else { "no" }
                );
                println!(
                    "  Connected: {}",
                    if report.connected { "yes" } else { "no" }
                );
                println!("  Peers:     {}", report.peers);
                println!();
                println!("Relays:");
                if report.relays.is_empty() {
                    println!("  (none configured)");
                }
                for relay in &report.relays {
                    println!("  {}", relay);
                }
                if let Some(ref error) = report.last_connect_error {
                    println!();
                    println!("Last connect error: {}", error);
                }
                println!();
                println!("{}", report.advice);
            }
            OutputFormat::Json => print_json(report),
            OutputFormat::Quiet => println!("{}", report.mode),
        }
    }

    /// Print a list of relay URLs
    pub fn print_relays(&self, relays: &[String]) {
        match self.format {
            OutputFormat::Human => {
                if relays.is_empty() {
                    println!("No relays configured.");
                    return;
                }
                for (i, relay) in relays.iter().enumerate() {
                    println!("{:>2}. {}", i + 1, relay);
                }
                println!("\n{} relay(s)", relays.len());
            }
            OutputFormat::Json => print_json(&relays),
            OutputFormat::Quiet => {
                for relay in relays {
                    println!("{}", relay);
                }
            }
        }
    }

    /// Print a list of cutting records
    pub fn print_records(&self, records: &[SyncRecord]) {
        match self.format {
            OutputFormat::Human => {
                if records.is_empty() {
                    println!("No records found.");
                    return;
                }
                for record in records {
                    println!(
                        "{} | {} | {} | {} | {}",
                        truncate(&record.id, 8),
                        format_time(record.timestamp),
                        truncate(&field(record, "wireId"), 16),
                        format_length(record),
                        truncate(&field(record, "cutterName"), 20)
                    );
                }
                println!("\n{} record(s)", records.len());
            }
            OutputFormat::Json => print_json(&records),
            OutputFormat::Quiet => {
                for record in records {
                    println!("{}", record.id);
                }
            }
        }
    }

    /// Print the outcome of merging pulled records
    pub fn print_merge(&self, pulled: usize, report: &MergeReport) {
        match self.format {
            OutputFormat::Human => {
                println!(
                    "✓ Pulled {} record(s): {} merged, {} already up to date",
                    pulled, report.merged, report.skipped
                );
            }
            OutputFormat::Json => print_json(&serde_json::json!({
                "pulled": pulled,
                "merged": report.merged,
                "skipped": report.skipped
            })),
            OutputFormat::Quiet => println!("{}", report.merged),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

/// A string field of a record, or "-"
fn field(record: &SyncRecord, key: &str) -> String {
    match record.fields.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => "-".to_string(),
        Some(other) => other.to_string(),
    }
}

fn format_length(record: &SyncRecord) -> String {
    match record.fields.get("cutLength").and_then(|v| v.as_f64()) {
        Some(length) => {
            let unit = record
                .fields
                .get("cutLengthUnit")
                .and_then(|v| v.as_str())
                .unwrap_or("m");
            format!("{} {}", length, unit)
        }
        None => "-".to_string(),
    }
}

/// Millisecond timestamp as local time
fn format_time(timestamp_ms: i64) -> String {
    match Local.timestamp_millis_opt(timestamp_ms).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M").to_string(),
        None => timestamp_ms.to_string(),
    }
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ÄÖÜäöüßÄÖÜ", 5), "ÄÖ...");
    }

    #[test]
    fn test_record_fields() {
        let record = SyncRecord::new("a", 0)
            .with_field("wireId", "W-12")
            .with_field("cutLength", 12.5)
            .with_field("cutLengthUnit", "ft");

        assert_eq!(field(&record, "wireId"), "W-12");
        assert_eq!(field(&record, "cutterName"), "-");
        assert_eq!(format_length(&record), "12.5 ft");
        assert_eq!(format_length(&SyncRecord::new("b", 0)), "-");
    }
}
