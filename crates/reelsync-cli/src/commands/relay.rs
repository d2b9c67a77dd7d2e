//! Relay command handlers

use std::time::Duration;

use anyhow::{bail, Context, Result};

use reelsync_core::sync::{probe_relay, validate_relay_url};
use reelsync_core::RelayServer;

use crate::commands::SessionContext;
use crate::output::{print_json, Output, OutputFormat};

/// List configured relays
pub fn list(ctx: &SessionContext, output: &Output) -> Result<()> {
    let session = ctx.open_session();
    output.print_relays(session.relays().servers());
    Ok(())
}

/// Replace the relay list
pub fn set(ctx: &SessionContext, urls: Vec<String>, output: &Output) -> Result<()> {
    let mut session = ctx.open_session();
    let count = urls.len();
    session.set_relays(urls)?;

    if count == 0 {
        output.success("Relay list cleared");
    } else {
        output.success(&format!("Saved {} relay(s)", count));
    }
    Ok(())
}

/// Add one relay
pub fn add(ctx: &SessionContext, url: String, output: &Output) -> Result<()> {
    let mut session = ctx.open_session();
    let mut relays = session.relays().clone();

    if !relays.add(&url)? {
        output.message(&format!("Relay already configured: {}", url.trim()));
        return Ok(());
    }
    session.set_relays(relays.servers().to_vec())?;
    output.success(&format!("Added relay {}", url.trim()));
    Ok(())
}

/// Remove one relay
pub fn remove(ctx: &SessionContext, url: String, output: &Output) -> Result<()> {
    let mut session = ctx.open_session();
    let mut relays = session.relays().clone();

    if !relays.remove(&url) {
        bail!("Relay not configured: {}", url);
    }
    session.set_relays(relays.servers().to_vec())?;
    output.success(&format!("Removed relay {}", url));
    Ok(())
}

/// Probe a relay with a throwaway connection
pub async fn test(
    ctx: &SessionContext,
    url: String,
    timeout_secs: Option<u64>,
    output: &Output,
) -> Result<()> {
    let url = validate_relay_url(&url)?;
    let timeout = timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| ctx.config.probe_timeout());

    output.message(&format!("Testing relay {}...", url));
    let connector = ctx.connector();
    let result = probe_relay(connector.as_ref(), &url, timeout)
        .await
        .context("Relay test failed")?;

    if !result.connected {
        bail!("No answer from {} within {:?}", url, timeout);
    }

    match output.format {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Quiet => println!("{}", result.peers),
        OutputFormat::Human => {
            println!("✓ Connected to {}", url);
            if result.peers > 1 {
                // The relay itself counts as one peer
                println!("  {} other peer(s) on this relay", result.peers - 1);
            } else {
                println!("  No other peers right now (normal for an idle relay)");
            }
        }
    }
    Ok(())
}

/// Run a relay server until interrupted
pub async fn serve(bind: String, output: &Output) -> Result<()> {
    let server = RelayServer::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind relay to {}", bind))?;
    let addr = server.local_addr()?;
    output.message(&format!("Relay listening on ws://{}", addr));

    tokio::select! {
        result = server.run() => result.context("Relay stopped")?,
        _ = tokio::signal::ctrl_c() => output.message("Shutting down relay"),
    }
    Ok(())
}
