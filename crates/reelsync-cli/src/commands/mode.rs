//! Mode and enable/disable command handlers

use anyhow::Result;

use reelsync_core::SyncMode;

use crate::commands::SessionContext;
use crate::output::Output;

/// Show the current mode, or switch to a new one
pub async fn mode(ctx: &SessionContext, mode: Option<SyncMode>, output: &Output) -> Result<()> {
    let mut session = ctx.open_session();

    let Some(mode) = mode else {
        output.print_status(&session.status());
        return Ok(());
    };

    session.transition(mode);
    if let Some(error) = session.last_connect_error() {
        if !output.is_quiet() {
            eprintln!("⚠ Could not connect: {}", error);
        }
    } else if mode.wants_connection() {
        ctx.wait_for_peers(&mut session).await;
    }

    output.print_status(&session.status());
    session.shutdown();
    Ok(())
}

/// Turn record exchange on or off
pub fn set_enabled(ctx: &SessionContext, enabled: bool, output: &Output) -> Result<()> {
    let mut session = ctx.open_session();
    if enabled {
        session.enable();
        output.success("Sync enabled");
    } else {
        session.disable();
        output.success("Sync disabled");
    }

    if session.mode() != SyncMode::FullSync && !output.is_quiet() && !output.is_json() {
        println!(
            "  Note: records are only exchanged in full mode (current: {})",
            session.mode()
        );
    }
    Ok(())
}
