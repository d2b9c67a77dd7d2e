//! Status command handler

use anyhow::Result;

use crate::commands::SessionContext;
use crate::output::Output;

/// Show sync status and health
///
/// Restores the persisted mode's connection first, so the peer count is
/// what this device can actually reach right now.
pub async fn show(ctx: &SessionContext, output: &Output) -> Result<()> {
    let mut session = ctx.open_session();
    session.start();
    ctx.wait_for_peers(&mut session).await;

    output.print_health(&session.health());

    session.shutdown();
    Ok(())
}
