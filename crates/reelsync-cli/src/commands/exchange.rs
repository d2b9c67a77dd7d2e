//! Push and pull command handlers

use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;

use reelsync_core::{SyncError, SyncRecord};

use crate::commands::record::load_records;
use crate::commands::{refusal_hint, storage_failure, SessionContext};
use crate::output::{Output, OutputFormat};

/// Push local records to peers
pub async fn push(ctx: &SessionContext, all: bool, output: &Output) -> Result<()> {
    let collection = ctx.config.syncable_collection.clone();
    let mut session = ctx.open_session();
    session.start();
    ctx.wait_for_peers(&mut session).await;

    let result = if all {
        let records = load_records(ctx).await?;
        session.push(&collection, &records)
    } else {
        session
            .push_new_records(&ctx.collections(), Utc::now().timestamp_millis())
            .await
    };
    let peers = session.peer_count();
    session.shutdown();

    let pushed = result.map_err(explain)?;
    if pushed == 0 {
        output.message("No new records to push - everything is already shared.");
    } else if output.is_quiet() {
        println!("{}", pushed);
    } else {
        output.success(&format!(
            "Pushed {} record(s) to {} peer(s)",
            pushed, peers
        ));
    }
    Ok(())
}

/// Pull records from peers and merge them into the local collection
pub async fn pull(ctx: &SessionContext, timeout_ms: Option<u64>, output: &Output) -> Result<()> {
    let collection = ctx.config.syncable_collection.clone();
    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| ctx.config.pull_timeout());

    let mut session = ctx.open_session();
    session.start();
    ctx.wait_for_peers(&mut session).await;

    let show_progress = output.format == OutputFormat::Human;
    let pulled = session
        .pull(
            &collection,
            |partial: &[SyncRecord]| {
                if show_progress {
                    println!("Received {} record(s), still listening...", partial.len());
                }
            },
            timeout,
        )
        .await;
    let pulled = match pulled {
        Ok(records) => records,
        Err(e) => {
            session.shutdown();
            return Err(explain(e));
        }
    };

    let report = session
        .merge_remote(&ctx.collections(), &collection, &pulled)
        .await;
    session.shutdown();
    let report = report.map_err(|e| match e {
        SyncError::Storage(e) => storage_failure(e, "Failed to merge pulled records"),
        other => anyhow::Error::new(other).context("Failed to merge pulled records"),
    })?;

    output.print_merge(pulled.len(), &report);
    Ok(())
}

/// Turn a refusal or storage failure into an actionable error
fn explain(error: SyncError) -> anyhow::Error {
    if let Some(gate) = error.gate() {
        return anyhow!("{}\n  {}", error, refusal_hint(gate));
    }
    match error {
        SyncError::Storage(e) => storage_failure(e, "Local records unavailable"),
        other => anyhow::Error::new(other),
    }
}
