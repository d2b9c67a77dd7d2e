//! Record command handlers

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use reelsync_core::{KeyValueStore, SyncRecord};

use crate::commands::{storage_failure, SessionContext};
use crate::output::Output;

/// Record a cut in the local syncable collection
pub async fn add(
    ctx: &SessionContext,
    wire_id: String,
    cut_length: f64,
    unit: String,
    cutter: String,
    output: &Output,
) -> Result<()> {
    let now = Utc::now().timestamp_millis();
    let id = Uuid::new_v4().to_string();
    let record = json!({
        "id": id,
        "timestamp": now,
        "createdAt": now,
        "updatedAt": now,
        "wireId": wire_id,
        "cutLength": cut_length,
        "cutLengthUnit": unit,
        "cutterName": cutter,
    });

    ctx.collections()
        .add(&ctx.config.syncable_collection, record)
        .await
        .map_err(|e| storage_failure(e, "Failed to save record"))?;

    if output.is_quiet() {
        println!("{}", id);
    } else {
        output.success(&format!(
            "Recorded {} {} of {} ({})",
            cut_length,
            unit,
            wire_id,
            &id[..8]
        ));
    }
    Ok(())
}

/// List local records, newest first
pub async fn list(ctx: &SessionContext, output: &Output) -> Result<()> {
    let records = load_records(ctx).await?;
    output.print_records(&records);
    Ok(())
}

/// Every well-formed record of the syncable collection, newest first
pub async fn load_records(ctx: &SessionContext) -> Result<Vec<SyncRecord>> {
    let values = ctx
        .collections()
        .get_all(&ctx.config.syncable_collection)
        .await
        .map_err(|e| storage_failure(e, "Failed to read records"))?;

    let mut records: Vec<SyncRecord> = values
        .iter()
        .filter_map(|value| SyncRecord::from_value(value, None))
        .collect();
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use reelsync_core::Config;

    #[tokio::test]
    async fn test_add_then_load() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };
        let ctx = SessionContext::new(config, true);
        let output = Output::new(OutputFormat::Quiet);

        add(&ctx, "W-1".into(), 12.5, "m".into(), "Dana".into(), &output)
            .await
            .unwrap();
        add(&ctx, "W-2".into(), 3.0, "ft".into(), "Lee".into(), &output)
            .await
            .unwrap();

        let records = load_records(&ctx).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].timestamp >= records[1].timestamp);
        assert!(records.iter().any(|r| r.fields["wireId"] == "W-1"));
        assert!(temp_dir
            .path()
            .join("collections")
            .join("cuttingRecords.json")
            .exists());
    }
}
