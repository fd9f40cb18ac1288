// ABOUTME: Errors command that prints the validation findings recorded for a batch

use crate::batch::BatchTracker;
use crate::config::Config;
use anyhow::Result;
use std::path::Path;

pub fn errors(config: &Config, store_override: Option<&Path>, batch: String) -> Result<()> {
    let store = super::open_store(config, store_override)?;
    let batch_id = super::checked_batch_id(&batch)?;
    // Fail with a batch-not-found error before printing anything.
    BatchTracker::new(&store).get(&batch_id)?;

    let rows = store.validation_errors_for_batch(&batch_id)?;
    if rows.is_empty() {
        println!("No validation errors recorded for batch {}", batch_id);
        return Ok(());
    }

    println!("{} validation errors for batch {}", rows.len(), batch_id);
    println!(
        "{:<16} {:<16} {:<20} {:<22} {:<6} VALUE",
        "KIND", "SOURCE", "FIELD", "FAILURE", "BLOCKS"
    );
    for row in rows {
        println!(
            "{:<16} {:<16} {:<20} {:<22} {:<6} {}",
            row.entity_kind,
            row.source_id,
            row.field,
            row.failure_kind.as_str(),
            if row.blocking { "yes" } else { "no" },
            row.raw_value.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
