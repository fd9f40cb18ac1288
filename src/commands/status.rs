// ABOUTME: Status command that shows one batch in detail or lists recent batches

use crate::batch::{BatchRecord, BatchTracker};
use crate::config::Config;
use anyhow::Result;
use std::path::Path;

pub fn status(
    config: &Config,
    store_override: Option<&Path>,
    batch: Option<String>,
    limit: u32,
) -> Result<()> {
    let store = super::open_store(config, store_override)?;
    let tracker = BatchTracker::new(&store);

    match batch {
        Some(raw) => {
            let batch_id = super::checked_batch_id(&raw)?;
            print_batch(&tracker.get(&batch_id)?);
        }
        None => {
            let batches = tracker.list_recent(limit)?;
            if batches.is_empty() {
                println!("No batches recorded yet");
                return Ok(());
            }
            println!(
                "{:<38} {:<12} {:>9} {:>11} {:>6} {:>7} {:>6}",
                "BATCH", "PHASE", "EXTRACTED", "TRANSFORMED", "LOADED", "SKIPPED", "ERRORS"
            );
            for batch in batches {
                println!(
                    "{:<38} {:<12} {:>9} {:>11} {:>6} {:>7} {:>6}",
                    batch.batch_id,
                    batch.phase.as_str(),
                    batch.extracted_count,
                    batch.transformed_count,
                    batch.loaded_count,
                    batch.skipped_count,
                    batch.error_count
                );
            }
        }
    }
    Ok(())
}

fn print_batch(batch: &BatchRecord) {
    println!("Batch {}", batch.batch_id);
    println!("  Phase:       {}", batch.phase);
    println!("  Window:      {}", batch.window);
    if let Some(retry_of) = &batch.retry_of {
        println!("  Retry of:    {}", retry_of);
    }
    println!("  Extracted:   {}", batch.extracted_count);
    println!("  Transformed: {}", batch.transformed_count);
    println!("  Loaded:      {}", batch.loaded_count);
    println!("  Skipped:     {}", batch.skipped_count);
    println!("  Errors:      {}", batch.error_count);
    if let Some(last_error) = &batch.last_error {
        println!("  Last error:  {}", last_error);
    }
    println!("  Created:     {}", batch.created_at.to_rfc3339());
    println!("  Updated:     {}", batch.updated_at.to_rfc3339());
}
