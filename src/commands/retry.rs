// ABOUTME: Retry command that spawns a linked batch from a failed one
// ABOUTME: Copies unprocessed staging records forward so only leftovers re-run

use crate::batch::BatchTracker;
use crate::config::Config;
use crate::window::SyncWindow;
use anyhow::Result;
use std::path::Path;

pub fn retry(
    config: &Config,
    store_override: Option<&Path>,
    batch: String,
    window: Option<SyncWindow>,
) -> Result<()> {
    let store = super::open_store(config, store_override)?;
    let batch_id = super::checked_batch_id(&batch)?;
    let tracker = BatchTracker::new(&store);

    let retry = tracker.retry(&batch_id, window)?;
    tracker.begin_extract(&retry.batch_id)?;
    let copied = store.copy_unprocessed_raw(&batch_id, &retry.batch_id)?;
    tracker.mark_extracted(&retry.batch_id, copied)?;

    println!("Retry batch {} created from {}", retry.batch_id, batch_id);
    println!("  Window:  {}", retry.window);
    println!("  Records: {} re-staged", copied);
    if copied == 0 {
        println!("  Note: the failed batch left no unprocessed records; run will be a no-op");
    }
    Ok(())
}
