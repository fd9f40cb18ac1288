// ABOUTME: Cancel command that marks a non-terminal batch failed
// ABOUTME: A load running against the batch notices the phase change and stops

use crate::batch::BatchTracker;
use crate::config::Config;
use anyhow::{bail, Result};
use std::path::Path;

pub fn cancel(config: &Config, store_override: Option<&Path>, batch: String) -> Result<()> {
    let store = super::open_store(config, store_override)?;
    let batch_id = super::checked_batch_id(&batch)?;
    let tracker = BatchTracker::new(&store);

    let current = tracker.get(&batch_id)?;
    if current.phase.is_terminal() {
        bail!("Batch {} is already {}", batch_id, current.phase);
    }
    tracker.mark_failed(&batch_id, "cancelled by operator")?;
    println!("Batch {} cancelled (was {})", batch_id, current.phase);
    Ok(())
}
