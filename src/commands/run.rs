// ABOUTME: Run command that transforms and loads an extracted batch
// ABOUTME: Resolves the target batch, applies entity-kind filters, and prints a summary

use crate::batch::{BatchPhase, BatchTracker};
use crate::config::Config;
use crate::schema::EntityKind;
use crate::sync::LoadStage;
use crate::transform::TransformStage;
use anyhow::{anyhow, bail, Result};
use std::path::Path;

#[derive(Debug, Default)]
pub struct RunOptions {
    /// Batch to run. Defaults to the most recent extracted batch.
    pub batch: Option<String>,
    pub include_kinds: Option<Vec<String>>,
    pub exclude_kinds: Option<Vec<String>>,
}

pub fn run(config: &Config, store_override: Option<&Path>, options: RunOptions) -> Result<()> {
    let store = super::open_store(config, store_override)?;
    let tracker = BatchTracker::new(&store);

    let batch_id = match &options.batch {
        Some(raw) => super::checked_batch_id(raw)?,
        None => tracker
            .latest_in_phase(BatchPhase::Extracted)?
            .map(|batch| batch.batch_id)
            .ok_or_else(|| anyhow!("No extracted batch is ready to run; stage one first"))?,
    };
    let filter = kind_filter(
        options.include_kinds.as_deref(),
        options.exclude_kinds.as_deref(),
    )?;

    let transform = TransformStage::new(&store).run(&batch_id)?;
    let load = LoadStage::new(&store).run(&batch_id, filter.as_deref())?;
    let batch = tracker.get(&batch_id)?;

    println!();
    println!("========================================");
    println!("Batch {} {}", batch_id, batch.phase);
    println!("========================================");
    println!("  Window:      {}", batch.window);
    println!("  Extracted:   {}", batch.extracted_count);
    println!(
        "  Transformed: {} ({} blocked)",
        transform.transformed,
        transform.blocked + transform.child_blocked
    );
    println!("  Loaded:      {}", load.loaded);
    println!("  Skipped:     {}", load.skipped);
    println!("  Errors:      {}", batch.error_count);
    if let Some(last_error) = &batch.last_error {
        println!("  Last error:  {}", last_error);
    }

    if load.cancelled {
        bail!("Batch {} was cancelled during load", batch_id);
    }
    if !load.errors.is_empty() {
        bail!(
            "Batch {} failed: {} entities did not apply",
            batch_id,
            load.errors.len()
        );
    }
    Ok(())
}

/// Turns include/exclude lists into the kind filter the load stage takes.
/// No lists means no filter.
fn kind_filter(
    include: Option<&[String]>,
    exclude: Option<&[String]>,
) -> Result<Option<Vec<EntityKind>>> {
    if include.is_none() && exclude.is_none() {
        return Ok(None);
    }
    let parse_list = |values: &[String]| -> Result<Vec<EntityKind>> {
        values
            .iter()
            .map(|raw| {
                EntityKind::parse(raw).ok_or_else(|| anyhow!("Unknown entity kind '{}'", raw))
            })
            .collect()
    };

    let mut kinds: Vec<EntityKind> = match include {
        Some(values) => parse_list(values)?,
        None => EntityKind::ALL.to_vec(),
    };
    if let Some(values) = exclude {
        let excluded = parse_list(values)?;
        kinds.retain(|kind| !excluded.contains(kind));
    }
    Ok(Some(kinds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_filter_none_when_no_lists() {
        assert!(kind_filter(None, None).unwrap().is_none());
    }

    #[test]
    fn test_kind_filter_include_only() {
        let include = vec!["contact".to_string(), "policy".to_string()];
        let kinds = kind_filter(Some(include.as_slice()), None).unwrap().unwrap();
        assert_eq!(kinds, vec![EntityKind::Contact, EntityKind::Policy]);
    }

    #[test]
    fn test_kind_filter_exclude_removes_from_all() {
        let exclude = vec!["document".to_string()];
        let kinds = kind_filter(None, Some(exclude.as_slice())).unwrap().unwrap();
        assert_eq!(kinds.len(), EntityKind::ALL.len() - 1);
        assert!(!kinds.contains(&EntityKind::Document));
    }

    #[test]
    fn test_kind_filter_rejects_unknown_kind() {
        let include = vec!["widget".to_string()];
        let err = kind_filter(Some(include.as_slice()), None).unwrap_err();
        assert!(err.to_string().contains("Unknown entity kind"));
    }
}
