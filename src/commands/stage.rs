// ABOUTME: Stage command that ingests an NDJSON export file into the staging table
// ABOUTME: Creates a new batch, stages each record, and marks the batch extracted

use crate::batch::BatchTracker;
use crate::config::Config;
use crate::schema::EntityKind;
use crate::store::Store;
use crate::validate;
use crate::window::SyncWindow;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::warn;

/// One line of an export file. The source system emits camelCase keys.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StagedLine {
    entity: String,
    source_id: String,
    #[serde(default)]
    captured_at: Option<String>,
    payload: serde_json::Value,
}

#[derive(Debug, Default)]
struct IngestOutcome {
    lines: u64,
    rejected: u64,
}

pub fn stage(
    config: &Config,
    store_override: Option<&Path>,
    file: &Path,
    window: SyncWindow,
) -> Result<()> {
    let store = super::open_store(config, store_override)?;
    let tracker = BatchTracker::new(&store);
    let batch = tracker.create(window, None)?;
    tracker.begin_extract(&batch.batch_id)?;

    match ingest_file(&store, &batch.batch_id, file) {
        Ok(outcome) => {
            let staged = store.staged_record_count(&batch.batch_id)?;
            tracker.mark_extracted(&batch.batch_id, staged)?;
            println!("Staged batch {}", batch.batch_id);
            println!("  Window:  {}", window);
            println!("  Records: {} staged from {} lines", staged, outcome.lines);
            if outcome.rejected > 0 {
                println!("  Rejected lines: {}", outcome.rejected);
            }
            Ok(())
        }
        Err(err) => {
            tracker.mark_failed(&batch.batch_id, &format!("{err:#}"))?;
            Err(err)
        }
    }
}

fn ingest_file(store: &Store, batch_id: &str, file: &Path) -> Result<IngestOutcome> {
    let handle = File::open(file)
        .with_context(|| format!("Failed to open export file {}", file.display()))?;
    let reader = BufReader::new(handle);
    let mut outcome = IngestOutcome::default();

    for (idx, line) in reader.lines().enumerate() {
        let line =
            line.with_context(|| format!("Failed to read line {} of {}", idx + 1, file.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        outcome.lines += 1;

        let parsed: StagedLine = match serde_json::from_str(trimmed) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("Line {}: not a valid staging record: {}", idx + 1, err);
                outcome.rejected += 1;
                continue;
            }
        };
        let Some(kind) = EntityKind::parse(&parsed.entity) else {
            warn!("Line {}: unknown entity kind '{}'", idx + 1, parsed.entity);
            outcome.rejected += 1;
            continue;
        };
        if kind.is_child() {
            warn!(
                "Line {}: {} records arrive embedded in a policy detail, not at the top level",
                idx + 1,
                kind
            );
            outcome.rejected += 1;
            continue;
        }
        let source_id = parsed.source_id.trim();
        if source_id.is_empty() {
            warn!("Line {}: empty sourceId", idx + 1);
            outcome.rejected += 1;
            continue;
        }

        let captured_at = match parsed.captured_at.as_deref() {
            None => Utc::now(),
            Some(raw) => match validate::parse_flexible_timestamp(raw) {
                Some(ts) => ts,
                None => {
                    warn!(
                        "Line {}: unparseable capturedAt '{}', using current time",
                        idx + 1,
                        raw
                    );
                    Utc::now()
                }
            },
        };

        store.stage_raw_record(kind, source_id, batch_id, &parsed.payload, captured_at)?;
    }

    Ok(outcome)
}
