//! Apply stage: patch every record's shopper-facing tag list.
//!
//! Re-scans the live collection rather than trusting extract-time data, and
//! writes the derived list to a separate `ui_tags` field so the original
//! `tags` stay intact. Records whose `ui_tags` already match are skipped,
//! which makes re-runs idempotent.

use serde_json::{Map, Value};
use tracing::info;

use tagrail_shared::{Result, SplitTag, TagMapping, split_tag};
use tagrail_store::{Record, StoreClient};

use crate::report::ProgressReporter;
use crate::retry::Retry;

/// Payload field the derived tags are written to.
pub const UI_TAGS_FIELD: &str = "ui_tags";

/// Counters from one apply pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyStats {
    pub records_scanned: u64,
    /// Records whose `ui_tags` were written (or would be, on a dry run).
    pub records_patched: u64,
    /// Records already carrying the correct `ui_tags`.
    pub records_unchanged: u64,
    /// Records with no tags at all.
    pub records_without_tags: u64,
}

/// Derive the shopper-facing tag list for one record.
///
/// Structured tags are rewritten through the mapping; unstructured tags pass
/// through verbatim. Broadening collapses synonyms onto one tag, so the
/// result is deduplicated keeping first-seen order.
pub fn derive_ui_tags(tags: &[String], mapping: &TagMapping) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let derived = match split_tag(tag) {
            SplitTag::Structured { prefix, value } => {
                format!("{prefix}_{}", mapping.broad_value(prefix, value))
            }
            SplitTag::Unstructured(tag) => tag.to_string(),
        };
        if !out.contains(&derived) {
            out.push(derived);
        }
    }
    out
}

fn existing_ui_tags(record: &Record) -> Option<Vec<String>> {
    let arr = record.payload.get(UI_TAGS_FIELD)?.as_array()?;
    arr.iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Apply a finalized mapping to every record in the collection.
///
/// On a dry run nothing is written; the stats report what a real run would
/// patch. Store patches go through the retry policy — a single record
/// failing all attempts aborts the pass so the ledger never marks a
/// partially patched collection complete.
pub async fn apply_mapping(
    store: &StoreClient,
    collection: &str,
    mapping: &TagMapping,
    page_size: u32,
    retry: &Retry,
    dry_run: bool,
    reporter: &dyn ProgressReporter,
) -> Result<ApplyStats> {
    reporter.phase(&format!(
        "{} '{collection}'",
        if dry_run { "Previewing" } else { "Updating" }
    ));

    let mut stats = ApplyStats::default();
    let mut cursor = None;

    loop {
        let (records, next) = store.scroll(collection, page_size, cursor.as_ref()).await?;
        if records.is_empty() {
            break;
        }

        for record in &records {
            stats.records_scanned += 1;

            let tags = record.tags();
            if tags.is_empty() {
                stats.records_without_tags += 1;
                continue;
            }

            let derived = derive_ui_tags(&tags, mapping);
            if existing_ui_tags(record).is_some_and(|existing| existing == derived) {
                stats.records_unchanged += 1;
                continue;
            }

            if !dry_run {
                let mut payload = Map::new();
                payload.insert(UI_TAGS_FIELD.into(), Value::from(derived));
                retry
                    .run("store patch", || {
                        store.set_payload(collection, &record.id, &payload)
                    })
                    .await?;
            }
            stats.records_patched += 1;
        }

        reporter.item_progress(
            stats.records_scanned as usize,
            0,
            &format!(
                "{} scanned, {} {}",
                stats.records_scanned,
                stats.records_patched,
                if dry_run { "to patch" } else { "patched" }
            ),
        );

        match next {
            Some(c) => cursor = Some(c),
            None => break,
        }
    }

    info!(
        collection,
        scanned = stats.records_scanned,
        patched = stats.records_patched,
        unchanged = stats.records_unchanged,
        dry_run,
        "apply pass finished"
    );

    Ok(stats)
}
