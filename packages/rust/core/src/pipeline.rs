//! Stage orchestration: extract → normalize → apply, per collection.
//!
//! Stages communicate only through their persisted documents, so each one
//! can be run (and re-run) on its own. The full run consults the durable
//! progress ledger and skips collections that already completed an apply
//! pass, making a multi-collection job resumable after a crash.

use std::path::PathBuf;

use tracing::info;

use tagrail_llm::LlmClient;
use tagrail_shared::{Inventory, Result, TagrailError};
use tagrail_store::StoreClient;

use crate::apply::{ApplyStats, apply_mapping};
use crate::files;
use crate::inventory::build_inventory;
use crate::normalize::{NormalizeOutcome, normalize_inventory};
use crate::progress::ProgressStore;
use crate::report::ProgressReporter;
use crate::retry::Retry;

/// Everything the stages need, resolved once at startup.
pub struct PipelineContext {
    pub store: StoreClient,
    pub llm: LlmClient,
    pub data_dir: PathBuf,
    pub page_size: u32,
    pub max_values_per_chunk: usize,
    pub retry: Retry,
}

/// Options for a full run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Compute and report everything, write nothing to the store or the
    /// progress ledger.
    pub dry_run: bool,
    /// Discard the progress ledger before starting.
    pub reset: bool,
}

/// Per-collection outcome of a full run.
#[derive(Debug)]
pub struct CollectionSummary {
    pub collection: String,
    /// Completed on a previous run and skipped this time.
    pub skipped: bool,
    pub inventory_values: usize,
    pub remapped: usize,
    pub llm_calls: usize,
    pub fallback_chunks: usize,
    pub apply: Option<ApplyStats>,
}

impl CollectionSummary {
    fn skipped(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            skipped: true,
            inventory_values: 0,
            remapped: 0,
            llm_calls: 0,
            fallback_chunks: 0,
            apply: None,
        }
    }
}

impl PipelineContext {
    /// Validate requested collection names against the store, or list every
    /// collection when none were requested.
    pub async fn resolve_collections(&self, requested: &[String]) -> Result<Vec<String>> {
        let available = self.store.list_collections().await?;

        if requested.is_empty() {
            if available.is_empty() {
                return Err(TagrailError::validation("the store has no collections"));
            }
            return Ok(available);
        }

        for name in requested {
            if !available.contains(name) {
                return Err(TagrailError::validation(format!(
                    "collection '{name}' not found; available: {}",
                    available.join(", ")
                )));
            }
        }
        Ok(requested.to_vec())
    }

    /// Extract stage: scan and persist the tag inventory.
    pub async fn run_extract(
        &self,
        collection: &str,
        reporter: &dyn ProgressReporter,
    ) -> Result<(Inventory, PathBuf)> {
        let inventory =
            build_inventory(&self.store, collection, self.page_size, reporter).await?;
        let path = files::save_inventory(&self.data_dir, &inventory)?;
        Ok((inventory, path))
    }

    /// Normalize stage over a previously extracted inventory.
    pub async fn run_normalize(
        &self,
        collection: &str,
        reporter: &dyn ProgressReporter,
    ) -> Result<(NormalizeOutcome, PathBuf)> {
        let inventory = files::load_inventory(&self.data_dir, collection)?;
        let outcome = self.normalize(&inventory, reporter).await?;
        let path = files::save_mapping(&self.data_dir, &outcome.mapping)?;
        Ok((outcome, path))
    }

    /// Apply stage over a previously finalized mapping.
    pub async fn run_apply(
        &self,
        collection: &str,
        dry_run: bool,
        reporter: &dyn ProgressReporter,
    ) -> Result<ApplyStats> {
        let mapping = files::load_mapping(&self.data_dir, collection)?;
        apply_mapping(
            &self.store,
            collection,
            &mapping,
            self.page_size,
            &self.retry,
            dry_run,
            reporter,
        )
        .await
    }

    async fn normalize(
        &self,
        inventory: &Inventory,
        reporter: &dyn ProgressReporter,
    ) -> Result<NormalizeOutcome> {
        normalize_inventory(
            &self.llm,
            inventory,
            self.max_values_per_chunk,
            &self.retry,
            reporter,
        )
        .await
    }

    /// Run all three stages for each collection, consulting the progress
    /// ledger. Completed collections are skipped; a collection is only
    /// marked complete after its apply pass finishes on a live run.
    pub async fn run_full(
        &self,
        collections: &[String],
        options: RunOptions,
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<CollectionSummary>> {
        let ledger = ProgressStore::new(&self.data_dir);
        if options.reset {
            ledger.reset()?;
        }
        let mut progress = ledger.load()?;

        let mut summaries = Vec::with_capacity(collections.len());
        for collection in collections {
            if progress.is_complete(collection) {
                info!(collection, "already complete, skipping");
                reporter.phase(&format!("Skipping '{collection}' (already complete)"));
                summaries.push(CollectionSummary::skipped(collection));
                continue;
            }

            let (inventory, _) = self.run_extract(collection, reporter).await?;
            if inventory.is_empty() {
                reporter.warning(&format!("'{collection}' has no tags, nothing to do"));
                summaries.push(CollectionSummary {
                    collection: collection.clone(),
                    skipped: false,
                    inventory_values: 0,
                    remapped: 0,
                    llm_calls: 0,
                    fallback_chunks: 0,
                    apply: None,
                });
                continue;
            }

            let outcome = self.normalize(&inventory, reporter).await?;
            files::save_mapping(&self.data_dir, &outcome.mapping)?;

            let stats = apply_mapping(
                &self.store,
                collection,
                &outcome.mapping,
                self.page_size,
                &self.retry,
                options.dry_run,
                reporter,
            )
            .await?;

            // A dry run proves nothing about the live data; only a real
            // apply pass advances the ledger.
            if !options.dry_run {
                progress.mark_complete(collection, stats.records_patched);
                ledger.save(&mut progress)?;
            }

            summaries.push(CollectionSummary {
                collection: collection.clone(),
                skipped: false,
                inventory_values: inventory.total_values(),
                remapped: outcome.mapping.meta.total_remapped,
                llm_calls: outcome.llm_calls,
                fallback_chunks: outcome.fallback_chunks,
                apply: Some(stats),
            });
        }

        Ok(summaries)
    }
}
