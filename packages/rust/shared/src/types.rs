//! Core domain types for tag normalization.
//!
//! All persisted documents (inventory, mapping, progress ledger) use
//! `BTreeMap` keys so repeated runs produce diff-friendly output.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved bucket for tags that do not follow the `prefix_value` shape.
/// These pass through all stages unmodified.
pub const UNSTRUCTURED_PREFIX: &str = "__unstructured__";

// ---------------------------------------------------------------------------
// Tag splitting
// ---------------------------------------------------------------------------

/// A tag split on its first underscore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitTag<'a> {
    /// `prefix_value` with non-empty prefix and value.
    Structured { prefix: &'a str, value: &'a str },
    /// No separator, empty prefix, or empty value — passed through as-is.
    Unstructured(&'a str),
}

/// Split a tag into its attribute prefix and value.
///
/// `color_dark-blue` → `Structured { prefix: "color", value: "dark-blue" }`.
/// Tags like `sale`, `_hidden`, or `brand_` are unstructured.
pub fn split_tag(tag: &str) -> SplitTag<'_> {
    match tag.split_once('_') {
        Some((prefix, value)) if !prefix.is_empty() && !value.is_empty() => {
            SplitTag::Structured { prefix, value }
        }
        _ => SplitTag::Unstructured(tag),
    }
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// A tag value and its occurrence count across a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: u64,
}

/// The `<collection>-tag-inventory.json` document produced by the extract
/// stage and consumed by normalize.
///
/// Prefixes are sorted lexicographically; values within a prefix are sorted
/// by descending count, ties broken lexicographically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inventory {
    /// Collection this inventory was built from.
    pub collection: String,
    /// When the extract scan finished.
    pub scanned_at: DateTime<Utc>,
    /// Records seen during the scan.
    pub records_scanned: u64,
    /// Records that carried at least one tag.
    pub records_with_tags: u64,
    /// prefix → ordered (value, count) entries.
    pub prefixes: BTreeMap<String, Vec<ValueCount>>,
}

impl Inventory {
    /// True when the scan found no tags at all.
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Total unique values across all prefixes.
    pub fn total_values(&self) -> usize {
        self.prefixes.values().map(Vec::len).sum()
    }
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

/// Metadata block recorded alongside a finalized mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingMeta {
    pub generated_at: DateTime<Utc>,
    pub model: String,
    pub collection: String,
    pub total_prefixes: usize,
    pub total_values: usize,
    pub total_remapped: usize,
}

/// The `<collection>-tag-mapping.json` document produced by the normalize
/// stage and consumed by apply. Immutable once written.
///
/// Totality invariant: every value present in the inventory appears as a
/// key under its prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagMapping {
    #[serde(rename = "_meta")]
    pub meta: MappingMeta,
    /// prefix → specific value → broad value.
    pub mappings: BTreeMap<String, BTreeMap<String, String>>,
}

impl TagMapping {
    /// Look up the broad value for a specific value, falling back to the
    /// value itself. This is the total-safety net: the mapping is already
    /// guaranteed total over the inventory, but apply re-scans live data
    /// which may have grown since extract.
    pub fn broad_value<'a>(&'a self, prefix: &str, value: &'a str) -> &'a str {
        self.mappings
            .get(prefix)
            .and_then(|m| m.get(value))
            .map_or(value, String::as_str)
    }

    /// Count of values mapped to something other than themselves.
    pub fn total_remapped(&self) -> usize {
        self.mappings
            .values()
            .flat_map(|m| m.iter())
            .filter(|(specific, broad)| specific != broad)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Progress ledger
// ---------------------------------------------------------------------------

/// Completion marker for one collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionProgress {
    /// When the apply stage finished for this collection.
    pub completed_at: DateTime<Utc>,
    /// Records patched during that apply pass.
    pub records_patched: u64,
}

/// The durable `normalize-progress.json` ledger. A collection present here
/// is skipped on subsequent runs unless the ledger is explicitly reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub started: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionProgress>,
}

impl Progress {
    /// Fresh ledger with no completed collections.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            started: now,
            last_updated: now,
            collections: BTreeMap::new(),
        }
    }

    /// Whether a collection has already completed a full apply pass.
    pub fn is_complete(&self, collection: &str) -> bool {
        self.collections.contains_key(collection)
    }

    /// Mark a collection complete.
    pub fn mark_complete(&mut self, collection: &str, records_patched: u64) {
        self.collections.insert(
            collection.to_string(),
            CollectionProgress {
                completed_at: Utc::now(),
                records_patched,
            },
        );
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}
