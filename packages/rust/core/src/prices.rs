//! Price-unit repair: convert dollar-denominated payloads to integer cents.
//!
//! Upstream feeds deliver decimal dollars while the rest of the system
//! stores integer cents. This pass multiplies affected fields by 100 with
//! two double-conversion guards: individual values above the cents
//! threshold are left alone, and a first-page median above the threshold
//! aborts the whole pass.

use serde_json::{Map, Value};
use tracing::info;

use tagrail_shared::{Result, TagrailError};
use tagrail_store::StoreClient;

use crate::report::ProgressReporter;
use crate::retry::Retry;

/// Values above this are assumed to already be cents and are not touched.
pub const ALREADY_CENTS_THRESHOLD: f64 = 50_000.0;

/// Price-carrying payload fields, at the record top level and inside each
/// variant.
const PRICE_FIELDS: [&str; 2] = ["price", "compare_at_price"];

/// Counters and price ranges from one conversion pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PriceStats {
    pub records_scanned: u64,
    /// Records with at least one converted field (written unless dry run).
    pub records_patched: u64,
    /// Smallest and largest top-level price before conversion, in dollars.
    pub before_range: Option<(f64, f64)>,
    /// Smallest and largest top-level price after conversion, in cents.
    pub after_range: Option<(i64, i64)>,
}

impl PriceStats {
    fn record_price(&mut self, before: f64, after: i64) {
        self.before_range = Some(match self.before_range {
            Some((lo, hi)) => (lo.min(before), hi.max(before)),
            None => (before, before),
        });
        self.after_range = Some(match self.after_range {
            Some((lo, hi)) => (lo.min(after), hi.max(after)),
            None => (after, after),
        });
    }
}

/// Convert one price value from dollars to cents, rounding to the nearest
/// cent. `None` when the value is absent, zero, non-numeric, or already
/// looks like cents.
pub fn convert_price(value: &Value) -> Option<i64> {
    let dollars = value.as_f64()?;
    if dollars <= 0.0 || dollars > ALREADY_CENTS_THRESHOLD {
        return None;
    }
    Some((dollars * 100.0).round() as i64)
}

/// Convert price fields inside a `variants` array. Returns the rewritten
/// array only when something changed; non-object entries pass through.
pub fn convert_variant_prices(variants: &Value) -> Option<Value> {
    let list = variants.as_array()?;

    let mut changed = false;
    let mut out = Vec::with_capacity(list.len());
    for entry in list {
        let Some(obj) = entry.as_object() else {
            out.push(entry.clone());
            continue;
        };
        let mut obj = obj.clone();
        for field in PRICE_FIELDS {
            if let Some(cents) = obj.get(field).and_then(convert_price) {
                obj.insert(field.into(), Value::from(cents));
                changed = true;
            }
        }
        out.push(Value::Object(obj));
    }

    changed.then(|| Value::from(out))
}

/// Build the patch for one record, or `None` when nothing needs converting.
fn build_patch(payload: &Map<String, Value>, stats: &mut PriceStats) -> Option<Map<String, Value>> {
    let mut patch = Map::new();

    for field in PRICE_FIELDS {
        if let Some(value) = payload.get(field) {
            if let Some(cents) = convert_price(value) {
                if field == "price" {
                    // as_f64 succeeded in convert_price
                    stats.record_price(value.as_f64().unwrap_or_default(), cents);
                }
                patch.insert(field.into(), Value::from(cents));
            }
        }
    }

    if let Some(variants) = payload.get("variants") {
        if let Some(converted) = convert_variant_prices(variants) {
            patch.insert("variants".into(), converted);
        }
    }

    (!patch.is_empty()).then_some(patch)
}

/// Median of the positive top-level prices on a page.
fn page_price_median(records: &[tagrail_store::Record]) -> Option<f64> {
    let mut prices: Vec<f64> = records
        .iter()
        .filter_map(|r| r.payload.get("price").and_then(Value::as_f64))
        .filter(|p| *p > 0.0)
        .collect();
    if prices.is_empty() {
        return None;
    }
    prices.sort_by(|a, b| a.total_cmp(b));
    let mid = prices.len() / 2;
    Some(if prices.len() % 2 == 0 {
        (prices[mid - 1] + prices[mid]) / 2.0
    } else {
        prices[mid]
    })
}

/// Convert a collection's prices from dollars to cents.
///
/// Aborts with a validation error when the first page's median price
/// already exceeds the cents threshold — the strongest signal the pass has
/// run before.
pub async fn fix_prices(
    store: &StoreClient,
    collection: &str,
    page_size: u32,
    retry: &Retry,
    dry_run: bool,
    reporter: &dyn ProgressReporter,
) -> Result<PriceStats> {
    reporter.phase(&format!(
        "{} prices in '{collection}'",
        if dry_run { "Previewing" } else { "Converting" }
    ));

    let mut stats = PriceStats::default();
    let mut cursor = None;
    let mut first_page = true;

    loop {
        let (records, next) = store.scroll(collection, page_size, cursor.as_ref()).await?;
        if records.is_empty() {
            break;
        }

        if first_page {
            first_page = false;
            if let Some(median) = page_price_median(&records) {
                info!(collection, median, "first page price median");
                if median > ALREADY_CENTS_THRESHOLD {
                    return Err(TagrailError::validation(format!(
                        "median price {median:.2} in '{collection}' exceeds \
                         {ALREADY_CENTS_THRESHOLD}; values look like cents already, \
                         refusing to convert twice"
                    )));
                }
            }
        }

        for record in &records {
            stats.records_scanned += 1;

            let Some(patch) = build_patch(&record.payload, &mut stats) else {
                continue;
            };

            if !dry_run {
                retry
                    .run("store patch", || {
                        store.set_payload(collection, &record.id, &patch)
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
        dry_run,
        "price pass finished"
    );

    Ok(stats)
}
