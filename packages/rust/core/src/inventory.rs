//! Extract stage: scan a collection and build its tag inventory.
//!
//! Tags split into prefix → value buckets on the first underscore; tags
//! that do not fit the `prefix_value` shape are kept under the reserved
//! unstructured bucket so downstream stages can pass them through
//! unchanged.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use tracing::info;

use tagrail_shared::{
    Inventory, Result, SplitTag, UNSTRUCTURED_PREFIX, ValueCount, split_tag,
};
use tagrail_store::StoreClient;

use crate::report::ProgressReporter;

/// Accumulates tag counts record by record.
#[derive(Debug, Default)]
pub struct InventoryBuilder {
    counts: BTreeMap<String, HashMap<String, u64>>,
    records_scanned: u64,
    records_with_tags: u64,
}

impl InventoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one record's tags.
    pub fn add_record(&mut self, tags: &[String]) {
        self.records_scanned += 1;
        if tags.is_empty() {
            return;
        }
        self.records_with_tags += 1;

        for tag in tags {
            let (prefix, value) = match split_tag(tag) {
                SplitTag::Structured { prefix, value } => (prefix, value),
                SplitTag::Unstructured(tag) => (UNSTRUCTURED_PREFIX, tag),
            };
            *self
                .counts
                .entry(prefix.to_string())
                .or_default()
                .entry(value.to_string())
                .or_insert(0) += 1;
        }
    }

    /// Finalize into a deterministic-order inventory: prefixes sorted
    /// lexicographically, values by descending count then lexicographic.
    pub fn finish(self, collection: &str) -> Inventory {
        let prefixes = self
            .counts
            .into_iter()
            .map(|(prefix, values)| {
                let mut entries: Vec<ValueCount> = values
                    .into_iter()
                    .map(|(value, count)| ValueCount { value, count })
                    .collect();
                entries.sort_by(|a, b| {
                    b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value))
                });
                (prefix, entries)
            })
            .collect();

        Inventory {
            collection: collection.to_string(),
            scanned_at: Utc::now(),
            records_scanned: self.records_scanned,
            records_with_tags: self.records_with_tags,
            prefixes,
        }
    }
}

/// Scan the full collection and build its inventory. Read-only against the
/// store; the record count is never assumed in advance.
pub async fn build_inventory(
    store: &StoreClient,
    collection: &str,
    page_size: u32,
    reporter: &dyn ProgressReporter,
) -> Result<Inventory> {
    reporter.phase(&format!("Scanning '{collection}' for tags"));

    let mut builder = InventoryBuilder::new();
    let mut cursor = None;

    loop {
        let (records, next) = store.scroll(collection, page_size, cursor.as_ref()).await?;
        if records.is_empty() {
            break;
        }

        for record in &records {
            builder.add_record(&record.tags());
        }

        reporter.item_progress(
            builder.records_scanned as usize,
            0,
            &format!("{} records scanned", builder.records_scanned),
        );

        match next {
            Some(c) => cursor = Some(c),
            None => break,
        }
    }

    let inventory = builder.finish(collection);
    info!(
        collection,
        records_scanned = inventory.records_scanned,
        records_with_tags = inventory.records_with_tags,
        prefixes = inventory.prefixes.len(),
        unique_values = inventory.total_values(),
        "inventory built"
    );

    Ok(inventory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::SilentProgress;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tags(strs: &[&str]) -> Vec<String> {
        strs.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn builder_buckets_by_prefix_with_counts() {
        let mut builder = InventoryBuilder::new();
        builder.add_record(&tags(&["color_navy", "color_charcoal", "size_medium"]));
        builder.add_record(&tags(&["color_navy"]));
        builder.add_record(&tags(&[]));

        let inventory = builder.finish("bestbuy");

        assert_eq!(inventory.records_scanned, 3);
        assert_eq!(inventory.records_with_tags, 2);
        assert_eq!(inventory.prefixes.len(), 2);

        let color = &inventory.prefixes["color"];
        assert_eq!(color[0].value, "navy");
        assert_eq!(color[0].count, 2);
        assert_eq!(color[1].value, "charcoal");
    }

    #[test]
    fn malformed_tags_land_in_the_unstructured_bucket() {
        let mut builder = InventoryBuilder::new();
        builder.add_record(&tags(&["sale", "brand_", "color_red"]));

        let inventory = builder.finish("willow");

        let unstructured = &inventory.prefixes[UNSTRUCTURED_PREFIX];
        let values: Vec<&str> = unstructured.iter().map(|v| v.value.as_str()).collect();
        assert!(values.contains(&"sale"));
        assert!(values.contains(&"brand_"));
        assert_eq!(inventory.prefixes["color"][0].value, "red");
    }

    #[test]
    fn values_sorted_by_count_then_lexicographic() {
        let mut builder = InventoryBuilder::new();
        builder.add_record(&tags(&["color_zinc", "color_amber"]));
        builder.add_record(&tags(&["color_zinc", "color_amber", "color_navy"]));
        builder.add_record(&tags(&["color_navy"]));

        let inventory = builder.finish("x");
        let values: Vec<&str> = inventory.prefixes["color"]
            .iter()
            .map(|v| v.value.as_str())
            .collect();
        // amber/navy/zinc all have count 2: lexicographic tie-break
        assert_eq!(values, vec!["amber", "navy", "zinc"]);
    }

    #[test]
    fn empty_scan_yields_empty_inventory() {
        let inventory = InventoryBuilder::new().finish("empty");
        assert!(inventory.is_empty());
        assert_eq!(inventory.total_values(), 0);
    }

    #[tokio::test]
    async fn build_inventory_scans_all_pages() {
        let server = MockServer::start().await;

        let page1 = serde_json::json!({
            "result": {
                "points": [
                    {"id": 1, "payload": {"tags": ["color_navy"]}},
                    {"id": 2, "payload": {"tags": ["color_navy", "size_medium"]}},
                ],
                "next_page_offset": 3,
            },
        });
        let page2 = serde_json::json!({
            "result": {
                "points": [{"id": 3, "payload": {"tags": ["color_charcoal"]}}],
                "next_page_offset": null,
            },
        });

        Mock::given(method("POST"))
            .and(path("/collections/bestbuy/points/scroll"))
            .and(wiremock::matchers::body_partial_json(
                serde_json::json!({"offset": 3}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(&page2))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/collections/bestbuy/points/scroll"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&page1))
            .mount(&server)
            .await;

        let store = StoreClient::new(server.uri(), None).unwrap();
        let inventory = build_inventory(&store, "bestbuy", 2, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(inventory.records_scanned, 3);
        assert_eq!(inventory.prefixes["color"].len(), 2);
        assert_eq!(inventory.prefixes["size"][0].value, "medium");
    }
}
