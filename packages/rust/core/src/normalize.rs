//! Normalize stage: chunked LLM grouping of an inventory into broad values.
//!
//! Chunks are processed sequentially so each request can carry the broad
//! categories already established by earlier chunks. The reply is never
//! trusted: parse failures degrade the whole chunk to identity, omitted
//! keys are identity-filled, and a reply that moves a tag to a different
//! prefix is rejected per tag. The resulting mapping is total over the
//! inventory by construction.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{info, warn};

use tagrail_llm::parse::{parse_reply, validate_reply};
use tagrail_llm::prompt::{NORMALIZE_SYSTEM_PROMPT, PromptGroup, build_user_prompt};
use tagrail_llm::LlmClient;
use tagrail_shared::{
    Inventory, MappingMeta, Result, TagMapping, TagrailError, UNSTRUCTURED_PREFIX, ValueCount,
};

use crate::chunker::{Chunk, plan_chunks};
use crate::report::ProgressReporter;
use crate::retry::Retry;

/// What the normalize stage produced, with enough counters to print a
/// meaningful summary.
#[derive(Debug)]
pub struct NormalizeOutcome {
    pub mapping: TagMapping,
    /// Chunks sent to the LLM.
    pub llm_calls: usize,
    /// Chunks whose reply could not be parsed and fell back to identity.
    pub fallback_chunks: usize,
    /// Requested keys the replies omitted (identity-filled).
    pub missing_keys: usize,
    /// Values skipped without an LLM call (unstructured bucket plus
    /// single-value prefixes).
    pub skipped_values: usize,
}

/// Run the full normalize stage over an extracted inventory.
pub async fn normalize_inventory(
    llm: &LlmClient,
    inventory: &Inventory,
    max_values_per_chunk: usize,
    retry: &Retry,
    reporter: &dyn ProgressReporter,
) -> Result<NormalizeOutcome> {
    if inventory.is_empty() {
        return Err(TagrailError::validation(format!(
            "inventory for '{}' has no tags to normalize",
            inventory.collection
        )));
    }

    let mut mappings: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut skipped_values = 0usize;
    let mut llm_input: BTreeMap<String, Vec<ValueCount>> = BTreeMap::new();

    for (prefix, entries) in &inventory.prefixes {
        // The unstructured bucket passes through untouched, and a lone
        // value has nothing to group with. Both still get identity entries
        // so the mapping stays total over the inventory.
        if prefix == UNSTRUCTURED_PREFIX || entries.len() == 1 {
            let identity = mappings.entry(prefix.clone()).or_default();
            for entry in entries {
                identity.insert(entry.value.clone(), entry.value.clone());
            }
            skipped_values += entries.len();
        } else {
            llm_input.insert(prefix.clone(), entries.clone());
        }
    }

    let chunks = plan_chunks(&llm_input, max_values_per_chunk);
    reporter.phase(&format!(
        "Normalizing '{}': {} values in {} batches",
        inventory.collection,
        inventory.total_values() - skipped_values,
        chunks.len()
    ));

    let mut established: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut fallback_chunks = 0usize;
    let mut missing_keys = 0usize;

    for (index, chunk) in chunks.iter().enumerate() {
        reporter.item_progress(
            index + 1,
            chunks.len(),
            &format!("batch {}/{} ({} tags)", index + 1, chunks.len(), chunk.len()),
        );

        match process_chunk(llm, chunk, &established, retry).await? {
            ChunkResult::Mapped { pairs, missing } => {
                missing_keys += missing;
                for (prefix, specific, broad) in pairs {
                    let broads = established.entry(prefix.clone()).or_default();
                    if !broads.contains(&broad) {
                        broads.push(broad.clone());
                    }
                    mappings.entry(prefix).or_default().insert(specific, broad);
                }
            }
            ChunkResult::Fallback(reason) => {
                fallback_chunks += 1;
                reporter.warning(&format!(
                    "batch {}/{} kept as-is: {reason}",
                    index + 1,
                    chunks.len()
                ));
                for group in &chunk.groups {
                    let identity = mappings.entry(group.prefix.clone()).or_default();
                    for entry in &group.entries {
                        identity.insert(entry.value.clone(), entry.value.clone());
                    }
                }
            }
        }
    }

    let total_remapped = mappings
        .values()
        .flat_map(|m| m.iter())
        .filter(|(specific, broad)| specific != broad)
        .count();
    let mapping = TagMapping {
        meta: MappingMeta {
            generated_at: Utc::now(),
            model: llm.model().to_string(),
            collection: inventory.collection.clone(),
            total_prefixes: mappings.len(),
            total_values: mappings.values().map(BTreeMap::len).sum(),
            total_remapped,
        },
        mappings,
    };

    info!(
        collection = %inventory.collection,
        llm_calls = chunks.len(),
        fallback_chunks,
        missing_keys,
        remapped = mapping.meta.total_remapped,
        "normalize complete"
    );

    Ok(NormalizeOutcome {
        mapping,
        llm_calls: chunks.len(),
        fallback_chunks,
        missing_keys,
        skipped_values,
    })
}

enum ChunkResult {
    Mapped {
        /// (prefix, specific value, broad value) triples.
        pairs: Vec<(String, String, String)>,
        missing: usize,
    },
    Fallback(String),
}

/// Send one chunk through the LLM and validate the reply. Network and API
/// failures are retried; a reply that survives retries but cannot be parsed
/// degrades the chunk to identity rather than aborting a long run.
async fn process_chunk(
    llm: &LlmClient,
    chunk: &Chunk,
    established: &BTreeMap<String, Vec<String>>,
    retry: &Retry,
) -> Result<ChunkResult> {
    let groups: Vec<PromptGroup<'_>> = chunk
        .groups
        .iter()
        .map(|g| PromptGroup {
            prefix: &g.prefix,
            entries: &g.entries,
        })
        .collect();
    let user_prompt = build_user_prompt(&groups, established);

    let reply = retry
        .run("llm completion", || {
            llm.complete(NORMALIZE_SYSTEM_PROMPT, &user_prompt)
        })
        .await?;

    let parsed = match parse_reply(&reply) {
        Ok(parsed) => parsed,
        Err(err) => return Ok(ChunkResult::Fallback(err.to_string())),
    };

    let expected = chunk.tags();
    let validated = validate_reply(&parsed, expected.iter().map(String::as_str));
    let missing = validated.missing.len();

    let mut pairs = Vec::with_capacity(expected.len());
    for group in &chunk.groups {
        for entry in &group.entries {
            let key = format!("{}_{}", group.prefix, entry.value);
            // Validation guarantees every expected key is present.
            let broad_tag = validated
                .mapping
                .get(&key)
                .map_or(key.as_str(), String::as_str);
            let broad = resolve_broad_value(&group.prefix, &entry.value, broad_tag);
            pairs.push((group.prefix.clone(), entry.value.clone(), broad));
        }
    }

    Ok(ChunkResult::Mapped { pairs, missing })
}

/// Extract the broad value from a reply tag, holding the prefix invariant.
/// A reply that drops or changes the prefix keeps the original value.
fn resolve_broad_value(prefix: &str, specific: &str, broad_tag: &str) -> String {
    match broad_tag.strip_prefix(prefix).and_then(|r| r.strip_prefix('_')) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => {
            if broad_tag != specific {
                warn!(prefix, specific, reply = broad_tag, "reply moved tag out of its prefix");
            }
            specific.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::SilentProgress;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn inventory(prefixes: &[(&str, &[(&str, u64)])]) -> Inventory {
        Inventory {
            collection: "bestbuy".into(),
            scanned_at: Utc::now(),
            records_scanned: 100,
            records_with_tags: 90,
            prefixes: prefixes
                .iter()
                .map(|(p, vs)| {
                    (
                        (*p).to_string(),
                        vs.iter()
                            .map(|(v, c)| ValueCount {
                                value: (*v).into(),
                                count: *c,
                            })
                            .collect(),
                    )
                })
                .collect(),
        }
    }

    fn llm_reply(mapping: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "content": [{"type": "text", "text": mapping.to_string()}],
        })
    }

    fn client(server: &MockServer) -> LlmClient {
        LlmClient::with_base_url(server.uri(), "sk-test".into(), "test-model".into(), 4096)
            .unwrap()
    }

    #[tokio::test]
    async fn skips_llm_for_unstructured_and_single_value_prefixes() {
        // No mock server mounted: any request would fail the test.
        let llm = LlmClient::with_base_url(
            "http://127.0.0.1:1",
            "sk".into(),
            "test-model".into(),
            64,
        )
        .unwrap();

        let inv = inventory(&[
            ("material", &[("oak", 5)]),
            (UNSTRUCTURED_PREFIX, &[("sale", 3), ("brand_", 1)]),
        ]);

        let outcome = normalize_inventory(&llm, &inv, 150, &Retry::immediate(1), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(outcome.llm_calls, 0);
        assert_eq!(outcome.skipped_values, 3);
        assert_eq!(outcome.mapping.broad_value("material", "oak"), "oak");
        assert_eq!(outcome.mapping.broad_value(UNSTRUCTURED_PREFIX, "sale"), "sale");
        assert_eq!(outcome.mapping.meta.total_remapped, 0);
    }

    #[tokio::test]
    async fn maps_values_through_the_llm_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(llm_reply(
                serde_json::json!({
                    "color_charcoal": "color_black",
                    "color_navy": "color_blue",
                    "color_jet-black": "color_black",
                }),
            )))
            .mount(&server)
            .await;

        let inv = inventory(&[(
            "color",
            &[("charcoal", 10), ("navy", 4), ("jet-black", 2)],
        )]);

        let outcome = normalize_inventory(
            &client(&server),
            &inv,
            150,
            &Retry::immediate(1),
            &SilentProgress,
        )
        .await
        .unwrap();

        assert_eq!(outcome.llm_calls, 1);
        assert_eq!(outcome.mapping.broad_value("color", "charcoal"), "black");
        assert_eq!(outcome.mapping.broad_value("color", "jet-black"), "black");
        assert_eq!(outcome.mapping.meta.total_remapped, 3);
        assert_eq!(outcome.mapping.meta.model, "test-model");
    }

    #[tokio::test]
    async fn unparseable_reply_degrades_chunk_to_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "Sorry, I cannot group these."}],
            })))
            .mount(&server)
            .await;

        let inv = inventory(&[("color", &[("navy", 2), ("teal", 1)])]);

        let outcome = normalize_inventory(
            &client(&server),
            &inv,
            150,
            &Retry::immediate(2),
            &SilentProgress,
        )
        .await
        .unwrap();

        assert_eq!(outcome.fallback_chunks, 1);
        assert_eq!(outcome.mapping.broad_value("color", "navy"), "navy");
        assert_eq!(outcome.mapping.meta.total_remapped, 0);
    }

    #[tokio::test]
    async fn omitted_and_prefix_breaking_keys_keep_their_values() {
        let server = MockServer::start().await;
        // "teal" omitted, "navy" moved to a different prefix: both identity
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(llm_reply(
                serde_json::json!({
                    "color_charcoal": "color_black",
                    "color_navy": "shade_blue",
                }),
            )))
            .mount(&server)
            .await;

        let inv = inventory(&[(
            "color",
            &[("charcoal", 5), ("navy", 3), ("teal", 1)],
        )]);

        let outcome = normalize_inventory(
            &client(&server),
            &inv,
            150,
            &Retry::immediate(1),
            &SilentProgress,
        )
        .await
        .unwrap();

        assert_eq!(outcome.missing_keys, 1);
        assert_eq!(outcome.mapping.broad_value("color", "charcoal"), "black");
        assert_eq!(outcome.mapping.broad_value("color", "navy"), "navy");
        assert_eq!(outcome.mapping.broad_value("color", "teal"), "teal");
    }

    #[tokio::test]
    async fn later_chunks_receive_established_categories() {
        let server = MockServer::start().await;

        // Second batch: only matches once the first batch's broad value is
        // offered back as established context.
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_string_contains("color: blue"))
            .respond_with(ResponseTemplate::new(200).set_body_json(llm_reply(
                serde_json::json!({
                    "color_periwinkle": "color_blue",
                    "color_teal": "color_blue",
                }),
            )))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(llm_reply(
                serde_json::json!({
                    "color_azure": "color_blue",
                    "color_navy": "color_blue",
                }),
            )))
            .mount(&server)
            .await;

        // 4 values with bound 2: two dedicated chunks in sorted order
        // (azure, navy) then (periwinkle, teal)
        let inv = inventory(&[(
            "color",
            &[("azure", 1), ("navy", 1), ("periwinkle", 1), ("teal", 1)],
        )]);

        let outcome = normalize_inventory(
            &client(&server),
            &inv,
            2,
            &Retry::immediate(1),
            &SilentProgress,
        )
        .await
        .unwrap();

        assert_eq!(outcome.llm_calls, 2);
        assert_eq!(outcome.mapping.broad_value("color", "periwinkle"), "blue");
        assert_eq!(outcome.mapping.meta.total_remapped, 4);
    }

    #[tokio::test]
    async fn empty_inventory_is_a_validation_error() {
        let llm = LlmClient::with_base_url("http://127.0.0.1:1", "k".into(), "m".into(), 64)
            .unwrap();
        let inv = inventory(&[]);
        let err = normalize_inventory(&llm, &inv, 150, &Retry::immediate(1), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, TagrailError::Validation { .. }));
    }

    #[test]
    fn broad_value_resolution_holds_the_prefix_invariant() {
        assert_eq!(resolve_broad_value("color", "navy", "color_blue"), "blue");
        assert_eq!(resolve_broad_value("color", "navy", "color_navy"), "navy");
        // Prefix dropped or changed: identity
        assert_eq!(resolve_broad_value("color", "navy", "blue"), "navy");
        assert_eq!(resolve_broad_value("color", "navy", "shade_blue"), "navy");
        assert_eq!(resolve_broad_value("color", "navy", "color_"), "navy");
    }
}
