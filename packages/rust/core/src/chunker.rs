//! Chunk planning: partition an inventory into ordered, bounded-size groups
//! for the normalize stage.
//!
//! Chunks hold whole-prefix groups wherever possible so the model sees an
//! attribute's values together. A prefix only shares a chunk with others if
//! it fits without exceeding the bound; a prefix larger than the bound gets
//! dedicated chunks of its own.

use std::collections::BTreeMap;

use tagrail_shared::ValueCount;

/// One prefix's slice of a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixGroup {
    pub prefix: String,
    pub entries: Vec<ValueCount>,
}

/// An ordered, bounded-size batch of inventory entries sent to the LLM in
/// one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    pub groups: Vec<PrefixGroup>,
}

impl Chunk {
    /// Total entries across all groups.
    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Full `prefix_value` tags for every entry, in chunk order. These are
    /// the keys the LLM reply is validated against.
    pub fn tags(&self) -> Vec<String> {
        self.groups
            .iter()
            .flat_map(|g| {
                g.entries
                    .iter()
                    .map(move |e| format!("{}_{}", g.prefix, e.value))
            })
            .collect()
    }
}

/// Partition an inventory into chunks of at most `max_per_chunk` entries.
///
/// Prefixes are taken in sorted order; entries within a prefix are sorted
/// case-insensitively so chunk boundaries are stable across runs. Every
/// entry lands in exactly one chunk.
pub fn plan_chunks(
    prefixes: &BTreeMap<String, Vec<ValueCount>>,
    max_per_chunk: usize,
) -> Vec<Chunk> {
    assert!(max_per_chunk > 0, "chunk bound must be positive");

    let mut chunks = Vec::new();
    let mut current = Chunk::default();

    for (prefix, entries) in prefixes {
        if entries.is_empty() {
            continue;
        }

        let mut sorted: Vec<ValueCount> = entries.clone();
        sorted.sort_by(|a, b| {
            a.value
                .to_lowercase()
                .cmp(&b.value.to_lowercase())
                .then_with(|| a.value.cmp(&b.value))
        });

        if sorted.len() > max_per_chunk {
            // Oversized prefix: dedicated chunks, never mixed with others.
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            for slice in sorted.chunks(max_per_chunk) {
                chunks.push(Chunk {
                    groups: vec![PrefixGroup {
                        prefix: prefix.clone(),
                        entries: slice.to_vec(),
                    }],
                });
            }
            continue;
        }

        // Whole prefix fits in one group: pack it into the current chunk
        // only if the bound still holds.
        if current.len() + sorted.len() > max_per_chunk && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        current.groups.push(PrefixGroup {
            prefix: prefix.clone(),
            entries: sorted,
        });
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(values: &[&str]) -> Vec<ValueCount> {
        values
            .iter()
            .map(|v| ValueCount {
                value: (*v).into(),
                count: 1,
            })
            .collect()
    }

    fn inventory(prefixes: &[(&str, &[&str])]) -> BTreeMap<String, Vec<ValueCount>> {
        prefixes
            .iter()
            .map(|(p, vs)| ((*p).to_string(), counts(vs)))
            .collect()
    }

    /// Every inventory entry appears in exactly one chunk.
    #[test]
    fn chunk_union_equals_inventory() {
        let inv = inventory(&[
            ("color", &["navy", "charcoal", "teal", "jet-black"]),
            ("material", &["oak", "steel"]),
            ("size", &["small", "medium", "large"]),
        ]);

        let chunks = plan_chunks(&inv, 4);

        let mut seen: Vec<String> = chunks.iter().flat_map(|c| c.tags()).collect();
        seen.sort();

        let mut expected: Vec<String> = inv
            .iter()
            .flat_map(|(p, vs)| vs.iter().map(move |v| format!("{p}_{}", v.value)))
            .collect();
        expected.sort();

        assert_eq!(seen, expected);
        for chunk in &chunks {
            assert!(chunk.len() <= 4);
        }
    }

    #[test]
    fn small_prefixes_pack_into_shared_chunks() {
        let inv = inventory(&[
            ("color", &["red", "blue"]),
            ("material", &["oak"]),
            ("size", &["small", "large"]),
        ]);

        // 2 + 1 + 2 = 5 entries, bound 5: one shared chunk
        let chunks = plan_chunks(&inv, 5);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].groups.len(), 3);
    }

    #[test]
    fn prefix_that_does_not_fit_starts_a_new_chunk() {
        let inv = inventory(&[
            ("color", &["red", "blue", "green"]),
            ("size", &["small", "medium", "large"]),
        ]);

        let chunks = plan_chunks(&inv, 4);
        assert_eq!(chunks.len(), 2);
        // A prefix's group is never split just to fill the previous chunk
        assert_eq!(chunks[0].groups[0].prefix, "color");
        assert_eq!(chunks[1].groups[0].prefix, "size");
        assert_eq!(chunks[1].groups[0].entries.len(), 3);
    }

    #[test]
    fn oversized_prefix_gets_dedicated_chunks() {
        let inv = inventory(&[
            ("brand", &["a", "b", "c", "d", "e", "f", "g"]),
            ("color", &["red"]),
        ]);

        let chunks = plan_chunks(&inv, 3);

        // brand: 7 values over bound 3 → three dedicated chunks (3+3+1)
        assert_eq!(chunks[0].groups.len(), 1);
        assert_eq!(chunks[0].len(), 3);
        assert_eq!(chunks[1].len(), 3);
        assert_eq!(chunks[2].groups[0].prefix, "brand");
        assert_eq!(chunks[2].len(), 1);
        // color follows in its own packing chunk
        assert_eq!(chunks[3].groups[0].prefix, "color");
    }

    #[test]
    fn entries_sorted_case_insensitively_within_prefix() {
        let inv = inventory(&[("color", &["Zinc", "amber", "Blue"])]);
        let chunks = plan_chunks(&inv, 10);
        let values: Vec<&str> = chunks[0].groups[0]
            .entries
            .iter()
            .map(|e| e.value.as_str())
            .collect();
        assert_eq!(values, vec!["amber", "Blue", "Zinc"]);
    }

    #[test]
    fn chunk_order_is_deterministic() {
        let inv = inventory(&[
            ("color", &["navy", "teal"]),
            ("material", &["oak", "pine", "steel"]),
        ]);
        assert_eq!(plan_chunks(&inv, 3), plan_chunks(&inv, 3));
    }
}
