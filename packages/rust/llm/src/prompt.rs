//! Prompt construction for the normalize stage.
//!
//! Keys on the wire are always full `prefix_value` tags so that a chunk
//! packing several prefixes stays unambiguous.

use std::collections::BTreeMap;
use std::fmt::Write;

use tagrail_shared::ValueCount;

/// Fixed grouping policy sent as the system prompt with every chunk.
pub const NORMALIZE_SYSTEM_PROMPT: &str = "\
You are a product taxonomy specialist. You will receive product tags in \
\"prefix_value\" format (e.g. color_midnight-blue, material_genuine-leather), \
grouped by attribute prefix, with occurrence counts.

Your job: return a JSON object mapping each EXACT input tag to a broader, \
shopper-friendly version. Same \"prefix_value\" format, but with the value \
simplified to what a shopper would expect in a filter dropdown.

RULES:
1. Keep the prefix, only simplify the value.
2. Use kebab-case: \"color_dark-blue\" -> \"color_blue\".
3. If a value is already broad enough, map it to itself: \
\"color_blue\" -> \"color_blue\".
4. Do NOT invent prefixes or categories that are not grounded in the input \
— group into the nearest natural parent.
5. Every input tag MUST appear as a key in your output.
6. When established broad categories are listed, reuse them where they fit \
instead of inventing near-duplicates.

Examples:
- color_charcoal -> color_black
- color_periwinkle -> color_blue
- material_genuine-leather -> material_leather
- material_stainless-steel -> material_steel

Respond with valid JSON only. No markdown fences.";

/// One prefix's slice of a chunk, for prompt rendering.
#[derive(Debug, Clone, Copy)]
pub struct PromptGroup<'a> {
    pub prefix: &'a str,
    pub entries: &'a [ValueCount],
}

/// Build the user message for one chunk.
///
/// `established` carries broad values already decided by earlier chunks of
/// the same collection, keyed by prefix — non-modifiable context that biases
/// later chunks toward consistent groupings.
pub fn build_user_prompt(
    groups: &[PromptGroup<'_>],
    established: &BTreeMap<String, Vec<String>>,
) -> String {
    let total: usize = groups.iter().map(|g| g.entries.len()).sum();
    let mut out = String::new();
    let _ = writeln!(out, "Here are {total} product tags to normalize.");

    for group in groups {
        // Show the most common values first; counts help the model judge
        // which values deserve their own broad category.
        let mut by_count: Vec<&ValueCount> = group.entries.iter().collect();
        by_count.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));

        let _ = writeln!(out, "\nAttribute prefix: \"{}\"", group.prefix);
        let _ = writeln!(out, "Tags ({} unique):", group.entries.len());
        for entry in by_count {
            let _ = writeln!(
                out,
                "  {}_{} ({} records)",
                group.prefix, entry.value, entry.count
            );
        }
    }

    let relevant: Vec<(&String, &Vec<String>)> = established
        .iter()
        .filter(|(prefix, broads)| {
            !broads.is_empty() && groups.iter().any(|g| g.prefix == prefix.as_str())
        })
        .collect();

    if !relevant.is_empty() {
        let _ = writeln!(
            out,
            "\nBroad categories already established by earlier batches \
             (reuse these where they fit; do not rename them):"
        );
        for (prefix, broads) in relevant {
            let _ = writeln!(out, "  {prefix}: {}", broads.join(", "));
        }
    }

    let _ = writeln!(
        out,
        "\nReturn a JSON object mapping EVERY tag above to its broad form. \
         If a tag is already broad enough, map it to itself."
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, u64)]) -> Vec<ValueCount> {
        pairs
            .iter()
            .map(|(v, c)| ValueCount {
                value: (*v).into(),
                count: *c,
            })
            .collect()
    }

    #[test]
    fn prompt_lists_full_tags_by_descending_count() {
        let color = entries(&[("navy", 3), ("charcoal", 10)]);
        let groups = [PromptGroup {
            prefix: "color",
            entries: &color,
        }];

        let prompt = build_user_prompt(&groups, &BTreeMap::new());

        let charcoal = prompt.find("color_charcoal (10 records)").unwrap();
        let navy = prompt.find("color_navy (3 records)").unwrap();
        assert!(charcoal < navy, "higher counts come first");
        assert!(prompt.contains("Here are 2 product tags"));
    }

    #[test]
    fn established_context_only_covers_chunk_prefixes() {
        let color = entries(&[("teal", 2)]);
        let groups = [PromptGroup {
            prefix: "color",
            entries: &color,
        }];

        let mut established = BTreeMap::new();
        established.insert("color".to_string(), vec!["black".into(), "blue".into()]);
        established.insert("material".to_string(), vec!["leather".into()]);

        let prompt = build_user_prompt(&groups, &established);
        assert!(prompt.contains("color: black, blue"));
        assert!(!prompt.contains("material: leather"));
    }

    #[test]
    fn no_established_section_when_context_empty() {
        let size = entries(&[("medium", 1)]);
        let groups = [PromptGroup {
            prefix: "size",
            entries: &size,
        }];

        let prompt = build_user_prompt(&groups, &BTreeMap::new());
        assert!(!prompt.contains("already established"));
    }
}
