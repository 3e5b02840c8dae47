//! Strict parsing and validation of normalization replies.
//!
//! The service promises a JSON object mapping each input tag to its broad
//! form, but replies arrive with no structural guarantee. Parsing tolerates
//! an optional fenced-code wrapper and, as a fallback, a two-column tabular
//! layout with an optional header row. Validation then enforces totality
//! over the requested key set, substituting identity for anything missing.

use std::collections::BTreeMap;

use tagrail_shared::{Result, TagrailError, clip};

/// Column headers recognized (and skipped) in tabular replies.
const HEADER_WORDS: &[&str] = &["tag", "tags", "input", "specific", "value", "old"];

/// Strip an optional Markdown code fence from around the reply.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the fence line (which may carry a language hint) and the closer.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.rsplit_once("```").map_or(body, |(body, _)| body).trim()
}

/// Parse a reply into a key → value mapping.
///
/// Tries JSON first; falls back to line-based `old,new` / `old -> new`
/// pairs. A reply that yields no pairs at all is a parse error — the caller
/// degrades the whole chunk to identity.
pub fn parse_reply(text: &str) -> Result<BTreeMap<String, String>> {
    let body = strip_code_fence(text);

    if let Ok(mapping) = serde_json::from_str::<BTreeMap<String, String>>(body) {
        return Ok(mapping);
    }

    parse_tabular(body)
}

/// Parse `old -> new` / `old,new` / tab-separated lines, skipping an
/// optional header row.
fn parse_tabular(body: &str) -> Result<BTreeMap<String, String>> {
    let mut mapping = BTreeMap::new();
    let mut first_data_line = true;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((key, value)) = split_pair(line) else {
            return Err(TagrailError::parse(format!(
                "unparseable reply line: {}",
                clip(line, 80)
            )));
        };

        if first_data_line && is_header(key) {
            first_data_line = false;
            continue;
        }
        first_data_line = false;

        mapping.insert(key.to_string(), value.to_string());
    }

    if mapping.is_empty() {
        return Err(TagrailError::parse("reply contained no mappings"));
    }
    Ok(mapping)
}

fn split_pair(line: &str) -> Option<(&str, &str)> {
    let (key, value) = if let Some((k, v)) = line.split_once("->") {
        (k, v)
    } else if let Some((k, v)) = line.split_once(',') {
        (k, v)
    } else {
        line.split_once('\t')?
    };

    let key = key.trim();
    let value = value.trim();
    (!key.is_empty() && !value.is_empty()).then_some((key, value))
}

fn is_header(key: &str) -> bool {
    HEADER_WORDS
        .iter()
        .any(|w| key.eq_ignore_ascii_case(w))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A reply validated against the requested key set.
#[derive(Debug, Clone)]
pub struct ValidatedMapping {
    /// Exactly the requested keys, in order; identity-filled where needed.
    pub mapping: BTreeMap<String, String>,
    /// Requested keys the reply omitted (identity was substituted).
    pub missing: Vec<String>,
}

/// Enforce totality: every requested key gets an entry, falling back to
/// identity for anything the reply omitted. Unrequested keys in the reply
/// are dropped — the model must not invent tags.
pub fn validate_reply<'a>(
    parsed: &BTreeMap<String, String>,
    expected: impl IntoIterator<Item = &'a str>,
) -> ValidatedMapping {
    let mut mapping = BTreeMap::new();
    let mut missing = Vec::new();

    for key in expected {
        match parsed.get(key) {
            Some(value) => {
                mapping.insert(key.to_string(), value.clone());
            }
            None => {
                missing.push(key.to_string());
                mapping.insert(key.to_string(), key.to_string());
            }
        }
    }

    ValidatedMapping { mapping, missing }
}

/// Identity mapping over a key set — the fallback for a chunk whose reply
/// could not be parsed at all.
pub fn identity_mapping<'a>(keys: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, String> {
    keys.into_iter()
        .map(|k| (k.to_string(), k.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let reply = r#"{"color_navy": "color_blue", "color_jet-black": "color_black"}"#;
        let mapping = parse_reply(reply).unwrap();
        assert_eq!(mapping["color_navy"], "color_blue");
        assert_eq!(mapping.len(), 2);
    }

    #[test]
    fn parses_fenced_json() {
        let reply = "```json\n{\"color_navy\": \"color_blue\"}\n```";
        let mapping = parse_reply(reply).unwrap();
        assert_eq!(mapping["color_navy"], "color_blue");
    }

    #[test]
    fn strip_fence_without_language_hint() {
        let reply = "```\n{\"a_b\": \"a_c\"}\n```";
        assert_eq!(strip_code_fence(reply), r#"{"a_b": "a_c"}"#);
    }

    #[test]
    fn parses_tabular_with_header_row() {
        let reply = "tag,broad\ncolor_navy,color_blue\ncolor_charcoal,color_black\n";
        let mapping = parse_reply(reply).unwrap();
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping["color_charcoal"], "color_black");
        assert!(!mapping.contains_key("tag"));
    }

    #[test]
    fn parses_arrow_pairs_without_header() {
        let reply = "color_navy -> color_blue\ncolor_teal -> color_blue";
        let mapping = parse_reply(reply).unwrap();
        assert_eq!(mapping["color_teal"], "color_blue");
    }

    #[test]
    fn malformed_reply_is_a_parse_error() {
        assert!(parse_reply("I could not group these tags, sorry!").is_err());
        assert!(parse_reply("").is_err());
        assert!(parse_reply("[1, 2, 3]").is_err());
    }

    #[test]
    fn malformed_multibyte_reply_is_an_error_not_a_panic() {
        // Long enough that the error message clips the line, with multibyte
        // chars straddling the clip point
        let reply = format!("{}ééééé", "x".repeat(79));
        let err = parse_reply(&reply).unwrap_err();
        assert!(err.to_string().contains("unparseable reply line"));

        assert!(parse_reply("🦀🦀🦀 no separator here 🦀🦀🦀").is_err());
    }

    #[test]
    fn validation_is_total_over_expected_keys() {
        let mut parsed = BTreeMap::new();
        parsed.insert("color_navy".to_string(), "color_blue".to_string());
        // The model invented a tag we never asked about
        parsed.insert("color_plaid".to_string(), "color_other".to_string());

        let validated = validate_reply(&parsed, ["color_navy", "color_charcoal"]);

        assert_eq!(validated.mapping.len(), 2);
        assert_eq!(validated.mapping["color_navy"], "color_blue");
        // Missing key identity-filled
        assert_eq!(validated.mapping["color_charcoal"], "color_charcoal");
        assert_eq!(validated.missing, vec!["color_charcoal"]);
        // Invented key dropped
        assert!(!validated.mapping.contains_key("color_plaid"));
    }

    #[test]
    fn identity_mapping_covers_all_keys() {
        let mapping = identity_mapping(["a_b", "c_d"]);
        assert_eq!(mapping["a_b"], "a_b");
        assert_eq!(mapping["c_d"], "c_d");
    }
}
