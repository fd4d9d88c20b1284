//! Metadata blocks embedded in record bodies and comments.
//!
//! A block is a fenced JSON payload between stable HTML comment markers, so it
//! survives rendering on the code host and can be rewritten in place:
//!
//! ````text
//! <!-- orchard:block:plan-header -->
//! ```json
//! { "schema_version": "1" }
//! ```
//! <!-- /orchard:block:plan-header -->
//! ````

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub const PLAN_HEADER: &str = "plan-header";
pub const PLAN_EVENT: &str = "plan-event";
pub const OBJECTIVE_ROADMAP: &str = "objective-roadmap";

static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)<!-- orchard:block:([a-z0-9-]+) -->\s*```json\r?\n(.*?)\r?\n```\s*<!-- /orchard:block:([a-z0-9-]+) -->",
    )
    .expect("block pattern is valid")
});

/// A block located inside a larger document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMatch<'a> {
    pub start: usize,
    pub end: usize,
    pub payload: &'a str,
}

/// Render `value` as a block with the given key.
pub fn render_block<T: Serialize>(key: &str, value: &T) -> serde_json::Result<String> {
    let payload = serde_json::to_string_pretty(value)?;
    Ok(format!(
        "<!-- orchard:block:{key} -->\n```json\n{payload}\n```\n<!-- /orchard:block:{key} -->"
    ))
}

/// Locate the first block with `key`. Blocks whose closing marker names a
/// different key are ignored.
pub fn find_block<'a>(doc: &'a str, key: &str) -> Option<BlockMatch<'a>> {
    BLOCK_RE.captures_iter(doc).find_map(|caps| {
        let open = caps.get(1)?.as_str();
        let close = caps.get(3)?.as_str();
        if open != key || close != key {
            return None;
        }
        let whole = caps.get(0)?;
        Some(BlockMatch {
            start: whole.start(),
            end: whole.end(),
            payload: caps.get(2)?.as_str(),
        })
    })
}

/// Parse the payload of the block with `key`, if present.
pub fn parse_block<T: DeserializeOwned>(doc: &str, key: &str) -> serde_json::Result<Option<T>> {
    match find_block(doc, key) {
        Some(block) => serde_json::from_str(block.payload).map(Some),
        None => Ok(None),
    }
}

/// Replace the block with `key` by `rendered`, or append it when absent.
pub fn upsert_block(doc: &str, key: &str, rendered: &str) -> String {
    match find_block(doc, key) {
        Some(block) => format!("{}{}{}", &doc[..block.start], rendered, &doc[block.end..]),
        None if doc.trim().is_empty() => rendered.to_string(),
        None => format!("{}\n\n{}", doc.trim_end(), rendered),
    }
}

/// Remove every orchard block, leaving the human-authored content.
pub fn strip_blocks(doc: &str) -> String {
    BLOCK_RE.replace_all(doc, "").trim().to_string()
}
