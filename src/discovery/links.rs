//! Link Extraction
//!
//! Walks a JSON document and collects every `@odata.id` hyperlink together
//! with whether it was reached through a vendor (`Oem`) extension subtree,
//! then filters the set for one traversal step.

use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Canonical hyperlink-identifier key
pub const ODATA_ID: &str = "@odata.id";

/// Links of one document: path -> reached under an OEM subtree.
///
/// Ordered so fan-out and logging are deterministic.
pub type LinkSet = BTreeMap<String, bool>;

/// Collect every hyperlink of `document`, trailing `/` stripped.
///
/// `oem` seeds the flag for the document root; it becomes true for a
/// subtree once any ancestor key case-insensitively equals `Oem`.
pub fn extract_links(document: &Value, oem: bool) -> LinkSet {
    let mut links = LinkSet::new();
    if let Value::Object(map) = document {
        walk_object(map, oem, &mut links);
    }
    links
}

fn walk_object(map: &serde_json::Map<String, Value>, oem: bool, links: &mut LinkSet) {
    for (key, value) in map {
        let child_oem = oem || key.eq_ignore_ascii_case("Oem");
        match value {
            Value::Object(nested) => walk_object(nested, child_oem, links),
            Value::Array(items) => {
                for item in items {
                    if let Value::Object(nested) = item {
                        walk_object(nested, child_oem, links);
                    }
                }
            }
            Value::String(link) if key == ODATA_ID => {
                let link = link.strip_suffix('/').unwrap_or(link);
                links.insert(link.to_string(), oem);
            }
            _ => {}
        }
    }
}

/// `Members` links of a collection document, in document order
pub fn member_links(document: &Value) -> Vec<String> {
    document
        .get("Members")
        .and_then(Value::as_array)
        .map(|members| {
            members
                .iter()
                .filter_map(|m| m.get(ODATA_ID).and_then(Value::as_str))
                .map(|link| link.strip_suffix('/').unwrap_or(link).to_string())
                .collect()
        })
        .unwrap_or_default()
}

// =============================================================================
// Link Filtering
// =============================================================================

/// Denylist context of one traversal step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipContext<'a> {
    /// Children of a System or of a root-collection member: a link is
    /// dropped when it contains any listed name
    LinkContains(&'a [String]),
    /// Any other resource: every child is dropped when the parent path
    /// contains any listed name
    ParentContains(&'a [String]),
}

/// Whether `link` equals `parent`, with or without trailing separator
pub fn is_parent(link: &str, parent: &str) -> bool {
    link.eq_ignore_ascii_case(parent)
        || link
            .strip_suffix('/')
            .map(|l| l.eq_ignore_ascii_case(parent))
            .unwrap_or(false)
}

/// Drop visited links, the parent link and denylisted links.
///
/// Returns the surviving links and the number dropped.
pub fn filter_links(
    links: LinkSet,
    parent: &str,
    visited: &HashSet<String>,
    context: SkipContext<'_>,
) -> (LinkSet, usize) {
    let total = links.len();
    if let SkipContext::ParentContains(names) = context {
        if names.iter().any(|name| parent.contains(name.as_str())) {
            return (LinkSet::new(), total);
        }
    }

    let survivors: LinkSet = links
        .into_iter()
        .filter(|(link, _)| !visited.contains(link))
        .filter(|(link, _)| !is_parent(link, parent))
        .filter(|(link, _)| match context {
            SkipContext::LinkContains(names) => {
                !names.iter().any(|name| link.contains(name.as_str()))
            }
            SkipContext::ParentContains(_) => true,
        })
        .collect();
    let dropped = total - survivors.len();
    (survivors, dropped)
}
