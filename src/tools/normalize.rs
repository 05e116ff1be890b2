//! Tool name and argument-key normalization
//!
//! Models occasionally mangle tool names: underscores dropped, case
//! changed, or a well-known synonym used. Normalization maps a requested
//! name onto a registered one before dispatch so a near-miss does not
//! turn into a failed call.
//!
//! Discovered tools have a second mismatch: their advertised schemas use
//! underscored parameter names, while their executors expect compact
//! camel-style keys. Argument keys are rewritten before a remote
//! dispatch, first through a static per-tool rename table, then by
//! stripping separators from any remaining underscored keys. Values are
//! never touched.

use serde_json::Value;

/// Well-known aliases models tend to emit
const ALIASES: &[(&str, &str)] = &[
    ("current_time", "get_current_time"),
    ("what_time_is_it", "get_current_time"),
    ("weather", "get_weather"),
    ("check_weather", "get_weather"),
];

/// Per-tool argument renames the generic separator strip cannot produce
const ARG_RENAMES: &[(&str, &str, &str)] = &[
    ("get_weather", "location_name", "locationName"),
    ("control_device", "entity_id", "entityId"),
    ("set_timer", "duration_seconds", "durationSeconds"),
];

/// Map a requested tool name onto a registered one
///
/// Resolution order: exact match, static alias, then case- and
/// underscore-insensitive match against the registered names. Returns
/// `None` when nothing matches. Applying the function to its own output
/// always returns the same name.
#[must_use]
pub fn normalize_tool_name(requested: &str, known: &[String]) -> Option<String> {
    if known.iter().any(|name| name == requested) {
        return Some(requested.to_string());
    }

    if let Some((_, target)) = ALIASES.iter().find(|(alias, _)| *alias == requested) {
        if known.iter().any(|name| name == target) {
            tracing::debug!(original = requested, normalized = target, "tool name normalized");
            return Some((*target).to_string());
        }
    }

    let folded = fold(requested);
    let matched = known.iter().find(|name| fold(name) == folded)?;
    tracing::debug!(original = requested, normalized = %matched, "tool name normalized");
    Some(matched.clone())
}

/// Rewrite argument keys into the convention the remote executor expects
///
/// Top-level keys only; values pass through unchanged. Each rename is
/// logged. Applying the function to its own output returns the same
/// object: rename targets carry no separators, so neither pass fires
/// twice.
#[must_use]
pub fn normalize_arguments(tool: &str, arguments: &Value) -> Value {
    let Value::Object(map) = arguments else {
        return arguments.clone();
    };

    let mut out = serde_json::Map::with_capacity(map.len());
    for (key, value) in map {
        let normalized = normalize_argument_key(tool, key);
        if normalized != *key {
            tracing::debug!(
                tool,
                original = %key,
                normalized = %normalized,
                "argument key normalized"
            );
        }
        out.insert(normalized, value.clone());
    }
    Value::Object(out)
}

fn normalize_argument_key(tool: &str, key: &str) -> String {
    if let Some((_, _, target)) = ARG_RENAMES
        .iter()
        .find(|(for_tool, from, _)| *for_tool == tool && *from == key)
    {
        return (*target).to_string();
    }

    if key.contains('_') || key.contains('-') {
        key.chars().filter(|c| *c != '_' && *c != '-').collect()
    } else {
        key.to_string()
    }
}

/// Lowercase with underscores and hyphens removed
fn fold(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
