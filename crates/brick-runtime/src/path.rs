//! Property path resolution against context bindings.
//!
//! Paths are dot-separated with optional numeric indices and optional-chaining
//! markers: `@input.items[0].id`, `@profile?.name`, `rows.2`.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Hidden key linking a service context entry back to its configured service.
pub const SERVICE_BACKREF_KEY: &str = "__service";

static SIMPLE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_@$][\w@$-]*\??(\.[\w@$-]+\??)*$").expect("simple path pattern is valid")
});

/// Whether `candidate` is a bare property path whose head is bound in `bindings`.
///
/// Used by implicit rendering to decide between path lookup and templating.
pub fn is_simple_path(candidate: &str, bindings: &Map<String, Value>) -> bool {
    if !SIMPLE_PATH.is_match(candidate) {
        return false;
    }
    let head = candidate.split('.').next().unwrap_or_default();
    bindings.contains_key(head.trim_end_matches('?'))
}

/// Resolve `path` against `bindings`. Returns `None` when any segment is missing.
///
/// Walks through service back-references; see [`get_visible_by_path`] for
/// lookups that must not reach them.
pub fn get_by_path<'a>(bindings: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    walk(bindings, path, false)
}

/// Like [`get_by_path`], but a `__service` segment resolves to `None`.
pub fn get_visible_by_path<'a>(bindings: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    walk(bindings, path, true)
}

fn walk<'a>(bindings: &'a Map<String, Value>, path: &str, visible_only: bool) -> Option<&'a Value> {
    let mut segments = path.trim().split('.').filter(|segment| !segment.is_empty());
    let head = segments.next()?;
    let (head_key, head_indices) = split_indices(head.trim_end_matches('?'));
    let mut current = bindings.get(head_key)?;
    for index in head_indices {
        current = current.get(index)?;
    }

    for segment in segments {
        let (key, indices) = split_indices(segment.trim_end_matches('?'));
        if visible_only && key == SERVICE_BACKREF_KEY {
            return None;
        }
        if !key.is_empty() {
            current = match current {
                Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
                other => other.get(key)?,
            };
        }
        for index in indices {
            current = current.get(index)?;
        }
    }
    Some(current)
}

/// Implicit-mode lookup: if the resolved value is a service context entry,
/// return the configured service it refers to instead of its plain fields.
pub fn resolve_service_path(bindings: &Map<String, Value>, path: &str) -> Value {
    match get_by_path(bindings, path) {
        Some(Value::Object(entry)) if entry.contains_key(SERVICE_BACKREF_KEY) => {
            entry[SERVICE_BACKREF_KEY].clone()
        }
        Some(value) => value.clone(),
        None => Value::Null,
    }
}

/// Copy of `value` with the hidden service back-reference removed.
pub fn strip_hidden(value: &Value) -> Value {
    match value {
        Value::Object(entry) if entry.contains_key(SERVICE_BACKREF_KEY) => Value::Object(
            entry
                .iter()
                .filter(|(key, _)| key.as_str() != SERVICE_BACKREF_KEY)
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Text form of a value for interpolation: strings as-is, null as empty.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        other => strip_hidden(other).to_string(),
    }
}

fn split_indices(segment: &str) -> (&str, Vec<usize>) {
    let Some(key_end) = segment.find('[') else {
        return (segment, Vec::new());
    };
    let key = &segment[..key_end];
    let indices = segment[key_end..]
        .split('[')
        .filter_map(|part| part.strip_suffix(']'))
        .filter_map(|index| index.trim().parse::<usize>().ok())
        .collect();
    (key, indices)
}
