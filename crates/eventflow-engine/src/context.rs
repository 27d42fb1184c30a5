//! Context helpers shared by the condition evaluator and the action dispatcher.

use serde_json::{Map, Value};

/// Resolve a dot-separated path against a nested JSON value.
///
/// Descends through objects only. A missing key or a non-object intermediate
/// yields `None`, which callers treat as an absent (null) value.
pub fn resolve_path<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;

    for segment in path.split('.') {
        match current {
            Value::Object(obj) => {
                current = obj.get(segment)?;
            }
            _ => return None,
        }
    }

    Some(current)
}

/// String form of a value: strings insert raw, everything else as JSON text.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Merge `overlay` on top of `base`; overlay keys win.
pub fn merge_objects(base: &Value, overlay: &Map<String, Value>) -> Value {
    let mut merged = match base {
        Value::Object(obj) => obj.clone(),
        _ => Map::new(),
    };
    for (k, v) in overlay {
        merged.insert(k.clone(), v.clone());
    }
    Value::Object(merged)
}

/// Substitute `{key}` placeholders from `data`.
///
/// Keys may be dotted paths. `{{` and `}}` produce literal braces. Substitution
/// is all-or-nothing: if any placeholder cannot be resolved, or the template is
/// not well formed, the template is returned unmodified.
pub fn render_template(template: &str, data: &Value) -> String {
    render_strict(template, data).unwrap_or_else(|| template.to_string())
}

fn render_strict(template: &str, data: &Value) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') | None => return None,
                        Some(ch) => key.push(ch),
                    }
                }
                if key.is_empty() {
                    return None;
                }
                let value = resolve_path(data, &key)?;
                out.push_str(&value_to_string(value));
            }
            '}' => return None,
            ch => out.push(ch),
        }
    }

    Some(out)
}
