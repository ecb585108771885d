//! Data paths of the form `$.a.b[0]`.
//!
//! Paths are accepted in a few spellings (`a.b`, `$.a.b`, `$['a'].b`) and
//! normalized to a single canonical form before they are used as cache keys
//! or dependency-graph nodes.

use serde_json::{Map, Value};

use crate::error::PathError;

/// How far past the end of an array a write may reach.
pub const MAX_ARRAY_GROWTH: usize = 10_000;

/// One step of a data path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Splits a path into segments. The root marker `$` is optional.
pub fn segments(path: &str) -> Vec<Segment> {
    let trimmed = path.trim();
    let body = trimmed.strip_prefix('$').unwrap_or(trimmed);

    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = body.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '.' => flush_key(&mut current, &mut out),
            '[' => {
                flush_key(&mut current, &mut out);
                let mut inner = String::new();
                for next in chars.by_ref() {
                    if next == ']' {
                        break;
                    }
                    inner.push(next);
                }
                out.push(bracket_segment(inner.trim()));
            }
            other => current.push(other),
        }
    }
    flush_key(&mut current, &mut out);
    out
}

fn flush_key(current: &mut String, out: &mut Vec<Segment>) {
    let key = current.trim();
    if !key.is_empty() {
        out.push(Segment::Key(key.to_string()));
    }
    current.clear();
}

fn bracket_segment(inner: &str) -> Segment {
    let unquoted = inner
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .or_else(|| {
            inner
                .strip_prefix('"')
                .and_then(|rest| rest.strip_suffix('"'))
        });
    match unquoted {
        Some(key) => Segment::Key(key.to_string()),
        None => match inner.parse::<usize>() {
            Ok(index) => Segment::Index(index),
            Err(_) => Segment::Key(inner.to_string()),
        },
    }
}

/// Canonical spelling of a path: `$` followed by `.key` and `[index]` parts.
pub fn normalize(path: &str) -> String {
    let mut out = String::from("$");
    for segment in segments(path) {
        match segment {
            Segment::Key(key) => {
                out.push('.');
                out.push_str(&key);
            }
            Segment::Index(index) => {
                out.push('[');
                out.push_str(&index.to_string());
                out.push(']');
            }
        }
    }
    out
}

/// Name a dependency is bound to inside a computed expression.
pub fn leaf_name(path: &str) -> Option<String> {
    segments(path).into_iter().rev().find_map(|segment| match segment {
        Segment::Key(key) => Some(key),
        Segment::Index(_) => None,
    })
}

/// Looks a path up in `data`. Any missing segment yields `None`.
pub fn get<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    walk(data, &segments(path))
}

/// Follows already-split segments from `value`.
pub fn walk<'a>(value: &'a Value, parts: &[Segment]) -> Option<&'a Value> {
    let mut current = value;
    for segment in parts {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key)?,
            (Segment::Index(index), Value::Array(items)) => items.get(*index)?,
            (Segment::Key(key), Value::Array(items)) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Writes `value` at `path`, creating intermediate objects and arrays.
///
/// An index more than [`MAX_ARRAY_GROWTH`] slots past the end of its array
/// is rejected before anything is written.
pub fn set(data: &mut Value, path: &str, value: Value) -> Result<(), PathError> {
    let parts = segments(path);
    if parts.is_empty() {
        return Err(PathError::Empty);
    }
    for (position, segment) in parts.iter().enumerate() {
        if let Segment::Index(index) = segment {
            let len = walk(data, &parts[..position])
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            if index.saturating_sub(len) >= MAX_ARRAY_GROWTH {
                return Err(PathError::IndexOutOfRange {
                    path: normalize(path),
                    index: *index,
                    len,
                });
            }
        }
    }

    let mut current = data;
    for segment in &parts {
        current = match segment {
            Segment::Key(key) => {
                if current.is_null() {
                    *current = Value::Object(Map::new());
                }
                match current {
                    Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
                    _ => {
                        return Err(PathError::Conflict {
                            path: normalize(path),
                            segment: key.clone(),
                        });
                    }
                }
            }
            Segment::Index(index) => {
                if current.is_null() {
                    *current = Value::Array(Vec::new());
                }
                match current {
                    Value::Array(items) => {
                        if items.len() <= *index {
                            items.resize(index + 1, Value::Null);
                        }
                        &mut items[*index]
                    }
                    _ => {
                        return Err(PathError::Conflict {
                            path: normalize(path),
                            segment: index.to_string(),
                        });
                    }
                }
            }
        };
    }
    *current = value;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_equivalent_spellings() {
        assert_eq!(normalize("a.b"), "$.a.b");
        assert_eq!(normalize("$.a.b"), "$.a.b");
        assert_eq!(normalize("$['a'].b"), "$.a.b");
        assert_eq!(normalize("$.items[2].price"), "$.items[2].price");
        assert_eq!(normalize("$"), "$");
    }

    #[test]
    fn get_returns_none_for_missing_segments() {
        let data = json!({ "a": { "b": [10, 20] } });
        assert_eq!(get(&data, "$.a.b[1]"), Some(&json!(20)));
        assert_eq!(get(&data, "$.a.c"), None);
        assert_eq!(get(&data, "$.a.b[5]"), None);
        assert_eq!(get(&data, "$.a.b.c"), None);
    }

    #[test]
    fn set_creates_intermediate_containers() {
        let mut data = json!({});
        set(&mut data, "$.order.lines[1].qty", json!(3)).expect("write");
        assert_eq!(data, json!({ "order": { "lines": [null, { "qty": 3 }] } }));
    }

    #[test]
    fn set_rejects_writes_through_scalars() {
        let mut data = json!({ "name": "x" });
        let err = set(&mut data, "$.name.first", json!("y")).unwrap_err();
        assert!(matches!(err, PathError::Conflict { .. }));
    }

    #[test]
    fn set_rejects_indexes_far_past_the_end() {
        let mut data = json!({ "items": [1] });
        let err = set(&mut data, "$.items[18446744073709551615]", json!(2)).unwrap_err();
        assert!(matches!(err, PathError::IndexOutOfRange { len: 1, .. }));

        let err = set(&mut data, "$.fresh[10000].name", json!("x")).unwrap_err();
        assert!(matches!(err, PathError::IndexOutOfRange { len: 0, .. }));
        assert_eq!(data, json!({ "items": [1] }));

        set(&mut data, "$.items[9999]", json!(2)).expect("within growth bound");
        assert_eq!(data["items"].as_array().map(Vec::len), Some(10_000));
    }

    #[test]
    fn leaf_name_skips_indexes() {
        assert_eq!(leaf_name("$.order.total").as_deref(), Some("total"));
        assert_eq!(leaf_name("$.items[0]").as_deref(), Some("items"));
        assert_eq!(leaf_name("$"), None);
    }
}
