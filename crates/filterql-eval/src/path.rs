//! Paths: the location-addressing half of the evaluator, used by `path/1`,
//! `paths/0`, `getpath/1`/`setpath/2`/`delpaths/1`, and the assignment
//! engine in `assign.rs`.
//!
//! A path is a list of segments; get/update/delete all walk it recursively,
//! creating or padding intermediate containers as needed.

use std::collections::BTreeMap;

use filterql_util::Span;

use crate::error::RuntimeError;
use crate::value::Value;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PathSegment {
    Key(String),
    Index(i64),
    Slice {
        start: Option<i64>,
        end: Option<i64>,
    },
}

pub type Path = Vec<PathSegment>;

pub fn path_to_value(path: &Path) -> Value {
    Value::Array(
        path.iter()
            .map(|seg| match seg {
                PathSegment::Key(k) => Value::String(k.clone()),
                PathSegment::Index(i) => Value::Number(*i as f64),
                PathSegment::Slice { start, end } => {
                    let mut m = BTreeMap::new();
                    m.insert(
                        "start".to_string(),
                        start.map(|s| Value::Number(s as f64)).unwrap_or(Value::Null),
                    );
                    m.insert(
                        "end".to_string(),
                        end.map(|e| Value::Number(e as f64)).unwrap_or(Value::Null),
                    );
                    Value::Object(m)
                }
            })
            .collect(),
    )
}

pub fn value_to_path(value: &Value, span: Span) -> Result<Path, RuntimeError> {
    let Value::Array(items) = value else {
        return Err(RuntimeError::type_("path must be an array", span));
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(PathSegment::Key(s.clone())),
            Value::Number(n) => Ok(PathSegment::Index(*n as i64)),
            Value::Object(m) => {
                let to_opt_int = |v: Option<&Value>| match v {
                    None | Some(Value::Null) => Ok(None),
                    Some(Value::Number(n)) => Ok(Some(*n as i64)),
                    Some(_) => Err(RuntimeError::type_("invalid slice bound in path", span)),
                };
                Ok(PathSegment::Slice {
                    start: to_opt_int(m.get("start"))?,
                    end: to_opt_int(m.get("end"))?,
                })
            }
            _ => Err(RuntimeError::type_("invalid path component", span)),
        })
        .collect()
}

/// Negative-from-end indexing for reads: out-of-range (either direction)
/// reports `None`, which callers surface as `null`.
pub fn normalize_read_index(i: i64, len: usize) -> Option<usize> {
    let idx = if i < 0 { i + len as i64 } else { i };
    if idx < 0 || idx as usize >= len {
        None
    } else {
        Some(idx as usize)
    }
}

/// Negative-from-end indexing for writes: negative out-of-range is a fault
/// (there is no element to address), positive out-of-range is valid and the
/// caller pads with `null` up to it.
fn resolve_write_index(i: i64, len: usize, span: Span) -> Result<usize, RuntimeError> {
    let idx = if i < 0 { i + len as i64 } else { i };
    if idx < 0 {
        Err(RuntimeError::index(
            format!("array index {i} out of bounds"),
            span,
        ))
    } else {
        Ok(idx as usize)
    }
}

pub fn slice_bounds(start: Option<i64>, end: Option<i64>, len: usize) -> (usize, usize) {
    let clamp = |i: i64| -> usize {
        let idx = if i < 0 { i + len as i64 } else { i };
        idx.clamp(0, len as i64) as usize
    };
    let s = start.map(clamp).unwrap_or(0);
    let e = end.map(clamp).unwrap_or(len);
    if s >= e {
        (s, s)
    } else {
        (s, e)
    }
}

pub fn get_path(value: &Value, path: &[PathSegment]) -> Value {
    let Some((seg, rest)) = path.split_first() else {
        return value.clone();
    };
    let next = match (seg, value) {
        (PathSegment::Key(k), Value::Object(m)) => m.get(k).cloned().unwrap_or(Value::Null),
        (PathSegment::Key(_), Value::Null) => Value::Null,
        (PathSegment::Index(i), Value::Array(a)) => normalize_read_index(*i, a.len())
            .map(|idx| a[idx].clone())
            .unwrap_or(Value::Null),
        (PathSegment::Index(_), Value::Null) => Value::Null,
        (PathSegment::Slice { start, end }, Value::Array(a)) => {
            let (s, e) = slice_bounds(*start, *end, a.len());
            Value::Array(a[s..e].to_vec())
        }
        (PathSegment::Slice { .. }, Value::Null) => Value::Array(Vec::new()),
        _ => Value::Null,
    };
    get_path(&next, rest)
}

pub fn update_path(
    value: &Value,
    path: &[PathSegment],
    f: &mut dyn FnMut(&Value) -> Result<Value, RuntimeError>,
    span: Span,
) -> Result<Value, RuntimeError> {
    let Some((seg, rest)) = path.split_first() else {
        return f(value);
    };
    match seg {
        PathSegment::Key(k) => {
            let mut map = match value {
                Value::Object(m) => m.clone(),
                Value::Null => BTreeMap::new(),
                other => {
                    return Err(RuntimeError::type_(
                        format!("cannot index {} with string \"{k}\"", other.type_name()),
                        span,
                    ))
                }
            };
            let child = map.get(k).cloned().unwrap_or(Value::Null);
            let new_child = update_path(&child, rest, f, span)?;
            map.insert(k.clone(), new_child);
            Ok(Value::Object(map))
        }
        PathSegment::Index(i) => {
            let mut arr = match value {
                Value::Array(a) => a.clone(),
                Value::Null => Vec::new(),
                other => {
                    return Err(RuntimeError::type_(
                        format!("cannot index {} with number", other.type_name()),
                        span,
                    ))
                }
            };
            let idx = resolve_write_index(*i, arr.len(), span)?;
            if idx >= arr.len() {
                arr.resize(idx + 1, Value::Null);
            }
            let new_child = update_path(&arr[idx], rest, f, span)?;
            arr[idx] = new_child;
            Ok(Value::Array(arr))
        }
        PathSegment::Slice { start, end } => {
            let arr = match value {
                Value::Array(a) => a.clone(),
                Value::Null => Vec::new(),
                other => {
                    return Err(RuntimeError::type_(
                        format!("cannot slice {}", other.type_name()),
                        span,
                    ))
                }
            };
            let (s, e) = slice_bounds(*start, *end, arr.len());
            let slice_val = Value::Array(arr[s..e].to_vec());
            let new_slice = update_path(&slice_val, rest, f, span)?;
            let Value::Array(replacement) = new_slice else {
                return Err(RuntimeError::type_(
                    "slice assignment requires an array",
                    span,
                ));
            };
            let mut result = Vec::with_capacity(arr.len() - (e - s) + replacement.len());
            result.extend_from_slice(&arr[..s]);
            result.extend(replacement);
            result.extend_from_slice(&arr[e..]);
            Ok(Value::Array(result))
        }
    }
}

fn delete_single(value: &Value, path: &[PathSegment], span: Span) -> Result<Value, RuntimeError> {
    let Some((last, init)) = path.split_last() else {
        return Ok(Value::Null);
    };
    update_path(
        value,
        init,
        &mut |parent| match (last, parent) {
            (PathSegment::Key(k), Value::Object(m)) => {
                let mut m2 = m.clone();
                m2.remove(k);
                Ok(Value::Object(m2))
            }
            (PathSegment::Key(_), Value::Null) => Ok(Value::Null),
            (PathSegment::Index(i), Value::Array(a)) => {
                let mut a2 = a.clone();
                if let Some(idx) = normalize_read_index(*i, a2.len()) {
                    a2.remove(idx);
                }
                Ok(Value::Array(a2))
            }
            (PathSegment::Index(_), Value::Null) => Ok(Value::Null),
            (PathSegment::Slice { start, end }, Value::Array(a)) => {
                let (s, e) = slice_bounds(*start, *end, a.len());
                let mut a2 = a.clone();
                a2.drain(s..e);
                Ok(Value::Array(a2))
            }
            (PathSegment::Slice { .. }, Value::Null) => Ok(Value::Null),
            (_, other) => Err(RuntimeError::type_(
                format!("cannot delete from {}", other.type_name()),
                span,
            )),
        },
        span,
    )
}

/// Deletes every path in `paths` from `value` in one pass. Sorting
/// descending first means sibling deletions within the same array are
/// always applied from the highest index down, so removing one never
/// shifts the position of another still waiting to be removed.
pub fn delete_paths(
    value: &Value,
    mut paths: Vec<Path>,
    span: Span,
) -> Result<Value, RuntimeError> {
    paths.sort();
    paths.dedup();
    paths.reverse();
    let mut result = value.clone();
    for path in paths {
        result = delete_single(&result, &path, span)?;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filterql_util::Span;

    fn arr(v: Vec<Value>) -> Value {
        Value::Array(v)
    }
    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    #[test]
    fn get_missing_key_is_null() {
        let v = Value::Object(BTreeMap::new());
        assert_eq!(
            get_path(&v, &[PathSegment::Key("a".to_string())]),
            Value::Null
        );
    }

    #[test]
    fn update_creates_intermediate_object() {
        let v = Value::Null;
        let result = update_path(
            &v,
            &[PathSegment::Key("a".to_string()), PathSegment::Key("b".to_string())],
            &mut |_| Ok(num(1.0)),
            Span::DUMMY,
        )
        .unwrap();
        let Value::Object(m) = result else { panic!() };
        assert_eq!(m.get("a"), Some(&Value::Object(BTreeMap::from([("b".to_string(), num(1.0))]))));
    }

    #[test]
    fn update_pads_array_on_positive_oob_write() {
        let v = arr(vec![num(1.0)]);
        let result = update_path(&v, &[PathSegment::Index(3)], &mut |_| Ok(num(9.0)), Span::DUMMY).unwrap();
        assert_eq!(result, arr(vec![num(1.0), Value::Null, Value::Null, num(9.0)]));
    }

    #[test]
    fn update_negative_oob_write_faults() {
        let v = arr(vec![num(1.0)]);
        assert!(update_path(&v, &[PathSegment::Index(-5)], &mut |_| Ok(num(9.0)), Span::DUMMY).is_err());
    }

    #[test]
    fn delete_paths_handles_sibling_array_indices() {
        let v = arr(vec![num(0.0), num(1.0), num(2.0), num(3.0)]);
        let result = delete_paths(
            &v,
            vec![vec![PathSegment::Index(1)], vec![PathSegment::Index(3)]],
            Span::DUMMY,
        )
        .unwrap();
        assert_eq!(result, arr(vec![num(0.0), num(2.0)]));
    }
}
