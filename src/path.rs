//! Binding paths.
//!
//! A binding path addresses a value inside the store: `user.profile.name`,
//! `todos[2].done` and `todos.2.done` all parse to a sequence of key and index
//! segments. Registries are keyed by the canonical string form, so two spellings
//! of the same path always hit the same handlers.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::error::{kind_of, BindingError};

lazy_static! {
    static ref SEGMENT_RE: Regex = Regex::new(r"[^.\[\]]+").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    fn as_key(&self) -> String {
        match self {
            Segment::Key(k) => k.clone(),
            Segment::Index(i) => i.to_string(),
        }
    }
}

/// Split a raw path on `.`, `[` and `]`, dropping empty segments.
/// Purely numeric segments become indexes.
pub fn segments(path: &str) -> Vec<Segment> {
    SEGMENT_RE
        .find_iter(path)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.bytes().all(|b| b.is_ascii_digit()) {
                match s.parse::<usize>() {
                    Ok(i) => Segment::Index(i),
                    Err(_) => Segment::Key(s.to_string()),
                }
            } else {
                Segment::Key(s.to_string())
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BindingPath {
    segments: Vec<Segment>,
}

impl BindingPath {
    /// Parse a path that must address something. Empty and whitespace-only input is
    /// rejected.
    pub fn parse(path: &str) -> Result<Self, BindingError> {
        let segments = segments(path);
        if segments.is_empty() {
            return Err(BindingError::MalformedPath {
                path: path.to_string(),
            });
        }
        Ok(Self { segments })
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// First segment as a store key.
    pub fn hook(&self) -> Option<String> {
        self.segments.first().map(Segment::as_key)
    }

    /// Everything after the hook.
    pub fn tether(&self) -> BindingPath {
        Self {
            segments: self.segments.iter().skip(1).cloned().collect(),
        }
    }

    /// The path with its last segment stripped, or `None` at the hook.
    pub fn parent(&self) -> Option<BindingPath> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Parent, grandparent, ... up to and including the hook.
    pub fn ancestors(&self) -> impl Iterator<Item = BindingPath> + '_ {
        (1..self.segments.len()).rev().map(move |len| Self {
            segments: self.segments[..len].to_vec(),
        })
    }

    pub fn join(&self, other: &BindingPath) -> BindingPath {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    pub fn child_key(&self, key: &str) -> BindingPath {
        let mut segments = self.segments.clone();
        segments.push(Segment::Key(key.to_string()));
        Self { segments }
    }

    pub fn child_index(&self, index: usize) -> BindingPath {
        let mut segments = self.segments.clone();
        segments.push(Segment::Index(index));
        Self { segments }
    }

    fn prefix(&self, len: usize) -> BindingPath {
        Self {
            segments: self.segments[..len].to_vec(),
        }
    }
}

impl fmt::Display for BindingPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(k) if i == 0 => write!(f, "{}", k)?,
                Segment::Key(k) => write!(f, ".{}", k)?,
                Segment::Index(n) => write!(f, "[{}]", n)?,
            }
        }
        Ok(())
    }
}

impl Serialize for BindingPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BindingPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        BindingPath::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TREE ACCESS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn lookup<'a>(root: &'a Value, path: &BindingPath) -> Option<&'a Value> {
    let mut current = root;
    for segment in &path.segments {
        current = match (current, segment) {
            (Value::Object(map), segment) => map.get(&segment.as_key())?,
            (Value::Array(items), Segment::Index(i)) => items.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

pub fn lookup_mut<'a>(root: &'a mut Value, path: &BindingPath) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in &path.segments {
        current = match (current, segment) {
            (Value::Object(map), segment) => map.get_mut(&segment.as_key())?,
            (Value::Array(items), Segment::Index(i)) => items.get_mut(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Value at `path`, or a clone of `default` when any step is missing.
pub fn get(root: &Value, path: &BindingPath, default: &Value) -> Value {
    lookup(root, path).cloned().unwrap_or_else(|| default.clone())
}

/// Write `value` at `path`, creating intermediate objects and arrays as needed.
/// Returns the value previously stored there (`null` when the slot was new).
pub fn set(root: &mut Value, path: &BindingPath, value: Value) -> Result<Value, BindingError> {
    if path.is_empty() {
        return Err(BindingError::MalformedPath {
            path: String::new(),
        });
    }
    check_gaps(root, path)?;
    let mut current = root;
    for (i, segment) in path.segments.iter().enumerate() {
        current = child_slot(current, segment).map_err(|found| BindingError::TypeAssertion {
            path: path.prefix(i).to_string(),
            found,
        })?;
    }
    Ok(std::mem::replace(current, value))
}

/// How far past the end of an array a write may land. The gap is padded with `null`.
pub const MAX_INDEX_GAP: usize = 1024;

/// Pad `items` with `null` until `index` is a valid slot. Returns the current length
/// as the error when the gap is wider than [`MAX_INDEX_GAP`].
pub(crate) fn pad_to(items: &mut Vec<Value>, index: usize) -> Result<(), usize> {
    let len = items.len();
    if index < len {
        return Ok(());
    }
    if index - len >= MAX_INDEX_GAP {
        return Err(len);
    }
    items.resize(index + 1, Value::Null);
    Ok(())
}

/// Reject a write whose padding would exceed [`MAX_INDEX_GAP`] before anything is
/// vivified. Arrays that do not exist yet count as empty.
fn check_gaps(root: &Value, path: &BindingPath) -> Result<(), BindingError> {
    let mut current = Some(root);
    for (i, segment) in path.segments.iter().enumerate() {
        if let Segment::Index(index) = segment {
            let len = match current {
                Some(Value::Array(items)) => items.len(),
                _ => 0,
            };
            if *index >= len && index - len >= MAX_INDEX_GAP {
                return Err(BindingError::IndexOutOfRange {
                    path: path.prefix(i).to_string(),
                    index: *index,
                    len,
                });
            }
        }
        current = match (current, segment) {
            (Some(Value::Object(map)), segment) => map.get(&segment.as_key()),
            (Some(Value::Array(items)), Segment::Index(i)) => items.get(*i),
            _ => None,
        };
    }
    Ok(())
}

/// Remove the value at `path`. Array slots are nulled rather than spliced so the
/// indexes of their siblings stay stable.
pub fn remove(root: &mut Value, path: &BindingPath) -> Option<Value> {
    let (last, init) = path.segments.split_last()?;
    let parent = lookup_mut(root, &BindingPath::from_segments(init.to_vec()))?;
    match (parent, last) {
        (Value::Object(map), segment) => map.shift_remove(&segment.as_key()),
        (Value::Array(items), Segment::Index(i)) => {
            items.get_mut(*i).map(|slot| std::mem::replace(slot, Value::Null))
        }
        _ => None,
    }
}

fn child_slot<'a>(current: &'a mut Value, segment: &Segment) -> Result<&'a mut Value, &'static str> {
    if current.is_null() {
        *current = match segment {
            Segment::Index(_) => Value::Array(Vec::new()),
            Segment::Key(_) => Value::Object(serde_json::Map::new()),
        };
    }
    match (current, segment) {
        (Value::Object(map), segment) => Ok(map.entry(segment.as_key()).or_insert(Value::Null)),
        (Value::Array(items), Segment::Index(i)) => {
            if items.len() <= *i {
                items.resize(*i + 1, Value::Null);
            }
            Ok(&mut items[*i])
        }
        (other, _) => Err(kind_of(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(s: &str) -> BindingPath {
        BindingPath::parse(s).unwrap()
    }

    #[test]
    fn test_parse_mixed_notation() {
        let path = p("todos[2].title");
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("todos".to_string()),
                Segment::Index(2),
                Segment::Key("title".to_string()),
            ]
        );
        assert_eq!(path, p("todos.2.title"));
        assert_eq!(path.to_string(), "todos[2].title");
        assert_eq!(p("a..b[]").to_string(), "a.b");
    }

    #[test]
    fn test_parse_rejects_blank() {
        assert!(matches!(
            BindingPath::parse("   "),
            Err(BindingError::MalformedPath { .. })
        ));
        assert!(BindingPath::parse("").is_err());
        assert!(segments("").is_empty());
    }

    #[test]
    fn test_hook_and_tether() {
        let path = p("user.profile.name");
        assert_eq!(path.hook().as_deref(), Some("user"));
        assert_eq!(path.tether().to_string(), "profile.name");
        let ancestors: Vec<String> = path.ancestors().map(|a| a.to_string()).collect();
        assert_eq!(ancestors, vec!["user.profile", "user"]);
        assert_eq!(p("user").parent(), None);
    }

    #[test]
    fn test_get_returns_default_for_missing() {
        let root = json!({ "user": { "name": "Ada" }, "list": [1, 2] });
        let default = json!("");
        assert_eq!(get(&root, &p("user.name"), &default), json!("Ada"));
        assert_eq!(get(&root, &p("user.email"), &default), json!(""));
        assert_eq!(get(&root, &p("list[1]"), &default), json!(2));
        assert_eq!(get(&root, &p("list[9]"), &default), json!(""));
        assert_eq!(get(&root, &p("user.name.first"), &default), json!(""));
    }

    #[test]
    fn test_set_vivifies_containers() {
        let mut root = json!({});
        set(&mut root, &p("a.b[1].c"), json!(true)).unwrap();
        assert_eq!(root, json!({ "a": { "b": [null, { "c": true }] } }));

        let previous = set(&mut root, &p("a.b[1].c"), json!(false)).unwrap();
        assert_eq!(previous, json!(true));
    }

    #[test]
    fn test_set_rejects_far_index_without_vivifying() {
        let mut root = json!({ "list": [1] });
        let err = set(&mut root, &p("list[18446744073709551615]"), json!(1)).unwrap_err();
        assert_eq!(err.code(), "Z-BIND-PATH-003");
        let err = set(&mut root, &p("fresh.rows[5000].name"), json!("x")).unwrap_err();
        assert_eq!(
            err,
            BindingError::IndexOutOfRange {
                path: "fresh.rows".to_string(),
                index: 5000,
                len: 0,
            }
        );
        assert_eq!(root, json!({ "list": [1] }));

        set(&mut root, &p("list[1024]"), json!(2)).unwrap();
        assert_eq!(root["list"].as_array().map(Vec::len), Some(1025));
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut root = json!({ "count": 3 });
        let err = set(&mut root, &p("count.value"), json!(1)).unwrap_err();
        assert_eq!(
            err,
            BindingError::TypeAssertion {
                path: "count".to_string(),
                found: "number",
            }
        );
        assert_eq!(root, json!({ "count": 3 }));
    }

    #[test]
    fn test_remove() {
        let mut root = json!({ "a": { "x": 1, "y": 2 }, "l": [1, 2, 3] });
        assert_eq!(remove(&mut root, &p("a.x")), Some(json!(1)));
        assert_eq!(remove(&mut root, &p("l[1]")), Some(json!(2)));
        assert_eq!(root, json!({ "a": { "y": 2 }, "l": [1, null, 3] }));
        assert_eq!(remove(&mut root, &p("missing.key")), None);
    }
}
