//! The data store.
//!
//! Every mutation returns the list of paths it changed. The store itself never
//! notifies anyone; the engine feeds the returned paths to the binding registry so
//! that only handlers registered at those exact paths re-run.

use serde_json::{Map, Value};

use crate::config::ChangePolicy;
use crate::error::{kind_of, BindingError};
use crate::path::{self, BindingPath};

#[derive(Debug, Clone)]
pub struct Store {
    data: Value,
    default: Value,
    policy: ChangePolicy,
}

impl Store {
    pub fn new(default: Value, policy: ChangePolicy) -> Self {
        Self {
            data: Value::Object(Map::new()),
            default,
            policy,
        }
    }

    /// Seed a store from a serialized snapshot. Anything but an object is
    /// rejected, since hooks are top-level keys.
    pub fn from_snapshot(
        data: Value,
        default: Value,
        policy: ChangePolicy,
    ) -> Result<Self, BindingError> {
        if !data.is_object() {
            return Err(BindingError::Payload {
                reason: format!("store snapshot must be an object, found {}", kind_of(&data)),
            });
        }
        Ok(Self {
            data,
            default,
            policy,
        })
    }

    pub fn snapshot(&self) -> &Value {
        &self.data
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    pub fn get(&self, path: &BindingPath) -> Value {
        path::get(&self.data, path, &self.default)
    }

    pub fn lookup(&self, path: &BindingPath) -> Option<&Value> {
        path::lookup(&self.data, path)
    }

    pub fn set(&mut self, path: &BindingPath, value: Value) -> Result<Vec<BindingPath>, BindingError> {
        let changed = match self.policy {
            ChangePolicy::Shallow => vec![path.clone()],
            ChangePolicy::DeepDiff => {
                let mut changed = Vec::new();
                diff_paths(path, self.lookup(path), &value, &mut changed);
                if changed.is_empty() {
                    return Ok(changed);
                }
                changed
            }
        };
        path::set(&mut self.data, path, value)?;
        Ok(changed)
    }

    /// Merge `partial` into the value at `path` one key at a time. Nested objects
    /// recurse; arrays and scalars replace. Keys that fail are skipped and reported
    /// alongside the paths that did change.
    pub fn update(&mut self, path: &BindingPath, partial: Value) -> (Vec<BindingPath>, Vec<BindingError>) {
        let mut changed = Vec::new();
        let mut errors = Vec::new();
        self.update_into(path, partial, &mut changed, &mut errors);
        (changed, errors)
    }

    fn update_into(
        &mut self,
        path: &BindingPath,
        partial: Value,
        changed: &mut Vec<BindingPath>,
        errors: &mut Vec<BindingError>,
    ) {
        match partial {
            Value::Object(fields) => {
                for (key, value) in fields {
                    let child = path.child_key(&key);
                    if value.is_object() {
                        self.update_into(&child, value, changed, errors);
                    } else {
                        match self.set(&child, value) {
                            Ok(paths) => changed.extend(paths),
                            Err(e) => errors.push(e),
                        }
                    }
                }
            }
            other => match self.set(path, other) {
                Ok(paths) => changed.extend(paths),
                Err(e) => errors.push(e),
            },
        }
    }

    pub fn push_many(
        &mut self,
        path: &BindingPath,
        values: Vec<Value>,
    ) -> Result<Vec<BindingPath>, BindingError> {
        let items = self.array_mut(path)?;
        items.extend(values);
        Ok(vec![path.clone()])
    }

    /// Replace the first element matching `query`, or append `value` when none does.
    pub fn set_in_array(
        &mut self,
        path: &BindingPath,
        query: &Value,
        value: Value,
    ) -> Result<Vec<BindingPath>, BindingError> {
        let items = self.array_mut(path)?;
        let index = match items.iter().position(|item| matches_query(item, query)) {
            Some(i) => {
                items[i] = value;
                i
            }
            None => {
                items.push(value);
                items.len() - 1
            }
        };
        Ok(vec![path.child_index(index)])
    }

    /// Remove the first element matching `query`. The whole array is reported as
    /// changed since every later index shifted.
    pub fn pull(&mut self, path: &BindingPath, query: &Value) -> Result<(Value, Vec<BindingPath>), BindingError> {
        let no_match = || BindingError::NoMatch {
            path: path.to_string(),
            query: query.to_string(),
        };
        let items = match path::lookup_mut(&mut self.data, path) {
            Some(Value::Array(items)) => items,
            Some(other) if *other != self.default && !other.is_null() => {
                return Err(BindingError::NotAnArray {
                    path: path.to_string(),
                    found: kind_of(other),
                })
            }
            _ => return Err(no_match()),
        };
        let index = items
            .iter()
            .position(|item| matches_query(item, query))
            .ok_or_else(no_match)?;
        let removed = items.remove(index);
        Ok((removed, vec![path.clone()]))
    }

    /// Index assignment on a tracked array.
    pub fn set_index(
        &mut self,
        path: &BindingPath,
        index: usize,
        value: Value,
    ) -> Result<Vec<BindingPath>, BindingError> {
        let items = self.array_mut(path)?;
        path::pad_to(items, index).map_err(|len| BindingError::IndexOutOfRange {
            path: path.to_string(),
            index,
            len,
        })?;
        items[index] = value;
        Ok(vec![path.child_index(index)])
    }

    /// Index deletion on a tracked array. Leaves a `null` hole.
    pub fn delete_index(&mut self, path: &BindingPath, index: usize) -> Result<Vec<BindingPath>, BindingError> {
        let items = self.array_mut(path)?;
        match items.get_mut(index) {
            Some(slot) => {
                *slot = Value::Null;
                Ok(vec![path.child_index(index)])
            }
            None => Ok(Vec::new()),
        }
    }

    pub fn remove(&mut self, path: &BindingPath) -> Option<Value> {
        path::remove(&mut self.data, path)
    }

    /// The array at `path`, initializing it when the slot is unset.
    fn array_mut(&mut self, path: &BindingPath) -> Result<&mut Vec<Value>, BindingError> {
        let uninitialized = match self.lookup(path) {
            None | Some(Value::Null) => true,
            Some(Value::Array(_)) => false,
            Some(v) if *v == self.default => true,
            Some(other) => {
                return Err(BindingError::NotAnArray {
                    path: path.to_string(),
                    found: kind_of(other),
                })
            }
        };
        if uninitialized {
            path::set(&mut self.data, path, Value::Array(Vec::new()))?;
        }
        match path::lookup_mut(&mut self.data, path) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(BindingError::NotAnArray {
                path: path.to_string(),
                found: "null",
            }),
        }
    }
}

/// An element matches when every field of `query` is present and equal. A
/// non-object query is compared against the whole element.
pub(crate) fn matches_query(item: &Value, query: &Value) -> bool {
    match (item, query) {
        (Value::Object(fields), Value::Object(wanted)) => {
            wanted.iter().all(|(k, v)| fields.get(k) == Some(v))
        }
        (item, query) => item == query,
    }
}

fn diff_paths(base: &BindingPath, old: Option<&Value>, new: &Value, out: &mut Vec<BindingPath>) {
    match (old, new) {
        (Some(old), new) if old == new => {}
        (Some(Value::Object(old)), Value::Object(new)) => {
            for (key, value) in new {
                diff_paths(&base.child_key(key), old.get(key), value, out);
            }
            for key in old.keys().filter(|k| !new.contains_key(*k)) {
                out.push(base.child_key(key));
            }
        }
        _ => out.push(base.clone()),
    }
}
