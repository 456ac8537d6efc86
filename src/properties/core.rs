use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use serde_json::Value;

use crate::error::{ControllerError, Result};

/// Comparator deciding whether a property assignment counts as a change.
pub type HasChanged = fn(new: &Value, old: &Value) -> bool;

/// Default comparator: any inequality is a change.
pub fn not_equal(new: &Value, old: &Value) -> bool {
    new != old
}

/// Property names changed since the last settled cycle, mapped to their
/// previous value. `None` means the property had no previous value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangedProperties {
    entries: BTreeMap<String, Option<Value>>,
}

impl ChangedProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// `Some(None)` for a first assignment, `None` when `name` did not change.
    pub fn previous(&self, name: &str) -> Option<Option<&Value>> {
        self.entries.get(name).map(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.entries
            .iter()
            .map(|(name, previous)| (name.as_str(), previous.as_ref()))
    }

    /// Record a change, keeping the oldest previous value seen this cycle.
    pub fn record(&mut self, name: impl Into<String>, previous: Option<Value>) {
        if let Entry::Vacant(vacant) = self.entries.entry(name.into()) {
            vacant.insert(previous);
        }
    }
}

impl<K: Into<String>> FromIterator<(K, Option<Value>)> for ChangedProperties {
    fn from_iter<I: IntoIterator<Item = (K, Option<Value>)>>(iter: I) -> Self {
        let mut changed = ChangedProperties::new();
        for (name, previous) in iter {
            changed.record(name, previous);
        }
        changed
    }
}

#[derive(Debug, Clone)]
struct PropertySlot {
    value: Value,
    has_changed: HasChanged,
}

/// Reactive properties owned by a host plus the pending change set.
#[derive(Debug, Clone, Default)]
pub struct PropertyStore {
    slots: BTreeMap<String, PropertySlot>,
    pending: ChangedProperties,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: impl Into<String>, initial: Value) {
        self.declare_with(name, initial, not_equal);
    }

    /// Declare (or redeclare) a property. The initial assignment is recorded
    /// as a change with no previous value.
    pub fn declare_with(&mut self, name: impl Into<String>, initial: Value, has_changed: HasChanged) {
        let name = name.into();
        self.slots.insert(
            name.clone(),
            PropertySlot {
                value: initial,
                has_changed,
            },
        );
        self.pending.record(name, None);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.slots.get(name).map(|slot| &slot.value)
    }

    /// Assign a value. Returns whether the assignment was a change.
    pub fn set(&mut self, name: &str, value: Value) -> Result<bool> {
        let slot = self
            .slots
            .get_mut(name)
            .ok_or_else(|| ControllerError::UnknownProperty(name.to_string()))?;
        if !(slot.has_changed)(&value, &slot.value) {
            return Ok(false);
        }
        let previous = std::mem::replace(&mut slot.value, value);
        self.pending.record(name, Some(previous));
        Ok(true)
    }

    pub fn take_changed(&mut self) -> ChangedProperties {
        std::mem::take(&mut self.pending)
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.slots
            .iter()
            .map(|(name, slot)| (name.clone(), slot.value.clone()))
            .collect()
    }
}
