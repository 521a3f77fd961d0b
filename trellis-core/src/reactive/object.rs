//! Observable Records
//!
//! Turns a plain keyed record (a JSON object) into a tree of observable
//! cells, one per field. Reads and writes go through accessor methods that
//! report to the runtime, so a derivation reading `record.get("count")`
//! re-runs when, and only when, that field changes.
//!
//! - Nested objects become nested records.
//! - Arrays and scalars are stored as they are, compared by value.
//! - Adding or deleting a field changes the record's shape. Readers of the
//!   shape (`keys`, `len`, `contains_key`, `to_json`, or a read of a
//!   missing field) are notified through a structural atom.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ReactiveError;

use super::atom::Atom;
use super::batch::Batch;
use super::observable::Observable;
use super::runtime::Runtime;

/// The value held by one field of an [`ObservableObject`].
#[derive(Clone)]
pub enum FieldValue {
    /// A scalar or array, compared by value.
    Value(Value),

    /// A nested record, compared by identity.
    Object(ObservableObject),
}

impl FieldValue {
    fn wrap(name: String, value: Value) -> Self {
        match value {
            Value::Object(map) => FieldValue::Object(ObservableObject::named(name, map)),
            other => FieldValue::Value(other),
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Value(value) => Some(value),
            FieldValue::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObservableObject> {
        match self {
            FieldValue::Value(_) => None,
            FieldValue::Object(object) => Some(object),
        }
    }

    /// Snapshot as plain JSON. Nested records are read recursively.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Value(value) => value.clone(),
            FieldValue::Object(object) => object.to_json(),
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Value(a), FieldValue::Value(b)) => a == b,
            (FieldValue::Object(a), FieldValue::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Value(value) => write!(f, "{value}"),
            FieldValue::Object(object) => fmt::Debug::fmt(object, f),
        }
    }
}

struct ObjectInner {
    /// Reports reads and changes of the set of keys.
    atom: Atom,
    fields: RefCell<IndexMap<String, Observable<FieldValue>>>,
}

/// A keyed record whose fields are observable cells.
///
/// Cloning the handle shares the record.
///
/// # Example
///
/// ```rust,ignore
/// let state = observable_named("state", json!({ "count": 0 }))
///     .into_object()
///     .unwrap();
///
/// let s = state.clone();
/// let disposer = autorun(move || println!("count = {}", s.get_value("count").unwrap()));
///
/// state.set("count", 1);  // prints "count = 1"
/// ```
#[derive(Clone)]
pub struct ObservableObject {
    inner: Rc<ObjectInner>,
}

impl ObservableObject {
    /// Wrap a record with a generated name.
    pub fn new(fields: impl Into<Map<String, Value>>) -> Self {
        let atom = Atom::unnamed("ObservableObject");
        Self::from_atom(atom, fields.into())
    }

    /// Wrap a record. Fields are named `<name>.<key>`.
    pub fn named(name: impl Into<String>, fields: impl Into<Map<String, Value>>) -> Self {
        Self::from_atom(Atom::new(name), fields.into())
    }

    fn from_atom(atom: Atom, fields: Map<String, Value>) -> Self {
        let cells = fields
            .into_iter()
            .map(|(key, value)| {
                let cell = Self::make_cell(atom.name(), &key, value);
                (key, cell)
            })
            .collect();
        Self {
            inner: Rc::new(ObjectInner {
                atom,
                fields: RefCell::new(cells),
            }),
        }
    }

    fn make_cell(record: &str, key: &str, value: Value) -> Observable<FieldValue> {
        let name = format!("{record}.{key}");
        let value = FieldValue::wrap(name.clone(), value);
        Observable::named(name, value)
    }

    fn cell(&self, key: &str) -> Option<Observable<FieldValue>> {
        self.inner.fields.borrow().get(key).cloned()
    }

    pub fn name(&self) -> &str {
        self.inner.atom.name()
    }

    /// Read a field.
    ///
    /// A missing field records a read of the record's shape, so the reader
    /// re-runs when the field is added.
    pub fn get(&self, key: &str) -> Option<FieldValue> {
        match self.cell(key) {
            Some(cell) => Some(cell.get()),
            None => {
                self.inner.atom.report_observed();
                None
            }
        }
    }

    /// Read a field as plain JSON.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.get(key).map(|field| field.to_json())
    }

    /// Read a field and decode it. A missing field decodes from `null`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, ReactiveError> {
        let value = self.get_value(key).unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| ReactiveError::Decode {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// Read a nested record.
    pub fn object(&self, key: &str) -> Option<ObservableObject> {
        self.get(key).and_then(|field| field.as_object().cloned())
    }

    /// Write a field. Objects are wrapped as nested records.
    ///
    /// Writing a new key adds a field and changes the record's shape.
    /// Returns whether anything changed.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> bool {
        let name = format!("{}.{key}", self.name());
        self.set_field(key, FieldValue::wrap(name, value.into()))
    }

    /// Store an existing record as a field.
    pub fn set_object(&self, key: &str, object: ObservableObject) -> bool {
        self.set_field(key, FieldValue::Object(object))
    }

    fn set_field(&self, key: &str, value: FieldValue) -> bool {
        if let Some(cell) = self.cell(key) {
            return cell.set(value);
        }
        let name = format!("{}.{key}", self.name());
        Runtime::check_state_change(&name);
        self.inner
            .fields
            .borrow_mut()
            .insert(key.to_string(), Observable::named(name, value));
        self.inner.atom.report_changed();
        true
    }

    /// Replace a field with a function of its current JSON value.
    ///
    /// The current value is read without recording a dependency; a missing
    /// field is passed as `null`.
    pub fn update(&self, key: &str, f: impl FnOnce(Value) -> Value) -> bool {
        let current = self
            .cell(key)
            .map(|cell| cell.get_untracked())
            .map_or(Value::Null, |field| match field {
                FieldValue::Value(value) => value,
                FieldValue::Object(object) => object.to_json_untracked(),
            });
        self.set(key, f(current))
    }

    /// Remove a field. Readers of the field and of the shape are notified
    /// together. Returns `false` if the key was absent.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.inner.fields.borrow_mut().shift_remove(key);
        let Some(cell) = removed else {
            return false;
        };
        Runtime::check_state_change(cell.name());
        {
            let _batch = Batch::start();
            cell.atom().report_changed();
            self.inner.atom.report_changed();
        }
        // Dropped after the flush, so rerun readers do not see it.
        drop(cell);
        true
    }

    /// Keys in insertion order. Records a read of the shape.
    pub fn keys(&self) -> Vec<String> {
        self.inner.atom.report_observed();
        self.inner.fields.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.atom.report_observed();
        self.inner.fields.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.atom.report_observed();
        self.inner.fields.borrow().contains_key(key)
    }

    /// Snapshot of the whole tree as plain JSON, reading every field.
    pub fn to_json(&self) -> Value {
        self.inner.atom.report_observed();
        let cells: Vec<(String, Observable<FieldValue>)> = self
            .inner
            .fields
            .borrow()
            .iter()
            .map(|(key, cell)| (key.clone(), cell.clone()))
            .collect();
        let map = cells
            .into_iter()
            .map(|(key, cell)| (key, cell.get().to_json()))
            .collect();
        Value::Object(map)
    }

    fn to_json_untracked(&self) -> Value {
        super::context::untracked(|| self.to_json())
    }

    /// Number of derivations reading the shape of this record.
    pub fn observer_count(&self) -> usize {
        self.inner.atom.observer_count()
    }

    /// Number of derivations reading `key`.
    pub fn field_observer_count(&self, key: &str) -> usize {
        self.cell(key).map_or(0, |cell| cell.observer_count())
    }

    /// Whether both handles share the same record.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ObservableObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self.inner.fields.borrow();
        let mut map = f.debug_map();
        for (key, cell) in fields.iter() {
            map.entry(key, &cell.get_untracked());
        }
        map.finish()
    }
}

/// What [`observable`] made of a value.
#[derive(Debug, Clone)]
pub enum ObservableHandle {
    /// A scalar wrapped as one cell.
    Cell(Observable<Value>),

    /// A record wrapped as one cell per field.
    Object(ObservableObject),

    /// An array, returned as it was.
    Passthrough(Value),
}

impl ObservableHandle {
    pub fn as_cell(&self) -> Option<&Observable<Value>> {
        match self {
            ObservableHandle::Cell(cell) => Some(cell),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObservableObject> {
        match self {
            ObservableHandle::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn into_cell(self) -> Option<Observable<Value>> {
        match self {
            ObservableHandle::Cell(cell) => Some(cell),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<ObservableObject> {
        match self {
            ObservableHandle::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, ObservableHandle::Passthrough(_))
    }

    /// Current value as plain JSON, recording a read.
    pub fn to_json(&self) -> Value {
        match self {
            ObservableHandle::Cell(cell) => cell.get(),
            ObservableHandle::Object(object) => object.to_json(),
            ObservableHandle::Passthrough(value) => value.clone(),
        }
    }
}

/// Make a value observable.
///
/// Records become [`ObservableObject`]s, arrays are passed through, and
/// everything else becomes an [`Observable`] cell.
pub fn observable(value: impl Into<Value>) -> ObservableHandle {
    match value.into() {
        Value::Array(items) => ObservableHandle::Passthrough(Value::Array(items)),
        Value::Object(map) => ObservableHandle::Object(ObservableObject::new(map)),
        scalar => ObservableHandle::Cell(Observable::new(scalar)),
    }
}

/// Like [`observable`], with a debug name.
pub fn observable_named(name: impl Into<String>, value: impl Into<Value>) -> ObservableHandle {
    match value.into() {
        Value::Array(items) => ObservableHandle::Passthrough(Value::Array(items)),
        Value::Object(map) => ObservableHandle::Object(ObservableObject::named(name, map)),
        scalar => ObservableHandle::Cell(Observable::named(name, scalar)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{autorun, run_in_action};
    use serde_json::json;
    use std::cell::Cell;

    fn record(value: Value) -> ObservableObject {
        observable_named("state", value)
            .into_object()
            .expect("records wrap as objects")
    }

    #[test]
    fn observable_dispatches_on_shape() {
        assert!(observable(json!([1, 2])).is_passthrough());
        assert!(observable(json!(3)).as_cell().is_some());
        assert!(observable(json!("text")).as_cell().is_some());
        assert!(observable(json!({ "a": 1 })).as_object().is_some());
    }

    #[test]
    fn fields_are_named_after_the_record() {
        let state = record(json!({ "count": 0, "nested": { "flag": true } }));
        let nested = state.object("nested").unwrap();

        assert_eq!(state.name(), "state");
        assert_eq!(nested.name(), "state.nested");
        assert_eq!(state.keys(), vec!["count", "nested"]);
    }

    #[test]
    fn reads_and_writes_are_observed_per_field() {
        let state = record(json!({ "count": 0, "label": "x" }));
        let log = Rc::new(RefCell::new(Vec::new()));

        let (s, l) = (state.clone(), log.clone());
        let disposer = autorun(move || l.borrow_mut().push(s.get_as::<i64>("count").unwrap()));

        state.set("count", 1);
        state.set("count", 1);
        state.set("label", "y");
        state.set("count", 2);

        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert_eq!(state.field_observer_count("count"), 1);
        assert_eq!(state.field_observer_count("label"), 0);
        disposer.dispose();
    }

    #[test]
    fn adding_a_field_notifies_readers_of_the_missing_key() {
        let state = record(json!({}));
        let seen = Rc::new(RefCell::new(Vec::new()));

        let (s, log) = (state.clone(), seen.clone());
        let disposer = autorun(move || log.borrow_mut().push(s.get_value("late")));

        assert!(state.set("late", "here"));
        assert_eq!(*seen.borrow(), vec![None, Some(json!("here"))]);
        disposer.dispose();
    }

    #[test]
    fn delete_notifies_field_and_shape_readers_once() {
        let state = record(json!({ "a": 1, "b": 2 }));
        let runs = Rc::new(Cell::new(0));

        let (s, r) = (state.clone(), runs.clone());
        let disposer = autorun(move || {
            s.get("a");
            s.len();
            r.set(r.get() + 1);
        });

        assert!(state.delete("a"));
        assert!(!state.delete("a"));
        assert_eq!(runs.get(), 2);
        assert_eq!(state.keys(), vec!["b"]);
        disposer.dispose();
    }

    #[test]
    fn to_json_snapshots_the_tree() {
        let source = json!({ "count": 1, "tags": ["a", "b"], "inner": { "ok": true } });
        let state = record(source.clone());
        assert_eq!(state.to_json(), source);

        state.object("inner").unwrap().set("ok", false);
        assert_eq!(state.to_json()["inner"]["ok"], json!(false));
    }

    #[test]
    fn nested_records_compare_by_identity() {
        let state = record(json!({ "inner": { "v": 1 } }));
        let inner = state.object("inner").unwrap();

        assert!(!state.set_object("inner", inner.clone()));
        assert!(state.set("inner", json!({ "v": 1 })));
        assert!(!state.object("inner").unwrap().ptr_eq(&inner));
    }

    #[test]
    fn decode_errors_name_the_key() {
        let state = record(json!({ "count": "many" }));
        let err = state.get_as::<u32>("count").unwrap_err();
        assert!(matches!(err, ReactiveError::Decode { ref key, .. } if key == "count"));
        assert_eq!(state.get_as::<Option<u32>>("missing"), Ok(None));
    }

    #[test]
    fn action_increments_are_atomic() {
        let state = record(json!({ "count": 0 }));
        let log = Rc::new(RefCell::new(Vec::new()));

        let (s, l) = (state.clone(), log.clone());
        let disposer = autorun(move || l.borrow_mut().push(s.get_value("count").unwrap()));

        run_in_action(|| {
            state.update("count", |v| json!(v.as_i64().unwrap_or(0) + 1));
            state.update("count", |v| json!(v.as_i64().unwrap_or(0) + 1));
        });

        assert_eq!(*log.borrow(), vec![json!(0), json!(2)]);
        disposer.dispose();
    }
}
