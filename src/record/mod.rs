//! Change-tracking records
//!
//! A record holds one [`PropertyValue`] per declared property plus a saved
//! snapshot taken at the last successful write or load. `diff()` reports
//! exactly the properties that differ from that snapshot, and the mapper
//! calls `mark_saved()` once per successful write.
//!
//! Lifecycle: `new → saved(loaded) → mutated → saved → deleted`, or
//! `preloaded(identity set, not loaded) → saved` through an upsert.

pub mod schema;
pub mod transform;

pub use schema::{schema_for, PropertyDef, RecordType, Schema, SchemaBuilder};
pub use transform::Transform;

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;

use crate::value::Value;
use crate::value_type::{Counter, PropertyValue, Snapshot, UniqueSet};
use crate::{Error, Result};

/// One changed property, as reported by `diff()`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub from: Snapshot,
    pub to: Snapshot,
}

/// Changed properties keyed by name
pub type ChangeSet = BTreeMap<String, Change>;

/// Property values, saved snapshot and lifecycle flags of one record
#[derive(Debug, Clone)]
pub struct RecordState {
    schema: Arc<Schema>,
    values: Vec<PropertyValue>,
    saved: Vec<PropertyValue>,
    loaded: bool,
    deleted: bool,
}

impl RecordState {
    pub fn new(schema: Arc<Schema>) -> Self {
        let values = schema.defaults();
        let saved = values.clone();
        Self {
            schema,
            values,
            saved,
            loaded: false,
            deleted: false,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn values(&self) -> &[PropertyValue] {
        &self.values
    }

    fn index(&self, name: &str) -> Result<usize> {
        self.schema
            .index_of(name)
            .ok_or_else(|| Error::UnknownProperty(format!("{}.{}", self.schema.table(), name)))
    }

    pub fn get(&self, name: &str) -> Result<&PropertyValue> {
        Ok(&self.values[self.index(name)?])
    }

    /// Assign a property through its transform pipeline.
    ///
    /// Counters accept an integer and become a fixed value; sets must be
    /// replaced through [`RecordState::unique_set_mut`].
    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        let i = self.index(name)?;
        let def = &self.schema.properties()[i];
        match &mut self.values[i] {
            PropertyValue::Scalar(slot) => {
                *slot = transform::apply_steps(&def.name, &def.transforms, value)?;
            }
            PropertyValue::Counter(counter) => {
                let n = value.as_i64().ok_or_else(|| Error::Validation {
                    property: def.name.clone(),
                    reason: format!("counter cannot hold {}", value.type_name()),
                })?;
                counter.set_value(n);
            }
            PropertyValue::Set(_) => {
                return Err(Error::Validation {
                    property: def.name.clone(),
                    reason: "set properties are replaced with set_value on the set".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn counter_mut(&mut self, name: &str) -> Result<&mut Counter> {
        let i = self.index(name)?;
        match &mut self.values[i] {
            PropertyValue::Counter(c) => Ok(c),
            other => Err(Error::InvalidState(format!(
                "property '{}' is a {} property, not a counter",
                name,
                other.kind().as_str()
            ))),
        }
    }

    pub fn unique_set_mut(&mut self, name: &str) -> Result<&mut UniqueSet> {
        let i = self.index(name)?;
        match &mut self.values[i] {
            PropertyValue::Set(s) => Ok(s),
            other => Err(Error::InvalidState(format!(
                "property '{}' is a {} property, not a set",
                name,
                other.kind().as_str()
            ))),
        }
    }

    /// Whether the property at `index` differs from its saved snapshot
    pub fn is_changed(&self, index: usize) -> bool {
        self.values[index].has_changed_from(&self.saved[index])
    }

    pub fn diff(&self) -> ChangeSet {
        self.schema
            .properties()
            .iter()
            .enumerate()
            .filter(|(i, _)| self.is_changed(*i))
            .map(|(i, def)| {
                let change = Change {
                    from: self.saved[i].calculated_snapshot(),
                    to: self.values[i].calculated_snapshot(),
                };
                (def.name.clone(), change)
            })
            .collect()
    }

    /// Commit every pending change and take a new snapshot
    pub fn mark_saved(&mut self) {
        for value in &mut self.values {
            value.commit();
        }
        self.saved = self.values.clone();
    }

    /// Replace every value with raw store values, then mark loaded and saved
    pub(crate) fn hydrate(&mut self, values: Vec<PropertyValue>) {
        debug_assert_eq!(values.len(), self.schema.len());
        self.values = values;
        self.mark_saved();
        self.loaded = true;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub(crate) fn set_loaded(&mut self, loaded: bool) {
        self.loaded = loaded;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.deleted = true;
        self.loaded = false;
    }

    fn scalar_at(values: &[PropertyValue], index: usize) -> Value {
        match &values[index] {
            PropertyValue::Scalar(v) => v.clone(),
            _ => Value::Null,
        }
    }

    /// Current identity values, in identity declaration order
    pub fn identity(&self) -> Vec<(String, Value)> {
        self.identity_from(&self.values)
    }

    /// Identity values as of the last load or save
    pub fn saved_identity(&self) -> Vec<(String, Value)> {
        self.identity_from(&self.saved)
    }

    fn identity_from(&self, values: &[PropertyValue]) -> Vec<(String, Value)> {
        self.schema
            .identity_indexes()
            .iter()
            .map(|i| (self.schema.properties()[*i].name.clone(), Self::scalar_at(values, *i)))
            .collect()
    }

    /// Whether every identity property holds a value
    pub fn has_identity(&self) -> bool {
        self.schema
            .identity_indexes()
            .iter()
            .all(|i| !Self::scalar_at(&self.values, *i).is_null())
    }

    pub fn identity_changed(&self) -> bool {
        self.schema.identity_indexes().iter().any(|i| self.is_changed(*i))
    }

    /// Write a store-generated identity into the (single) identity property
    pub(crate) fn assign_generated_identity(&mut self, id: i64) {
        if let Some(i) = self.schema.identity_indexes().first() {
            self.values[*i] = PropertyValue::Scalar(Value::Integer(id));
        }
    }
}

/// Anything the persistence mapper can save, load and delete.
///
/// Implementors only expose their [`RecordState`]; every tracking operation
/// is provided.
pub trait Record {
    fn state(&self) -> &RecordState;
    fn state_mut(&mut self) -> &mut RecordState;

    fn schema(&self) -> &Schema {
        self.state().schema()
    }

    fn get(&self, name: &str) -> Result<&PropertyValue> {
        self.state().get(name)
    }

    /// Scalar or counter value; counters report their calculated value
    fn value(&self, name: &str) -> Result<Value> {
        match self.get(name)? {
            PropertyValue::Scalar(v) => Ok(v.clone()),
            PropertyValue::Counter(c) => Ok(Value::Integer(c.calculated())),
            PropertyValue::Set(_) => Err(Error::InvalidState(format!(
                "property '{}' is a set; use items()",
                name
            ))),
        }
    }

    /// Calculated elements of a set property
    fn items(&self, name: &str) -> Result<Vec<Value>> {
        match self.get(name)? {
            PropertyValue::Set(s) => Ok(s.calculated()),
            other => Err(Error::InvalidState(format!(
                "property '{}' is a {} property, not a set",
                name,
                other.kind().as_str()
            ))),
        }
    }

    fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()>
    where
        Self: Sized,
    {
        self.state_mut().set(name, value.into())
    }

    fn counter_mut(&mut self, name: &str) -> Result<&mut Counter> {
        self.state_mut().counter_mut(name)
    }

    fn unique_set_mut(&mut self, name: &str) -> Result<&mut UniqueSet> {
        self.state_mut().unique_set_mut(name)
    }

    fn diff(&self) -> ChangeSet {
        self.state().diff()
    }

    fn mark_saved(&mut self) {
        self.state_mut().mark_saved()
    }

    fn is_loaded(&self) -> bool {
        self.state().is_loaded()
    }

    fn is_deleted(&self) -> bool {
        self.state().is_deleted()
    }

    fn has_identity(&self) -> bool {
        self.state().has_identity()
    }

    fn identity(&self) -> Vec<(String, Value)> {
        self.state().identity()
    }

    fn saved_identity(&self) -> Vec<(String, Value)> {
        self.state().saved_identity()
    }

    fn identity_changed(&self) -> bool {
        self.state().identity_changed()
    }
}

/// The stock record: a [`RecordState`] typed by its [`RecordType`]
pub struct Dao<T: RecordType> {
    state: RecordState,
    _type: PhantomData<fn() -> T>,
}

impl<T: RecordType> Dao<T> {
    /// New record holding every declared default
    pub fn new() -> Result<Self> {
        Ok(Self {
            state: RecordState::new(schema_for::<T>()?),
            _type: PhantomData,
        })
    }

    /// New record with its identity assigned by the caller.
    ///
    /// Saving it goes through the upsert path since the row may or may not
    /// already exist.
    pub fn with_identity(identity: &[(&str, Value)]) -> Result<Self> {
        let mut dao = Self::new()?;
        for (name, value) in identity {
            dao.state.set(name, value.clone())?;
        }
        Ok(dao)
    }
}

impl<T: RecordType> Record for Dao<T> {
    fn state(&self) -> &RecordState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut RecordState {
        &mut self.state
    }
}

impl<T: RecordType> Clone for Dao<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            _type: PhantomData,
        }
    }
}

impl<T: RecordType> fmt::Debug for Dao<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dao")
            .field("table", &self.state.schema().table())
            .field("values", &self.state.values())
            .field("loaded", &self.state.is_loaded())
            .finish()
    }
}
