//! Persistence mapper - save, load, delete and exists over a connection
//!
//! The save path is chosen from record state alone:
//! - no identity → INSERT of every property (store-generated identity is
//!   written back for auto-increment schemas)
//! - identity + loaded → UPDATE of the changed properties, keyed by the
//!   identity as last saved
//! - identity + not loaded → insert-or-overwrite (upsert)
//!
//! The record's snapshot is committed only after the store accepted the
//! write.

use crate::config::DaoConfig;
use crate::connection::{Driver, ResilientConnection, Row};
use crate::record::{ChangeSet, Record, Schema};
use crate::statement::{dialect_for, ColumnWrite, Dialect, WriteIntent};
use crate::value::Value;
use crate::value_type::{Counter, PropertyValue, UniqueSet};
use crate::{Error, Result};

/// Rows fetched by `load`; one more than expected exposes duplicates.
const LOAD_LIMIT: u32 = 2;

/// Which statement a save produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePath {
    Insert,
    Update,
    Upsert,
}

impl SavePath {
    pub fn as_str(&self) -> &'static str {
        match self {
            SavePath::Insert => "insert",
            SavePath::Update => "update",
            SavePath::Upsert => "upsert",
        }
    }

    /// Path a record in its current state would take
    pub fn for_record<R: Record + ?Sized>(record: &R) -> Self {
        if !record.has_identity() {
            SavePath::Insert
        } else if record.is_loaded() {
            SavePath::Update
        } else {
            SavePath::Upsert
        }
    }
}

/// Maps records onto statements for one datastore
pub struct PersistenceMapper<D: Driver> {
    connection: ResilientConnection<D>,
    dialect: Box<dyn Dialect>,
    datastore: Option<String>,
}

impl<D: Driver> PersistenceMapper<D> {
    pub fn new(connection: ResilientConnection<D>, dialect: Box<dyn Dialect>) -> Self {
        Self {
            connection,
            dialect,
            datastore: None,
        }
    }

    /// Mapper for `driver` configured from `daokit.toml` contents
    pub fn from_config(driver: D, config: &DaoConfig) -> Self {
        let connection = ResilientConnection::new(driver, config.connection.clone());
        let mut mapper = Self::new(connection, dialect_for(config.dialect));
        mapper.datastore = config.datastore.clone();
        mapper
    }

    /// Only accept record types pinned to `name` (or not pinned at all)
    pub fn with_datastore(mut self, name: impl Into<String>) -> Self {
        self.datastore = Some(name.into());
        self
    }

    pub fn datastore(&self) -> Option<&str> {
        self.datastore.as_deref()
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn connection(&self) -> &ResilientConnection<D> {
        &self.connection
    }

    /// The underlying connection, e.g. to open a transaction
    pub fn connection_mut(&mut self) -> &mut ResilientConnection<D> {
        &mut self.connection
    }

    fn check_datastore(&self, schema: &Schema) -> Result<()> {
        match (schema.datastore(), self.datastore.as_deref()) {
            (Some(wanted), Some(ours)) if wanted != ours => Err(Error::DataStore(format!(
                "{} belongs to datastore '{}', this mapper serves '{}'",
                schema.table(),
                wanted,
                ours
            ))),
            _ => Ok(()),
        }
    }

    /// Persist pending changes, returning what was written
    pub fn save<R: Record + ?Sized>(&mut self, record: &mut R) -> Result<ChangeSet> {
        self.check_datastore(record.schema())?;
        if record.is_deleted() {
            return Err(Error::InvalidState(format!(
                "{} record was deleted and cannot be saved",
                record.schema().table()
            )));
        }

        let changes = record.diff();
        let path = SavePath::for_record(record);
        let native_sets = self.dialect.supports_native_sets();

        let state = record.state();
        let schema = state.schema();
        let mut intent = WriteIntent::new(schema.table());
        for (i, def) in schema.properties().iter().enumerate() {
            let value = &state.values()[i];
            let changed = state.is_changed(i);
            match path {
                // The store fills in a missing identity
                SavePath::Insert if schema.is_identity(i) && is_null(value) => continue,
                SavePath::Update if !changed => continue,
                _ => {}
            }
            intent
                .columns
                .push(ColumnWrite::from_property(&def.name, value, changed, native_sets));
        }

        let statement = match path {
            SavePath::Insert => self.dialect.insert(&intent)?,
            SavePath::Update => {
                if intent.changed_columns().next().is_none() {
                    tracing::debug!("Nothing to save for {}", schema.table());
                    return Ok(changes);
                }
                intent.identity = state.saved_identity();
                self.dialect.update(&intent)?
            }
            SavePath::Upsert => {
                intent.identity = state.identity();
                self.dialect.upsert(&intent)?
            }
        };
        let execution = self.connection.execute(&statement)?;
        tracing::debug!(
            "Saved {} via {} ({} rows, {} changed properties)",
            record.schema().table(),
            path.as_str(),
            execution.affected_rows,
            changes.len()
        );

        let state = record.state_mut();
        if path == SavePath::Insert && state.schema().identity_indexes().len() == 1 {
            if let Some(id) = execution.last_insert_id {
                state.assign_generated_identity(id);
            }
        }
        // A record saved without an identity would be inserted again on its next save
        if !state.schema().identity_indexes().is_empty() && !state.has_identity() {
            return Err(Error::InvalidState(format!(
                "{} was inserted but the store returned no identity",
                state.schema().table()
            )));
        }
        state.mark_saved();
        state.set_loaded(true);
        Ok(changes)
    }

    /// Hydrate `record` from the row matching its identity
    pub fn load<R: Record + ?Sized>(&mut self, record: &mut R) -> Result<()> {
        self.check_datastore(record.schema())?;
        if !record.has_identity() {
            return Err(Error::InvalidState(format!(
                "cannot load {} without an identity",
                record.schema().table()
            )));
        }

        let identity = record.identity();
        let statement = self
            .dialect
            .select_by_identity(record.schema().table(), &identity, LOAD_LIMIT);
        let rows = self.connection.fetch_results(&statement)?;

        match rows.as_slice() {
            [] => Err(Error::DaoNotFound(describe(record.schema(), &identity))),
            [row] => {
                let values = self.hydrate(record.schema(), row)?;
                record.state_mut().hydrate(values);
                Ok(())
            }
            _ => Err(Error::TooManyResults(format!(
                "{} matched more than one row",
                describe(record.schema(), &identity)
            ))),
        }
    }

    /// Raw store values for every property; transforms are not applied
    fn hydrate(&self, schema: &Schema, row: &Row) -> Result<Vec<PropertyValue>> {
        schema
            .properties()
            .iter()
            .map(|def| {
                let raw = row.get(&def.name).ok_or_else(|| {
                    Error::DataStore(format!("{}: column '{}' missing from row", schema.table(), def.name))
                })?;
                Ok(match &def.default {
                    PropertyValue::Scalar(_) => PropertyValue::Scalar(raw.clone()),
                    PropertyValue::Counter(_) => {
                        let n = match raw {
                            Value::Null => 0,
                            other => other.as_i64().ok_or_else(|| {
                                Error::DataStore(format!(
                                    "{}: counter '{}' holds {}",
                                    schema.table(),
                                    def.name,
                                    other.type_name()
                                ))
                            })?,
                        };
                        PropertyValue::Counter(Counter::new(n))
                    }
                    PropertyValue::Set(_) => PropertyValue::Set(UniqueSet::new(self.dialect.decode_set(raw)?)),
                })
            })
            .collect()
    }

    /// Delete the row behind `record`; exactly one row must go
    pub fn delete<R: Record + ?Sized>(&mut self, record: &mut R) -> Result<()> {
        self.check_datastore(record.schema())?;
        let table = record.schema().table().to_string();
        if record.is_deleted() {
            return Err(Error::InvalidState(format!("{} record was already deleted", table)));
        }
        if !record.has_identity() {
            return Err(Error::InvalidState(format!("cannot delete {} without an identity", table)));
        }
        if record.identity_changed() {
            return Err(Error::InvalidState(format!(
                "identity of {} changed since it was loaded; save or reload before deleting",
                table
            )));
        }

        let identity = record.identity();
        let statement = self.dialect.delete(&table, &identity);
        let affected = self.connection.run_query(&statement)?;
        match affected {
            1 => {
                record.state_mut().mark_deleted();
                tracing::debug!("Deleted {}", describe(record.schema(), &identity));
                Ok(())
            }
            0 => Err(Error::DataStore(format!(
                "delete of {} affected 0 rows",
                describe(record.schema(), &identity)
            ))),
            n => Err(Error::Integrity(format!(
                "delete of {} deleted multiple rows ({})",
                describe(record.schema(), &identity),
                n
            ))),
        }
    }

    /// Whether a row matches the record's identity; loads it when it does
    pub fn exists<R: Record + ?Sized>(&mut self, record: &mut R) -> Result<bool> {
        match self.load(record) {
            Ok(()) => Ok(true),
            Err(Error::DaoNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn is_null(value: &PropertyValue) -> bool {
    matches!(value, PropertyValue::Scalar(Value::Null))
}

/// `table(k=v, ...)` for messages
fn describe(schema: &Schema, identity: &[(String, Value)]) -> String {
    let keys = identity
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{}({})", schema.table(), keys)
}
