//! Record schemas - the declared property list of a record type
//!
//! Every record type declares its properties once through a
//! [`SchemaBuilder`]. The built [`Schema`] is cached process-wide keyed by
//! the type's `TypeId`: it is populated the first time a record of that type
//! is constructed and never changes afterwards.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use super::transform::Transform;
use crate::value::Value;
use crate::value_type::{Counter, PropertyKind, PropertyValue, UniqueSet};
use crate::{Error, Result};

/// A record type with a statically declared schema
pub trait RecordType: 'static {
    /// Declare the record's table, properties and identity
    fn describe() -> SchemaBuilder;
}

/// One declared property
#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub name: String,
    pub kind: PropertyKind,
    pub default: PropertyValue,
    pub transforms: Vec<Transform>,
}

/// The immutable property layout of a record type
#[derive(Debug, Clone)]
pub struct Schema {
    table: String,
    datastore: Option<String>,
    properties: Vec<PropertyDef>,
    index: HashMap<String, usize>,
    identity: Vec<usize>,
    auto_increment: bool,
}

impl Schema {
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Name of the datastore this type lives in, if it is pinned to one
    pub fn datastore(&self) -> Option<&str> {
        self.datastore.as_deref()
    }

    pub fn properties(&self) -> &[PropertyDef] {
        &self.properties
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.index_of(name).map(|i| &self.properties[i])
    }

    /// Positions of the identity properties, in declaration order
    pub fn identity_indexes(&self) -> &[usize] {
        &self.identity
    }

    pub fn identity_names(&self) -> Vec<&str> {
        self.identity
            .iter()
            .map(|i| self.properties[*i].name.as_str())
            .collect()
    }

    pub fn is_identity(&self, index: usize) -> bool {
        self.identity.contains(&index)
    }

    /// Whether the store generates the (single) identity value on insert
    pub fn is_auto_increment(&self) -> bool {
        self.auto_increment
    }

    pub fn has_counters(&self) -> bool {
        self.properties.iter().any(|p| p.kind == PropertyKind::Counter)
    }

    /// Fresh property values holding every default
    pub fn defaults(&self) -> Vec<PropertyValue> {
        self.properties.iter().map(|p| p.default.clone()).collect()
    }
}

/// Fluent declaration of a [`Schema`]
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    table: String,
    datastore: Option<String>,
    properties: Vec<PropertyDef>,
    identity: Vec<String>,
    auto_increment: bool,
    pending_transforms: Vec<(String, Transform)>,
}

impl SchemaBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            datastore: None,
            properties: Vec::new(),
            identity: Vec::new(),
            auto_increment: false,
            pending_transforms: Vec::new(),
        }
    }

    pub fn datastore(mut self, name: impl Into<String>) -> Self {
        self.datastore = Some(name.into());
        self
    }

    /// Scalar property with a default value
    pub fn property(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.properties.push(PropertyDef {
            name: name.into(),
            kind: PropertyKind::Scalar,
            default: PropertyValue::Scalar(default.into()),
            transforms: Vec::new(),
        });
        self
    }

    pub fn counter(mut self, name: impl Into<String>) -> Self {
        self.properties.push(PropertyDef {
            name: name.into(),
            kind: PropertyKind::Counter,
            default: PropertyValue::Counter(Counter::default()),
            transforms: Vec::new(),
        });
        self
    }

    pub fn unique_set(mut self, name: impl Into<String>) -> Self {
        self.properties.push(PropertyDef {
            name: name.into(),
            kind: PropertyKind::Set,
            default: PropertyValue::Set(UniqueSet::default()),
            transforms: Vec::new(),
        });
        self
    }

    pub fn identity(mut self, names: &[&str]) -> Self {
        self.identity = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Append a transform step to a property's pipeline
    pub fn transform(mut self, property: impl Into<String>, step: Transform) -> Self {
        self.pending_transforms.push((property.into(), step));
        self
    }

    pub fn build(self) -> Result<Schema> {
        if self.table.is_empty() {
            return Err(Error::Config("schema has no table name".to_string()));
        }
        if self.properties.is_empty() {
            return Err(Error::Config(format!("{}: schema declares no properties", self.table)));
        }

        let mut index = HashMap::new();
        for (i, prop) in self.properties.iter().enumerate() {
            if index.insert(prop.name.clone(), i).is_some() {
                return Err(Error::Config(format!(
                    "{}: property '{}' declared twice",
                    self.table, prop.name
                )));
            }
        }

        if self.identity.is_empty() {
            return Err(Error::Config(format!("{}: no identity properties", self.table)));
        }
        let mut identity = Vec::with_capacity(self.identity.len());
        for name in &self.identity {
            let i = *index
                .get(name)
                .ok_or_else(|| Error::Config(format!("{}: unknown identity property '{}'", self.table, name)))?;
            if self.properties[i].kind != PropertyKind::Scalar {
                return Err(Error::Config(format!(
                    "{}: identity property '{}' must be scalar",
                    self.table, name
                )));
            }
            identity.push(i);
        }

        if self.auto_increment && identity.len() != 1 {
            return Err(Error::Config(format!(
                "{}: auto-increment requires exactly one identity property",
                self.table
            )));
        }

        let mut properties = self.properties;
        for (name, step) in self.pending_transforms {
            let i = *index
                .get(&name)
                .ok_or_else(|| Error::Config(format!("{}: transform on unknown property '{}'", self.table, name)))?;
            properties[i].transforms.push(step);
        }

        Ok(Schema {
            table: self.table,
            datastore: self.datastore,
            properties,
            index,
            identity,
            auto_increment: self.auto_increment,
        })
    }
}

fn registry() -> &'static RwLock<HashMap<TypeId, Arc<Schema>>> {
    static SCHEMAS: OnceLock<RwLock<HashMap<TypeId, Arc<Schema>>>> = OnceLock::new();
    SCHEMAS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// The cached schema of `T`, built from [`RecordType::describe`] on first use.
pub fn schema_for<T: RecordType>() -> Result<Arc<Schema>> {
    let key = TypeId::of::<T>();
    if let Some(schema) = registry().read().get(&key) {
        return Ok(Arc::clone(schema));
    }

    let built = Arc::new(T::describe().build()?);
    let mut schemas = registry().write();
    // A racing constructor may have won; keep whichever landed first.
    let schema = schemas.entry(key).or_insert(built);
    tracing::debug!("Registered schema for table {}", schema.table());
    Ok(Arc::clone(schema))
}
