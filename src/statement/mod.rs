//! Statements and store dialects
//!
//! The mapper describes a write as a [`WriteIntent`]: one [`ColumnWrite`]
//! per column, each carrying the full value (for inserts) and the change
//! fragments (for updates). A [`Dialect`] renders intents into statement
//! text plus ordered bind parameters.

pub mod cql;
pub mod mysql;
pub mod sqlite;

pub use cql::CqlDialect;
pub use mysql::MysqlDialect;
pub use sqlite::SqliteDialect;

use std::fmt;

use crate::config::DialectKind;
use crate::value::Value;
use crate::value_type::{PropertyKind, PropertyValue};
use crate::{Error, Result};

/// Statement text with its positional parameters
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    pub text: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(text: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            text: text.into(),
            params,
        }
    }

    /// Statement without parameters
    pub fn raw(text: impl Into<String>) -> Self {
        Self::new(text, Vec::new())
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// What one column contributes to a write
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// Literal assignment of a scalar (or fixed counter)
    Assign(Value),
    /// Literal assignment of a whole set
    AssignItems(Vec<Value>),
    Increment(i64),
    Decrement(i64),
    SetAdd(Vec<Value>),
    SetRemove(Vec<Value>),
}

impl Fragment {
    /// Fragment writing the full calculated value of a property
    pub fn full(value: &PropertyValue) -> Self {
        match value {
            PropertyValue::Scalar(v) => Fragment::Assign(v.clone()),
            PropertyValue::Counter(c) => Fragment::Assign(Value::Integer(c.calculated())),
            PropertyValue::Set(s) => Fragment::AssignItems(s.calculated()),
        }
    }

    /// Fragments applying the pending change of a property.
    ///
    /// Unchanged counters and sets contribute nothing. Fixed values become
    /// literal assignments. Without native set mutation a changed set is
    /// assigned as a whole.
    pub fn changes(value: &PropertyValue, native_sets: bool) -> Vec<Fragment> {
        match value {
            PropertyValue::Scalar(v) => vec![Fragment::Assign(v.clone())],
            PropertyValue::Counter(c) => {
                if !c.has_changed() {
                    Vec::new()
                } else if c.is_fixed_value() {
                    vec![Fragment::Assign(Value::Integer(c.calculated()))]
                } else if c.is_increment() {
                    vec![Fragment::Increment(c.pending_delta())]
                } else {
                    vec![Fragment::Decrement(c.pending_delta().saturating_neg())]
                }
            }
            PropertyValue::Set(s) => {
                if !s.has_changed() {
                    return Vec::new();
                }
                if s.is_fixed_value() || !native_sets {
                    return vec![Fragment::AssignItems(s.calculated())];
                }
                let mut out = Vec::new();
                if !s.added().is_empty() {
                    out.push(Fragment::SetAdd(s.added().to_vec()));
                }
                if !s.removed().is_empty() {
                    out.push(Fragment::SetRemove(s.removed().to_vec()));
                }
                out
            }
        }
    }

    pub fn is_assignment(&self) -> bool {
        matches!(self, Fragment::Assign(_) | Fragment::AssignItems(_))
    }
}

/// One column of a write
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnWrite {
    pub column: String,
    pub kind: PropertyKind,
    /// Full calculated value, used by inserts
    pub full: Fragment,
    /// Pending changes, used by updates; empty when the column is unchanged
    pub changes: Vec<Fragment>,
}

impl ColumnWrite {
    pub fn from_property(column: &str, value: &PropertyValue, changed: bool, native_sets: bool) -> Self {
        Self {
            column: column.to_string(),
            kind: value.kind(),
            full: Fragment::full(value),
            changes: if changed {
                Fragment::changes(value, native_sets)
            } else {
                Vec::new()
            },
        }
    }
}

/// A write against one table
#[derive(Debug, Clone, PartialEq)]
pub struct WriteIntent {
    pub table: String,
    pub columns: Vec<ColumnWrite>,
    /// Identity predicate (update/upsert) or identity columns (insert)
    pub identity: Vec<(String, Value)>,
}

impl WriteIntent {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            identity: Vec::new(),
        }
    }

    fn is_identity(&self, column: &str) -> bool {
        self.identity.iter().any(|(name, _)| name == column)
    }

    /// Columns with at least one pending change
    pub fn changed_columns(&self) -> impl Iterator<Item = &ColumnWrite> {
        self.columns.iter().filter(|c| !c.changes.is_empty())
    }
}

/// Renders write intents and lookups for one store family
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    fn quote(&self, ident: &str) -> String;

    /// Whether sets are mutated element-wise by the store
    fn supports_native_sets(&self) -> bool {
        false
    }

    /// Storage form of a set column
    fn encode_set(&self, items: &[Value]) -> Result<Value> {
        Ok(Value::Text(serde_json::to_string(items)?))
    }

    /// Set elements from a stored column value
    fn decode_set(&self, raw: &Value) -> Result<Vec<Value>> {
        match raw {
            Value::Null => Ok(Vec::new()),
            Value::Text(text) if text.trim().is_empty() => Ok(Vec::new()),
            Value::Text(text) => Ok(serde_json::from_str(text)?),
            other => Err(Error::DataStore(format!(
                "cannot decode a set from a {} column",
                other.type_name()
            ))),
        }
    }

    /// Bind a whole set, returning the placeholder text
    fn bind_set(&self, items: &[Value], params: &mut Vec<Value>) -> Result<String> {
        params.push(self.encode_set(items)?);
        Ok("?".to_string())
    }

    fn insert(&self, intent: &WriteIntent) -> Result<Statement> {
        let (columns, values, params) = insert_parts(self, intent)?;
        Ok(Statement::new(
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.quote(&intent.table),
                columns.join(", "),
                values.join(", ")
            ),
            params,
        ))
    }

    /// UPDATE of the changed columns, keyed by the intent's identity
    fn update(&self, intent: &WriteIntent) -> Result<Statement> {
        let mut params = Vec::new();
        let mut sets = Vec::new();
        for column in intent.changed_columns() {
            for fragment in &column.changes {
                sets.push(render_change(self, &column.column, fragment, &mut params)?);
            }
        }
        if sets.is_empty() {
            return Err(Error::InvalidState(format!(
                "nothing to update in {}",
                intent.table
            )));
        }
        let predicate = where_clause(self, &intent.identity, &mut params);
        Ok(Statement::new(
            format!(
                "UPDATE {} SET {} WHERE {}",
                self.quote(&intent.table),
                sets.join(", "),
                predicate
            ),
            params,
        ))
    }

    /// Insert-or-overwrite keyed by the intent's identity
    fn upsert(&self, intent: &WriteIntent) -> Result<Statement>;

    fn delete(&self, table: &str, identity: &[(String, Value)]) -> Statement {
        let mut params = Vec::new();
        let predicate = where_clause(self, identity, &mut params);
        Statement::new(
            format!("DELETE FROM {} WHERE {}", self.quote(table), predicate),
            params,
        )
    }

    fn select_by_identity(&self, table: &str, identity: &[(String, Value)], limit: u32) -> Statement {
        let mut params = Vec::new();
        let predicate = where_clause(self, identity, &mut params);
        Statement::new(
            format!(
                "SELECT * FROM {} WHERE {} LIMIT {}",
                self.quote(table),
                predicate,
                limit
            ),
            params,
        )
    }
}

/// Dialect for a configured store family
pub fn dialect_for(kind: DialectKind) -> Box<dyn Dialect> {
    match kind {
        DialectKind::Sqlite => Box::new(SqliteDialect),
        DialectKind::Mysql => Box::new(MysqlDialect),
        DialectKind::Cql => Box::new(CqlDialect),
    }
}

/// Quote with `mark`, doubling any embedded mark
pub(crate) fn quote_with(ident: &str, mark: char) -> String {
    let escaped = ident.replace(mark, &format!("{mark}{mark}"));
    format!("{mark}{escaped}{mark}")
}

pub(crate) fn where_clause<D: Dialect + ?Sized>(
    dialect: &D,
    identity: &[(String, Value)],
    params: &mut Vec<Value>,
) -> String {
    identity
        .iter()
        .map(|(name, value)| {
            params.push(value.clone());
            format!("{} = ?", dialect.quote(name))
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Render one SET item for `fragment`
pub(crate) fn render_change<D: Dialect + ?Sized>(
    dialect: &D,
    column: &str,
    fragment: &Fragment,
    params: &mut Vec<Value>,
) -> Result<String> {
    let col = dialect.quote(column);
    let rendered = match fragment {
        Fragment::Assign(v) => {
            params.push(v.clone());
            format!("{col} = ?")
        }
        Fragment::AssignItems(items) => format!("{col} = {}", dialect.bind_set(items, params)?),
        Fragment::Increment(n) => {
            params.push(Value::Integer(*n));
            format!("{col} = {col} + ?")
        }
        Fragment::Decrement(n) => {
            params.push(Value::Integer(*n));
            format!("{col} = {col} - ?")
        }
        Fragment::SetAdd(items) | Fragment::SetRemove(items) => {
            if !dialect.supports_native_sets() {
                return Err(Error::InvalidState(format!(
                    "{} has no native set mutation for column {}",
                    dialect.name(),
                    column
                )));
            }
            let op = if matches!(fragment, Fragment::SetAdd(_)) { '+' } else { '-' };
            format!("{col} = {col} {op} {}", dialect.bind_set(items, params)?)
        }
    };
    Ok(rendered)
}

/// Quoted column list, value placeholders and parameters of an INSERT
pub(crate) fn insert_parts<D: Dialect + ?Sized>(
    dialect: &D,
    intent: &WriteIntent,
) -> Result<(Vec<String>, Vec<String>, Vec<Value>)> {
    if intent.columns.is_empty() {
        return Err(Error::InvalidState(format!("no columns to insert into {}", intent.table)));
    }

    let mut columns = Vec::with_capacity(intent.columns.len());
    let mut values = Vec::with_capacity(intent.columns.len());
    let mut params = Vec::with_capacity(intent.columns.len());
    for column in &intent.columns {
        columns.push(dialect.quote(&column.column));
        let placeholder = match &column.full {
            Fragment::Assign(v) => {
                params.push(v.clone());
                "?".to_string()
            }
            Fragment::AssignItems(items) => dialect.bind_set(items, &mut params)?,
            other => {
                return Err(Error::InvalidState(format!(
                    "column {} cannot be inserted from {:?}",
                    column.column, other
                )));
            }
        };
        values.push(placeholder);
    }
    Ok((columns, values, params))
}

/// Changed non-identity columns, as targeted by an upsert's conflict branch
pub(crate) fn conflict_columns(intent: &WriteIntent) -> impl Iterator<Item = &ColumnWrite> {
    intent
        .changed_columns()
        .filter(move |c| !intent.is_identity(&c.column))
}
