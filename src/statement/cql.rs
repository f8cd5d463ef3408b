use std::fmt::Write as _;

use super::{insert_parts, quote_with, render_change, where_clause, Dialect, Statement, WriteIntent};
use crate::value::Value;
use crate::value_type::PropertyKind;
use crate::{Error, Result};

/// Wide-column CQL: INSERT already overwrites, sets are mutated in place
/// and counter tables are only ever written with `UPDATE ... SET c = c + ?`.
///
/// Set elements are rendered as CQL collection literals.
#[derive(Debug, Default, Clone, Copy)]
pub struct CqlDialect;

impl CqlDialect {
    /// Counter tables only accept relative updates keyed by the primary key
    fn counter_update(&self, intent: &WriteIntent) -> Result<Statement> {
        let mut params = Vec::new();
        let mut sets = Vec::new();
        for column in intent.columns.iter().filter(|c| !intent.is_identity(&c.column)) {
            if column.kind != PropertyKind::Counter {
                return Err(Error::InvalidState(format!(
                    "counter table {} cannot hold non-counter column {}",
                    intent.table, column.column
                )));
            }
            for fragment in &column.changes {
                if fragment.is_assignment() {
                    return Err(Error::InvalidState(format!(
                        "counter column {} can only be incremented or decremented",
                        column.column
                    )));
                }
                sets.push(render_change(self, &column.column, fragment, &mut params)?);
            }
        }
        if sets.is_empty() {
            return Err(Error::InvalidState(format!("nothing to update in {}", intent.table)));
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
}

impl Dialect for CqlDialect {
    fn name(&self) -> &'static str {
        "cql"
    }

    fn quote(&self, ident: &str) -> String {
        quote_with(ident, '"')
    }

    fn supports_native_sets(&self) -> bool {
        true
    }

    fn bind_set(&self, items: &[Value], _params: &mut Vec<Value>) -> Result<String> {
        set_literal(items)
    }

    fn insert(&self, intent: &WriteIntent) -> Result<Statement> {
        if intent.columns.iter().any(|c| c.kind == PropertyKind::Counter) {
            return self.counter_update(intent);
        }
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

    fn update(&self, intent: &WriteIntent) -> Result<Statement> {
        if intent.columns.iter().any(|c| c.kind == PropertyKind::Counter) {
            return self.counter_update(intent);
        }
        let mut params = Vec::new();
        let mut sets = Vec::new();
        for column in intent.changed_columns() {
            for fragment in &column.changes {
                sets.push(render_change(self, &column.column, fragment, &mut params)?);
            }
        }
        if sets.is_empty() {
            return Err(Error::InvalidState(format!("nothing to update in {}", intent.table)));
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

    /// INSERT overwrites an existing row with the same primary key
    fn upsert(&self, intent: &WriteIntent) -> Result<Statement> {
        self.insert(intent)
    }
}

/// CQL set literal: `{'a', 1}`
fn set_literal(items: &[Value]) -> Result<String> {
    let rendered = items.iter().map(literal).collect::<Result<Vec<_>>>()?;
    Ok(format!("{{{}}}", rendered.join(", ")))
}

fn literal(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Null => {
            return Err(Error::InvalidState("sets cannot hold null elements".to_string()));
        }
        Value::Bool(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Blob(bytes) => {
            let mut hex = String::with_capacity(2 + bytes.len() * 2);
            hex.push_str("0x");
            for byte in bytes {
                let _ = write!(hex, "{byte:02x}");
            }
            hex
        }
    })
}
