use tabled::{builder::Builder, settings::Style, Table, Tabled};

use crate::config::DaoConfig;
use crate::connection::Row;

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Setting")]
    pub setting: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn add_row(&mut self, label: &str, value: impl ToString) {
        self.rows.push(TableRow {
            setting: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

/// Effective configuration as a two-column table
pub fn settings_table(config: &DaoConfig) -> String {
    let none = || "-".to_string();
    let mut builder = TableBuilder::new();
    builder.add_row("database", config.database.clone().unwrap_or_else(none));
    builder.add_row("datastore", config.datastore.clone().unwrap_or_else(none));
    builder.add_row("dialect", config.dialect.as_str());
    builder.add_row("retries", config.connection.retries);
    builder.add_row("connect_retries", config.connection.connect_retries);
    builder.add_row("connection_recycle_time", format!("{}s", config.connection.connection_recycle_time));
    builder.add_row("max_prepared_statements", config.connection.max_prepared_statements);
    builder.add_row("delayed_prepares", config.connection.delayed_prepares);
    builder.build()
}

/// Result rows with their column names as the header
pub fn rows_table(rows: &[Row]) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };

    let mut builder = Builder::default();
    builder.push_record(first.columns().iter().cloned());
    for row in rows {
        builder.push_record(row.values().iter().map(ToString::to_string));
    }
    builder.build().with(Style::rounded()).to_string()
}
