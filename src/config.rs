use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tuning knobs of a [`ResilientConnection`](crate::connection::ResilientConnection)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Retries of a failed query before giving up
    pub retries: u32,
    /// Attempts to establish the link before giving up
    pub connect_retries: u32,
    /// Seconds a link may stay open before it is recycled
    pub connection_recycle_time: u64,
    /// Capacity of the prepared-statement cache
    pub max_prepared_statements: usize,
    /// Executions of a statement that run unprepared before it is cached
    pub delayed_prepares: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            connect_retries: 3,
            connection_recycle_time: 900,
            max_prepared_statements: 10,
            delayed_prepares: 0,
        }
    }
}

impl ConnectionConfig {
    pub fn recycle_after(&self) -> Duration {
        Duration::from_secs(self.connection_recycle_time)
    }
}

/// Statement dialect a datastore speaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[default]
    Sqlite,
    Mysql,
    Cql,
}

impl DialectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialectKind::Sqlite => "sqlite",
            DialectKind::Mysql => "mysql",
            DialectKind::Cql => "cql",
        }
    }
}

/// Contents of `daokit.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaoConfig {
    /// Database file (SQLite) or database/keyspace name
    pub database: Option<String>,
    /// Logical datastore name; records pinned to another datastore are rejected
    pub datastore: Option<String>,
    #[serde(default)]
    pub dialect: DialectKind,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("daokit.toml")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<DaoConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: DaoConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &DaoConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}
