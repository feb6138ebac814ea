use std::env;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SqlDalError;
use crate::executor::DataLayer;
use crate::types::DatabaseType;

/// Rows per bulk statement in the batch executor.
pub const DEFAULT_CHUNK_SIZE: usize = 200;

/// How long `SQLite` waits on a locked database before reporting busy.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub const ENV_URL: &str = "SQL_DAL_URL";
pub const ENV_CHUNK_SIZE: &str = "SQL_DAL_CHUNK_SIZE";
pub const ENV_STRICT_SINGLE: &str = "SQL_DAL_STRICT_SINGLE";

/// Options describing the store a [`DataLayer`] talks to.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Connection descriptor as given by the caller.
    pub connection_string: String,
    /// Backend detected from the connection string.
    pub db_type: DatabaseType,
    /// Rows per bulk statement in [`DataLayer::execute_batch`].
    pub chunk_size: usize,
    /// `SQLite` busy timeout; ignored by Postgres.
    pub busy_timeout: Duration,
    /// Make `query_single` fail on more than one row instead of keeping the first.
    pub strict_single: bool,
}

impl StoreOptions {
    /// Options with defaults for the given connection string.
    ///
    /// # Errors
    /// Returns `SqlDalError::ConfigError` if the backend cannot be determined or is not compiled in.
    pub fn new(connection_string: impl Into<String>) -> Result<Self, SqlDalError> {
        let connection_string = connection_string.into();
        let db_type = detect_database_type(&connection_string)?;
        Ok(Self {
            connection_string,
            db_type,
            chunk_size: DEFAULT_CHUNK_SIZE,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            strict_single: false,
        })
    }

    /// Read options from `SQL_DAL_URL`, `SQL_DAL_CHUNK_SIZE`, and `SQL_DAL_STRICT_SINGLE`.
    ///
    /// # Errors
    /// Returns `SqlDalError::ConfigError` if the URL is missing or a value does not parse.
    pub fn from_env() -> Result<Self, SqlDalError> {
        let url = env::var(ENV_URL)
            .map_err(|_| SqlDalError::ConfigError(format!("{ENV_URL} is not set")))?;
        let mut builder = StoreOptionsBuilder::new(url);
        if let Ok(raw) = env::var(ENV_CHUNK_SIZE) {
            let size = raw.trim().parse::<usize>().map_err(|e| {
                SqlDalError::ConfigError(format!("{ENV_CHUNK_SIZE}={raw:?} is not a size: {e}"))
            })?;
            builder = builder.chunk_size(size);
        }
        if let Ok(raw) = env::var(ENV_STRICT_SINGLE) {
            builder = builder.strict_single(parse_flag(&raw).ok_or_else(|| {
                SqlDalError::ConfigError(format!("{ENV_STRICT_SINGLE}={raw:?} is not a boolean"))
            })?);
        }
        builder.finish()
    }

    /// Check option invariants.
    ///
    /// # Errors
    /// Returns `SqlDalError::ConfigError` describing the first invalid option.
    pub fn validate(&self) -> Result<(), SqlDalError> {
        if self.chunk_size == 0 {
            return Err(SqlDalError::ConfigError(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if self.connection_string.trim().is_empty() {
            return Err(SqlDalError::ConfigError(
                "connection string is empty".to_string(),
            ));
        }
        #[cfg(feature = "postgres")]
        if self.db_type == DatabaseType::Postgres {
            self.connection_string
                .parse::<tokio_postgres::Config>()
                .map_err(|e| {
                    SqlDalError::ConfigError(format!("invalid Postgres connection string: {e}"))
                })?;
        }
        Ok(())
    }

    /// Filesystem path or `file:` URI handed to `SQLite`.
    #[cfg(feature = "sqlite")]
    #[must_use]
    pub fn sqlite_path(&self) -> &str {
        let s = self.connection_string.as_str();
        s.strip_prefix("sqlite://")
            .or_else(|| s.strip_prefix("sqlite:"))
            .unwrap_or(s)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Work out which backend a connection string addresses.
///
/// `postgres://` and `postgresql://` URLs (or libpq-style `host=... dbname=...` strings) select
/// Postgres; `sqlite:` prefixes, `file:` URIs, and anything else are treated as `SQLite` paths.
///
/// # Errors
/// Returns `SqlDalError::ConfigError` if the string is empty or the backend's feature is disabled.
pub fn detect_database_type(connection_string: &str) -> Result<DatabaseType, SqlDalError> {
    let trimmed = connection_string.trim();
    if trimmed.is_empty() {
        return Err(SqlDalError::ConfigError(
            "connection string is empty".to_string(),
        ));
    }
    let lower = trimmed.to_ascii_lowercase();
    let looks_postgres = lower.starts_with("postgres://")
        || lower.starts_with("postgresql://")
        || (lower.contains("host=") && lower.contains("dbname="));

    if looks_postgres {
        #[cfg(feature = "postgres")]
        return Ok(DatabaseType::Postgres);
        #[cfg(not(feature = "postgres"))]
        return Err(SqlDalError::ConfigError(
            "Postgres connection string given but the `postgres` feature is disabled".to_string(),
        ));
    }

    #[cfg(feature = "sqlite")]
    return Ok(DatabaseType::Sqlite);
    #[cfg(not(feature = "sqlite"))]
    Err(SqlDalError::ConfigError(format!(
        "cannot determine a backend for {trimmed:?} (the `sqlite` feature is disabled)"
    )))
}

/// Immutable descriptor of the target store, shared by every call on a [`DataLayer`].
#[derive(Debug, Clone)]
pub struct StoreHandle(Arc<StoreOptions>);

impl StoreHandle {
    /// # Errors
    /// Returns `SqlDalError::ConfigError` if the options are invalid.
    pub fn new(options: StoreOptions) -> Result<Self, SqlDalError> {
        options.validate()?;
        Ok(Self(Arc::new(options)))
    }

    #[must_use]
    pub fn options(&self) -> &StoreOptions {
        &self.0
    }

    #[must_use]
    pub fn db_type(&self) -> DatabaseType {
        self.0.db_type
    }

    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.0.connection_string
    }
}

/// Fluent builder for [`StoreOptions`] and [`DataLayer`].
#[derive(Debug, Clone)]
pub struct StoreOptionsBuilder {
    connection_string: String,
    chunk_size: Option<usize>,
    busy_timeout: Option<Duration>,
    strict_single: Option<bool>,
}

impl StoreOptionsBuilder {
    #[must_use]
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            chunk_size: None,
            busy_timeout: None,
            strict_single: None,
        }
    }

    #[must_use]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = Some(busy_timeout);
        self
    }

    #[must_use]
    pub fn strict_single(mut self, strict_single: bool) -> Self {
        self.strict_single = Some(strict_single);
        self
    }

    /// # Errors
    /// Returns `SqlDalError::ConfigError` if the resulting options are invalid.
    pub fn finish(self) -> Result<StoreOptions, SqlDalError> {
        let mut opts = StoreOptions::new(self.connection_string)?;
        if let Some(chunk_size) = self.chunk_size {
            opts.chunk_size = chunk_size;
        }
        if let Some(busy_timeout) = self.busy_timeout {
            opts.busy_timeout = busy_timeout;
        }
        if let Some(strict_single) = self.strict_single {
            opts.strict_single = strict_single;
        }
        opts.validate()?;
        Ok(opts)
    }

    /// Build a [`DataLayer`]. No connection is opened.
    ///
    /// # Errors
    /// Returns `SqlDalError::ConfigError` if the options are invalid.
    pub fn build(self) -> Result<DataLayer, SqlDalError> {
        DataLayer::new(self.finish()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "sqlite")]
    #[test]
    fn plain_paths_are_sqlite() {
        let opts = StoreOptions::new("sqlite:///tmp/x.db").unwrap();
        assert_eq!(opts.db_type, DatabaseType::Sqlite);
        assert_eq!(opts.sqlite_path(), "/tmp/x.db");
        assert_eq!(opts.chunk_size, DEFAULT_CHUNK_SIZE);

        let opts = StoreOptions::new("data/app.db").unwrap();
        assert_eq!(opts.sqlite_path(), "data/app.db");
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn postgres_urls_are_detected() {
        let opts = StoreOptions::new("postgres://u:p@localhost:5432/db").unwrap();
        assert_eq!(opts.db_type, DatabaseType::Postgres);
        let opts = StoreOptions::new("host=localhost dbname=app user=u").unwrap();
        assert_eq!(opts.db_type, DatabaseType::Postgres);
    }

    #[cfg(not(feature = "postgres"))]
    #[test]
    fn postgres_urls_need_the_feature() {
        let err = StoreOptions::new("postgresql://localhost/db").unwrap_err();
        assert!(matches!(err, SqlDalError::ConfigError(_)));
    }

    #[test]
    fn empty_string_is_rejected() {
        assert!(matches!(
            detect_database_type("  "),
            Err(SqlDalError::ConfigError(_))
        ));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = StoreOptionsBuilder::new("a.db").chunk_size(0).finish().unwrap_err();
        assert!(matches!(err, SqlDalError::ConfigError(msg) if msg.contains("chunk_size")));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn builder_overrides_defaults() {
        let opts = StoreOptionsBuilder::new("a.db")
            .chunk_size(3)
            .busy_timeout(Duration::from_millis(50))
            .strict_single(true)
            .finish()
            .unwrap();
        assert_eq!(opts.chunk_size, 3);
        assert_eq!(opts.busy_timeout, Duration::from_millis(50));
        assert!(opts.strict_single);
    }

    #[test]
    fn flags_parse_common_spellings() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" off "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
