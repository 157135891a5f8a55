use anyhow::{Context, Result};
use std::{env, str::FromStr};

/// Collection-name prefix used when none is configured.
pub const DEFAULT_BUCKET_NAME: &str = "fs";

/// Chunk size used when none is configured (255 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://./data/grid.db";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Configuration of one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketOptions {
    /// Database holding the bucket's collections (required).
    pub database_name: String,
    /// Prefix of the `<name>_files` / `<name>_chunks` collections.
    pub bucket_name: String,
    /// Maximum payload of one chunk, fixed per file at creation.
    pub chunk_size: usize,
}

impl BucketOptions {
    pub fn new(database_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            bucket_name: DEFAULT_BUCKET_NAME.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_bucket_name(mut self, bucket_name: impl Into<String>) -> Self {
        self.bucket_name = bucket_name.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Read `GRID_DATABASE` (required), `GRID_BUCKET` and `GRID_CHUNK_SIZE`.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key))
    }

    fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let database_name = var("GRID_DATABASE").context("reading GRID_DATABASE")?;
        let bucket_name =
            optional(&var, "GRID_BUCKET")?.unwrap_or_else(|| DEFAULT_BUCKET_NAME.into());
        let chunk_size = parsed(&var, "GRID_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?;

        Ok(Self {
            database_name,
            bucket_name,
            chunk_size,
        }
        .normalized())
    }

    /// Empty bucket names and zero chunk sizes fall back to the defaults.
    pub(crate) fn normalized(mut self) -> Self {
        if self.bucket_name.is_empty() {
            self.bucket_name = DEFAULT_BUCKET_NAME.to_string();
        }
        if self.chunk_size == 0 {
            self.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        self
    }
}

/// Connection settings for [`crate::store::SqliteStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl StoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::default()
        }
    }

    /// Read `GRID_DATABASE_URL` and `GRID_MAX_CONNECTIONS`.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key))
    }

    fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let database_url =
            optional(&var, "GRID_DATABASE_URL")?.unwrap_or_else(|| DEFAULT_DATABASE_URL.into());
        let max_connections = parsed(&var, "GRID_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;

        Ok(Self {
            database_url,
            max_connections,
        })
    }

    /// Whether the URL names a private in-memory SQLite database.
    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }
}

fn optional<F>(var: &F, key: &str) -> Result<Option<String>>
where
    F: Fn(&str) -> Result<String, env::VarError>,
{
    match var(key) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

fn parsed<F, T>(var: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Result<String, env::VarError>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(var, key)? {
        Some(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(default),
    }
}
