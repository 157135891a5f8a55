//! Chunked large-file storage on top of an ordered document database.
//!
//! A [`Bucket`] keeps each file as one record in `<bucket>_files` plus an
//! ordered run of fixed-size chunks in `<bucket>_chunks`. Uploads stay
//! invisible until closed, several uploads of one name form its revisions,
//! and every download is checked against the SHA-256 recorded at upload.
//!
//! The database is reached through [`store::DocumentStore`]; an in-memory
//! and a SQLite adapter are provided.

pub mod config;
pub mod errors;
pub mod models;
pub mod services;
pub mod store;

pub use config::{BucketOptions, StoreConfig};
pub use errors::{GridError, GridResult};
pub use models::{ChunkRecord, FileChange, FileRecord, FileStatus, Metadata};
pub use services::FileHandle;
pub use services::bucket::{Bucket, CHUNK_INDEX, FILE_INDEX, FileCursor};
pub use services::list::ListOptions;
pub use services::reader::ReadSession;
pub use services::revision::Revision;
pub use services::watch::FileWatch;
pub use services::writer::WriteSession;
pub use store::{DocumentStore, MemoryStore, SqliteStore};
