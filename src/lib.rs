pub mod bookmarks;
pub mod config;
pub mod db;
pub mod discovery;
pub mod helpers;
pub mod ident;
pub mod indexer;
pub mod ipc;
pub mod model;
pub mod parse;
pub mod query;
pub mod rules;
pub mod runner;

/// Current index schema version. Bumping it causes a destructive rebuild of the
/// index database on the next run (the index is a cache over provider files).
pub const SCHEMA_VERSION: i64 = 3;

/// Version tag written into bookmark snapshot JSON.
pub const SNAPSHOT_VERSION: i64 = 1;
