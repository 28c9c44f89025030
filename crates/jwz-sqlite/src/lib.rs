//! SQLite driver for the jwz index.
//!
//! The index is a rebuildable cache over the append-only log, held in a
//! single SQLite file. This crate owns everything engine-shaped:
//! - [`Database`]: open with the pragma contract, busy classification,
//!   retried transaction boundaries, meta key-value access
//! - [`schema`]: table provisioning and additive column migration
//!
//! Callers reach the raw [`rusqlite::Connection`] through
//! [`Database::conn`] for queries; writes go through [`Database::immediate_txn`]
//! so every mutation is wrapped in `BEGIN IMMEDIATE … COMMIT` with a
//! rollback guard on all other exit paths.

pub mod connection;
pub mod schema;

pub use connection::{classify, is_busy_error, is_constraint_violation, Database, SqlExt, Txn};
