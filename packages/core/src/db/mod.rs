//! Database Layer
//!
//! libsql/Turso integration: connection management, schema initialization,
//! and the point queries the tree engines compose inside transactions.

pub mod database;
pub mod error;

pub use database::DatabaseService;
pub use error::DatabaseError;
