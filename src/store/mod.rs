//! Data store layer.
//!
//! Submodules:
//! - `table`: row/table payloads
//! - `remote`: the `DataStore` trait and the REST backend
//! - `sqlite`: SQLite backend (local deployments, tests)
//! - `facade`: async access with a bounded worker pool and per-turn budget
//! - `errors`: store and access error types

pub mod errors;
pub mod facade;
pub mod remote;
pub mod sqlite;
pub mod table;

pub use errors::{AccessError, StoreError};
pub use facade::{DataAccess, TurnBudget};
pub use remote::{DataStore, RestDataStore};
pub use sqlite::SqliteStore;
pub use table::{Row, Table};
