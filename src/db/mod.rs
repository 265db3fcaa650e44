//! Database module: row models, SQL functions and the store built on them.
//!
//! - `model`: rows as SQLite returns them, plus conversion into domain types.
//! - `repo`: SQL-only functions over a `Pool`.
//! - `store`: `SqliteStore`, which implements the repository and
//!   delayed-execution traits on top of `repo`.

pub mod model;
pub mod repo;
pub mod store;

pub use repo::{init_pool, run_migrations, Pool};
pub use store::SqliteStore;
