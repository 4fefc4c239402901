//! Storage layer for sessionware.
//!
//! Provides SQLite connection pooling (via `r2d2`), the [`Session`] unit of
//! work handed to request handlers, and [`Schema`], an idempotent set of table
//! definitions that can be created on first use.
//!
//! # Design decisions
//!
//! - **One transaction per session**: a [`Session`] opens its transaction
//!   lazily on first use and discards anything uncommitted when it is closed.
//! - **Guaranteed release**: dropping a [`Session`] closes it, so a pooled
//!   connection always goes back to the pool, even when a handler panics.
//! - **Create-if-missing schema**: [`Schema::create_all`] checks
//!   `sqlite_master` under an immediate transaction, so concurrent first use
//!   never creates a table twice.

mod error;
mod pool;
mod schema;
mod session;

pub use error::DbError;
pub use pool::{create_pool, DbPool, DbRuntimeSettings};
pub use schema::{Schema, TableDef};
pub use session::{PooledConn, Session, SessionSource, SessionState};
