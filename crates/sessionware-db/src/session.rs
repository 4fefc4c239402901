//! Sessions: short-lived units of work over a single pooled connection.

use std::fmt;

use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, Params, Row};

use crate::{DbError, DbPool};

/// A connection checked out of the pool.
pub type PooledConn = PooledConnection<SqliteConnectionManager>;

/// Where a session is in its lifecycle.
///
/// A session starts `Created`, moves to `Committed` or `RolledBack` when it
/// is finalized, and always ends `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Committed,
    RolledBack,
    Closed,
}

/// Factory for sessions.
///
/// Implemented for [`DbPool`]; wrap it to observe or decorate the sessions
/// a component opens.
pub trait SessionSource: Send + Sync + 'static {
    /// Checks out a raw pooled connection.
    fn connect(&self) -> Result<PooledConn, DbError>;

    /// Opens a new session.
    fn open(&self) -> Result<Session, DbError> {
        Ok(Session::new(self.connect()?))
    }
}

impl SessionSource for DbPool {
    fn connect(&self) -> Result<PooledConn, DbError> {
        Ok(self.get()?)
    }
}

type CloseListener = Box<dyn FnOnce(SessionState) + Send>;

/// A unit of work bound to one pooled connection.
///
/// The transaction is opened lazily on first use. Work that has not been
/// committed when the session closes is rolled back. Dropping a session
/// closes it.
pub struct Session {
    conn: Option<PooledConn>,
    state: SessionState,
    on_close: Option<CloseListener>,
}

impl Session {
    /// Wraps a pooled connection in a new session.
    pub fn new(conn: PooledConn) -> Self {
        Self {
            conn: Some(conn),
            state: SessionState::Created,
            on_close: None,
        }
    }

    /// Registers a listener called once when the session closes, with the
    /// state the session was in just before closing.
    pub fn on_close<F>(mut self, listener: F) -> Self
    where
        F: FnOnce(SessionState) + Send + 'static,
    {
        self.on_close = Some(Box::new(listener));
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Whether a transaction is currently open on the underlying connection.
    pub fn in_transaction(&self) -> bool {
        self.conn.as_deref().is_some_and(|conn| !conn.is_autocommit())
    }

    /// Returns the connection, beginning a transaction if none is open.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Closed` after [`Session::close`], or `DbError::Sqlite`
    /// if the transaction cannot be started.
    pub fn connection(&mut self) -> Result<&Connection, DbError> {
        let conn = self.conn.as_deref().ok_or(DbError::Closed)?;
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }
        Ok(conn)
    }

    /// Executes a single statement inside the session's transaction.
    pub fn execute<P: Params>(&mut self, sql: &str, params: P) -> Result<usize, DbError> {
        Ok(self.connection()?.execute(sql, params)?)
    }

    /// Runs a query expected to return exactly one row.
    pub fn query_row<T, P, F>(&mut self, sql: &str, params: P, f: F) -> Result<T, DbError>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        Ok(self.connection()?.query_row(sql, params, f)?)
    }

    pub fn last_insert_rowid(&self) -> Result<i64, DbError> {
        let conn = self.conn.as_deref().ok_or(DbError::Closed)?;
        Ok(conn.last_insert_rowid())
    }

    /// Commits pending work. A no-op on the database if nothing is pending.
    ///
    /// On failure the transaction is left as SQLite left it, so a following
    /// [`Session::rollback`] can still discard it.
    pub fn commit(&mut self) -> Result<(), DbError> {
        let conn = self.conn.as_deref().ok_or(DbError::Closed)?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        self.state = SessionState::Committed;
        Ok(())
    }

    /// Discards pending work.
    ///
    /// On failure the state is left unchanged.
    pub fn rollback(&mut self) -> Result<(), DbError> {
        let conn = self.conn.as_deref().ok_or(DbError::Closed)?;
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        self.state = SessionState::RolledBack;
        Ok(())
    }

    /// Releases the connection back to the pool.
    ///
    /// Uncommitted work is discarded. Closing twice is a no-op, and the
    /// close listener runs exactly once even if discarding fails.
    pub fn close(&mut self) -> Result<(), DbError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };

        let prior = self.state;
        self.state = SessionState::Closed;

        let result = if conn.is_autocommit() {
            Ok(())
        } else {
            conn.execute_batch("ROLLBACK").map_err(DbError::from)
        };
        drop(conn);

        if let Some(listener) = self.on_close.take() {
            listener(prior);
        }

        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.close() {
            tracing::warn!("failed to discard pending work while dropping session: {}", e);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("in_transaction", &self.in_transaction())
            .finish_non_exhaustive()
    }
}
