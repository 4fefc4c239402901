#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use sessionware::{Schema, Session, SessionSource, SessionState};
use sessionware_db::{create_pool, DbError, DbPool, DbRuntimeSettings, PooledConn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

/// A file-backed pool, so committed rows are visible across connections.
pub struct TestDb {
    _dir: TempDir,
    pub pool: DbPool,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("test.db");
        let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default())
            .expect("failed to create pool");
        Self { _dir: dir, pool }
    }

    /// Same as [`TestDb::new`], with the entity table already created.
    pub fn with_entity() -> Self {
        let db = Self::new();
        let mut conn = db.pool.get().expect("failed to get connection");
        entity_schema()
            .create_all(&mut conn)
            .expect("failed to create schema");
        drop(conn);
        db
    }

    pub fn count(&self, table: &str) -> i64 {
        self.pool
            .get()
            .expect("failed to get connection")
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .expect("failed to count rows")
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.pool
            .get()
            .expect("failed to get connection")
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                [table],
                |row| row.get(0),
            )
            .expect("failed to query sqlite_master")
    }
}

pub fn entity_schema() -> Schema {
    Schema::new().table(
        "entity",
        "CREATE TABLE entity (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)",
    )
}

/// Session source that records how many sessions were opened and the state
/// each one was closed from.
#[derive(Clone)]
pub struct CountingSource {
    pool: DbPool,
    opened: Arc<AtomicUsize>,
    closed: Arc<Mutex<Vec<SessionState>>>,
}

impl CountingSource {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> Vec<SessionState> {
        self.closed.lock().unwrap().clone()
    }
}

impl SessionSource for CountingSource {
    fn connect(&self) -> Result<PooledConn, DbError> {
        self.pool.connect()
    }

    fn open(&self) -> Result<Session, DbError> {
        let session = Session::new(self.connect()?);
        self.opened.fetch_add(1, Ordering::SeqCst);
        let closed = self.closed.clone();
        Ok(session.on_close(move |state| closed.lock().unwrap().push(state)))
    }
}

pub async fn send(router: &Router, method: &str, uri: &str) -> Response {
    router
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub fn assert_status(response: &Response, status: StatusCode) {
    assert_eq!(response.status(), status, "unexpected status");
}
