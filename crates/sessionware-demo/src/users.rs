//! User handlers for the demo server.
//!
//! All but [`delete_user`] receive their session from the plugin, under the
//! keyword the plugin was configured with. Deleting manages a session by hand
//! to show what the plugin does for the others.

use axum::{
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use rusqlite::OptionalExtension;
use serde::Serialize;
use sessionware::{HandlerResult, Interrupt, Invocation, Session, SessionSource};
use sessionware_db::{DbError, DbPool};

#[derive(Debug, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
}

fn name_param(inv: &Invocation) -> Result<String, Interrupt> {
    inv.param("name")
        .map(str::to_string)
        .ok_or_else(|| Interrupt::abort(StatusCode::BAD_REQUEST, "missing user name"))
}

/// Handler for `GET /`.
pub fn list_users(inv: &mut Invocation, keyword: &str) -> HandlerResult {
    let db = inv.require::<Session>(keyword)?;
    let conn = db.connection()?;

    let mut stmt = conn.prepare("SELECT id, name FROM users ORDER BY id")?;
    let users = stmt
        .query_map([], |row| {
            Ok(User {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(users).into_response())
}

/// Handler for `GET /{name}`.
pub fn show_user(inv: &mut Invocation, keyword: &str) -> HandlerResult {
    let name = name_param(inv)?;
    let db = inv.require::<Session>(keyword)?;

    let user = db
        .connection()?
        .query_row(
            "SELECT id, name FROM users WHERE name = ?1",
            [&name],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .optional()?;

    match user {
        Some(user) => Ok(Json(user).into_response()),
        None => Err(Interrupt::abort(StatusCode::NOT_FOUND, "user not found")),
    }
}

/// Handler for `PUT /{name}`.
///
/// The `UNIQUE` constraint on `users.name` decides conflicts, so the insert
/// is the first statement of the transaction.
pub fn put_user(inv: &mut Invocation, keyword: &str) -> HandlerResult {
    let name = name_param(inv)?;
    let db = inv.require::<Session>(keyword)?;

    match db.execute("INSERT INTO users (name) VALUES (?1)", [&name]) {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(Interrupt::abort(StatusCode::CONFLICT, "user already exists"));
        }
        Err(e) => return Err(e.into()),
    }
    let id = db.last_insert_rowid()?;

    Ok((StatusCode::CREATED, Json(User { id, name })).into_response())
}

fn is_unique_violation(err: &DbError) -> bool {
    matches!(
        err,
        DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Handler for `DELETE /{name}`, which opens its own session.
pub fn delete_user(pool: &DbPool, inv: &mut Invocation) -> HandlerResult {
    let name = name_param(inv)?;
    let mut session = pool.open()?;

    let deleted = match session.execute("DELETE FROM users WHERE name = ?1", [&name]) {
        Ok(deleted) => deleted,
        Err(e) => {
            if let Err(rollback) = session.rollback() {
                tracing::warn!(user = %name, "rollback failed: {}", rollback);
            }
            return Err(e.into());
        }
    };

    if deleted == 0 {
        session.close()?;
        return Err(Interrupt::abort(StatusCode::NOT_FOUND, "user not found"));
    }

    session.commit()?;
    session.close()?;
    tracing::info!(user = %name, "deleted user");

    Ok(StatusCode::NO_CONTENT.into_response())
}
