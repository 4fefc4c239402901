//! Demo server for sessionware.
//!
//! A small user directory where every route that declares the session
//! keyword gets a request-scoped session from [`SessionPlugin`].

pub mod config;
pub mod users;

use axum::{response::IntoResponse, Json, Router};
use serde_json::json;
use sessionware::{
    App, HandlerResult, Invocation, PluginConfig, PluginError, Route, Schema, SessionPlugin,
};
use sessionware_db::DbPool;
use tower_http::trace::TraceLayer;

/// Tables the demo needs.
pub fn schema() -> Schema {
    Schema::new().table(
        "users",
        "CREATE TABLE users (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             name TEXT NOT NULL UNIQUE,
             created_at TEXT NOT NULL DEFAULT (datetime('now'))
         )",
    )
}

/// Health check handler.
fn health(_: &mut Invocation) -> HandlerResult {
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
    .into_response())
}

/// Builds the application router with all routes.
///
/// Data routes declare `session.keyword` and read their session under it.
///
/// # Errors
///
/// Returns `PluginError` if the plugin settings are invalid or the schema
/// cannot be created.
pub fn app(pool: DbPool, session: PluginConfig) -> Result<Router, PluginError> {
    let session_keyword = session.keyword.clone();
    let plugin = SessionPlugin::builder(pool.clone())
        .schema(schema())
        .config(session)
        .build()?;

    let mut app = App::new();
    app.install(plugin)?;

    let keyword = session_keyword.as_str();
    let list_keyword = session_keyword.clone();
    let show_keyword = session_keyword.clone();
    let put_keyword = session_keyword.clone();
    let delete_pool = pool;

    app.route(Route::get("/health", &[], health))
        .route(Route::get(
            "/",
            &[keyword],
            move |inv: &mut Invocation| -> HandlerResult { users::list_users(inv, &list_keyword) },
        ))
        .route(Route::get(
            "/{name}",
            &["name", keyword],
            move |inv: &mut Invocation| -> HandlerResult { users::show_user(inv, &show_keyword) },
        ))
        .route(Route::put(
            "/{name}",
            &["name", keyword],
            move |inv: &mut Invocation| -> HandlerResult { users::put_user(inv, &put_keyword) },
        ))
        .route(Route::delete(
            "/{name}",
            &["name"],
            move |inv: &mut Invocation| -> HandlerResult { users::delete_user(&delete_pool, inv) },
        ));

    Ok(app.into_router()?.layer(TraceLayer::new_for_http()))
}
