//! Request-scoped database sessions for axum.
//!
//! [`SessionPlugin`] opens a [`Session`] for every request whose route
//! declares the plugin's keyword, injects it into the [`Invocation`] under
//! that name, and finalizes it when the handler returns:
//!
//! | handler outcome                 | session action            |
//! |---------------------------------|---------------------------|
//! | `Ok(response)`                  | commit (if auto-commit)   |
//! | `Err(Interrupt::Redirect)`      | commit (if auto-commit)   |
//! | `Err(Interrupt::Abort)`         | rollback                  |
//! | `Err(Interrupt::Database)`      | rollback                  |
//! | `Err(Interrupt::Fault)`         | rollback                  |
//!
//! The session is closed on every path, and the handler's outcome is passed
//! through untouched.
//!
//! Plugins attach to routes through [`App`], a thin binding layer over
//! [`axum::Router`]: plugins are installed once, each route is wrapped once
//! when [`App::into_router`] runs, and nothing is inspected per request.
//!
//! ```rust,ignore
//! let plugin = SessionPlugin::builder(pool)
//!     .schema(schema)
//!     .create(true)
//!     .build()?;
//!
//! let mut app = App::new();
//! app.install(plugin)?;
//! app.route(Route::put("/{name}", &["name", "db"], |inv: &mut Invocation| {
//!     let name = inv.param("name").unwrap_or_default().to_string();
//!     let db = inv.require::<Session>("db")?;
//!     db.execute("INSERT INTO users (name) VALUES (?1)", [name])?;
//!     Ok(StatusCode::CREATED.into_response())
//! }));
//! let router = app.into_router()?;
//! ```

pub mod app;
pub mod error;
pub mod handler;
pub mod plugin;

pub use app::{App, Plugin, Route, RouteContext};
pub use error::PluginError;
pub use handler::{BoxHandler, Handler, HandlerResult, HttpError, Interrupt, Invocation};
pub use plugin::{PluginConfig, RouteOverride, SessionPlugin, SessionPluginBuilder};
pub use sessionware_db::{Schema, Session, SessionSource, SessionState};
