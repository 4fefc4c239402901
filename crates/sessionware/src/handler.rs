//! Handlers, their invocation context, and the outcomes they signal.

use std::any::Any;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;

use axum::{
    body::Bytes,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use sessionware_db::DbError;
use thiserror::Error;

/// What a handler produces: a response, or an [`Interrupt`].
pub type HandlerResult = Result<Response, Interrupt>;

/// A synchronous request handler.
///
/// Handlers run on tokio's blocking pool, so they may call into SQLite
/// directly. Any `Fn(&mut Invocation) -> HandlerResult` is a handler.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, inv: &mut Invocation) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&mut Invocation) -> HandlerResult + Send + Sync + 'static,
{
    fn call(&self, inv: &mut Invocation) -> HandlerResult {
        self(inv)
    }
}

/// A shared, type-erased handler.
pub type BoxHandler = Arc<dyn Handler>;

/// Ways a handler can finish other than returning a response.
#[derive(Debug, Error)]
pub enum Interrupt {
    /// A redirect. This is a successful outcome.
    #[error("redirect")]
    Redirect(Redirect),

    /// An explicit error response, e.g. a 404 for a missing record.
    #[error("{0}")]
    Abort(#[from] HttpError),

    /// The storage layer failed.
    #[error(transparent)]
    Database(#[from] DbError),

    /// Anything else that went wrong in the handler.
    #[error("handler fault: {0}")]
    Fault(Box<dyn StdError + Send + Sync>),
}

impl Interrupt {
    /// A `303 See Other` redirect to `uri`.
    pub fn redirect(uri: &str) -> Self {
        Self::Redirect(Redirect::to(uri))
    }

    pub fn abort(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Abort(HttpError::new(status, message))
    }

    pub fn fault(error: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Fault(error.into())
    }
}

impl From<rusqlite::Error> for Interrupt {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DbError::Sqlite(e))
    }
}

impl IntoResponse for Interrupt {
    fn into_response(self) -> Response {
        match self {
            Interrupt::Redirect(redirect) => redirect.into_response(),
            Interrupt::Abort(error) => error.into_response(),
            Interrupt::Database(e) => {
                tracing::error!("request failed with database error: {}", e);
                HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
            Interrupt::Fault(e) => {
                tracing::error!("request failed with handler fault: {}", e);
                HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
        }
    }
}

/// An HTTP error response with a JSON `{"error": ...}` body.
#[derive(Debug, Clone, Error)]
#[error("{status}: {message}")]
pub struct HttpError {
    pub status: StatusCode,
    pub message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

/// Everything a handler sees about the current request.
///
/// Besides the request itself, an invocation carries named arguments that
/// plugins inject before the handler runs. Arguments are bound by name and
/// typed on retrieval.
pub struct Invocation {
    method: Method,
    uri: Uri,
    params: HashMap<String, String>,
    body: Bytes,
    args: HashMap<String, Box<dyn Any + Send>>,
}

impl Invocation {
    pub fn new(method: Method, uri: Uri, params: HashMap<String, String>, body: Bytes) -> Self {
        Self {
            method,
            uri,
            params,
            body,
            args: HashMap::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// A captured path parameter, e.g. `name` for `/{name}`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Binds `value` under `name`, replacing any previous argument.
    pub fn inject<T: Any + Send>(&mut self, name: impl Into<String>, value: T) {
        self.args.insert(name.into(), Box::new(value));
    }

    pub fn has_arg(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    /// Borrows the argument bound under `name`, if it has type `T`.
    pub fn arg<T: Any>(&mut self, name: &str) -> Option<&mut T> {
        self.args.get_mut(name)?.downcast_mut()
    }

    /// Like [`Invocation::arg`], but a missing argument is a handler fault.
    pub fn require<T: Any>(&mut self, name: &str) -> Result<&mut T, Interrupt> {
        self.arg(name)
            .ok_or_else(|| Interrupt::fault(format!("missing argument `{}`", name)))
    }

    /// Removes and returns the argument bound under `name`, if it has type `T`.
    ///
    /// An argument of another type is left in place.
    pub fn take_arg<T: Any>(&mut self, name: &str) -> Option<T> {
        let boxed = self.args.remove(name)?;
        match boxed.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.args.insert(name.to_string(), other);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation() -> Invocation {
        Invocation::new(
            Method::GET,
            Uri::from_static("/things/7"),
            HashMap::from([("id".to_string(), "7".to_string())]),
            Bytes::new(),
        )
    }

    #[test]
    fn args_are_bound_by_name_and_type() {
        let mut inv = invocation();
        inv.inject("count", 3_u32);

        assert!(inv.has_arg("count"));
        assert_eq!(inv.arg::<u32>("count").copied(), Some(3));
        assert!(inv.arg::<String>("count").is_none(), "wrong type is not returned");
        assert!(inv.arg::<u32>("other").is_none());
        assert_eq!(inv.param("id"), Some("7"));
    }

    #[test]
    fn take_arg_leaves_mismatched_type_in_place() {
        let mut inv = invocation();
        inv.inject("count", 3_u32);

        assert!(inv.take_arg::<String>("count").is_none());
        assert!(inv.has_arg("count"));
        assert_eq!(inv.take_arg::<u32>("count"), Some(3));
        assert!(!inv.has_arg("count"));
    }

    #[test]
    fn require_missing_is_fault() {
        let mut inv = invocation();
        let err = inv.require::<u32>("db").expect_err("argument is missing");
        assert!(matches!(err, Interrupt::Fault(_)));
        assert_eq!(err.to_string(), "handler fault: missing argument `db`");
    }

    #[test]
    fn interrupts_map_to_responses() {
        let redirect = Interrupt::redirect("/next").into_response();
        assert_eq!(redirect.status(), StatusCode::SEE_OTHER);
        assert_eq!(redirect.headers()["location"], "/next");

        let abort = Interrupt::abort(StatusCode::NOT_FOUND, "no such thing").into_response();
        assert_eq!(abort.status(), StatusCode::NOT_FOUND);

        let db = Interrupt::from(DbError::Closed).into_response();
        assert_eq!(db.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let fault = Interrupt::fault("boom").into_response();
        assert_eq!(fault.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
