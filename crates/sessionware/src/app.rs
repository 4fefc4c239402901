//! Route binding: plugins, routes, and the router they build.
//!
//! An [`App`] collects plugins and routes. Installing a plugin runs its
//! [`Plugin::setup`] against the plugins already installed. Routes are bound
//! once, in [`App::into_router`], where every plugin gets to wrap every route
//! handler through [`Plugin::apply`]. The first plugin installed ends up
//! outermost.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::RawPathParams,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{on, MethodFilter},
    Router,
};
use serde_json::Value;

use crate::error::PluginError;
use crate::handler::{BoxHandler, Handler, HttpError, Invocation};

/// A component that wraps route handlers.
pub trait Plugin: Send + Sync + 'static {
    /// Name under which routes carry configuration for this plugin.
    fn name(&self) -> &str;

    /// Validates the plugin against those already installed on the app.
    fn setup(&self, _installed: &[Arc<dyn Plugin>]) -> Result<(), PluginError> {
        Ok(())
    }

    /// Wraps `handler` for the route described by `route`.
    ///
    /// Returning `handler` itself leaves the route untouched.
    fn apply(&self, handler: BoxHandler, route: &RouteContext) -> Result<BoxHandler, PluginError>;

    /// Lets plugins recognize siblings of their own type during setup.
    fn as_any(&self) -> &dyn Any;
}

/// Bind-time description of a route.
#[derive(Debug, Clone)]
pub struct RouteContext {
    method: Method,
    path: String,
    params: Vec<String>,
    config: HashMap<String, Value>,
}

impl RouteContext {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Names the handler declares as parameters.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn declares(&self, name: &str) -> bool {
        self.params.iter().any(|p| p == name)
    }

    /// Route configuration for the plugin registered as `plugin`.
    pub fn config(&self, plugin: &str) -> Option<&Value> {
        self.config.get(plugin)
    }
}

/// A handler together with its method, path and declared parameters.
pub struct Route {
    context: RouteContext,
    handler: BoxHandler,
}

impl Route {
    /// Creates a route.
    ///
    /// `params` lists every parameter the handler consumes, path parameters
    /// and injected arguments alike. Plugins only inject arguments whose
    /// names appear here.
    pub fn new<H: Handler>(method: Method, path: impl Into<String>, params: &[&str], handler: H) -> Self {
        Self {
            context: RouteContext {
                method,
                path: path.into(),
                params: params.iter().map(|p| p.to_string()).collect(),
                config: HashMap::new(),
            },
            handler: Arc::new(handler),
        }
    }

    pub fn get<H: Handler>(path: impl Into<String>, params: &[&str], handler: H) -> Self {
        Self::new(Method::GET, path, params, handler)
    }

    pub fn post<H: Handler>(path: impl Into<String>, params: &[&str], handler: H) -> Self {
        Self::new(Method::POST, path, params, handler)
    }

    pub fn put<H: Handler>(path: impl Into<String>, params: &[&str], handler: H) -> Self {
        Self::new(Method::PUT, path, params, handler)
    }

    pub fn delete<H: Handler>(path: impl Into<String>, params: &[&str], handler: H) -> Self {
        Self::new(Method::DELETE, path, params, handler)
    }

    /// Attaches configuration for the plugin registered as `plugin`.
    pub fn config(mut self, plugin: impl Into<String>, value: Value) -> Self {
        self.context.config.insert(plugin.into(), value);
        self
    }

    pub fn context(&self) -> &RouteContext {
        &self.context
    }
}

/// Plugins and routes, bound into an [`axum::Router`] by [`App::into_router`].
#[derive(Default)]
pub struct App {
    plugins: Vec<Arc<dyn Plugin>>,
    routes: Vec<Route>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a plugin after validating it against those already installed.
    ///
    /// # Errors
    ///
    /// Returns whatever the plugin's [`Plugin::setup`] rejects; the plugin is
    /// not installed in that case.
    pub fn install<P: Plugin>(&mut self, plugin: P) -> Result<&mut Self, PluginError> {
        plugin.setup(&self.plugins)?;
        tracing::debug!(plugin = plugin.name(), "installed plugin");
        self.plugins.push(Arc::new(plugin));
        Ok(self)
    }

    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub fn route(&mut self, route: Route) -> &mut Self {
        self.routes.push(route);
        self
    }

    /// Binds every route through the installed plugins and builds the router.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a plugin's [`Plugin::apply`], or a
    /// `ConfigurationConflict` for a method axum cannot route.
    pub fn into_router(self) -> Result<Router, PluginError> {
        let mut router = Router::new();

        for route in self.routes {
            let handler = bind(&self.plugins, route.handler, &route.context)?;
            let filter = MethodFilter::try_from(route.context.method.clone()).map_err(|_| {
                PluginError::ConfigurationConflict(format!(
                    "unsupported method {} for {}",
                    route.context.method, route.context.path
                ))
            })?;

            tracing::debug!(
                method = %route.context.method,
                path = %route.context.path,
                "bound route"
            );

            let endpoint = move |params: RawPathParams, method: Method, uri: Uri, body: Bytes| {
                let params = params
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect();
                dispatch(handler.clone(), Invocation::new(method, uri, params, body))
            };
            router = router.route(&route.context.path, on(filter, endpoint));
        }

        Ok(router)
    }
}

/// Applies plugins innermost first, so the first installed wraps outermost.
fn bind(
    plugins: &[Arc<dyn Plugin>],
    handler: BoxHandler,
    route: &RouteContext,
) -> Result<BoxHandler, PluginError> {
    plugins
        .iter()
        .rev()
        .try_fold(handler, |handler, plugin| plugin.apply(handler, route))
}

/// Runs a bound handler on the blocking pool and renders its outcome.
async fn dispatch(handler: BoxHandler, mut inv: Invocation) -> Response {
    let path = inv.uri().path().to_string();

    match tokio::task::spawn_blocking(move || handler.call(&mut inv)).await {
        Ok(Ok(response)) => response,
        Ok(Err(interrupt)) => interrupt.into_response(),
        Err(e) => {
            tracing::error!(path = %path, "handler task failed: {}", e);
            HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, "handler panicked").into_response()
        }
    }
}
