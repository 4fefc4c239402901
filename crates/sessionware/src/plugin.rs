//! The session-scoping plugin.
//!
//! [`SessionPlugin`] gives each request that asks for it a fresh
//! [`Session`], injected under the plugin's keyword, and finalizes it once
//! the handler is done: successful outcomes (a response or a redirect) are
//! committed when auto-commit is on, everything else is rolled back, and the
//! session is always closed.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use sessionware_db::{Schema, Session, SessionSource};

use crate::app::{Plugin, RouteContext};
use crate::error::PluginError;
use crate::handler::{BoxHandler, Handler, HandlerResult, Interrupt, Invocation};

/// Name under which routes carry [`RouteOverride`] settings by default.
pub const DEFAULT_NAME: &str = "sqlite";

/// Argument name the session is injected under by default.
pub const DEFAULT_KEYWORD: &str = "db";

/// Settings shared by every route the plugin wraps.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Argument name the session is injected under.
    pub keyword: String,

    /// Create missing schema tables before the first wrapped route is bound.
    pub create: bool,

    /// Commit after a successful response or redirect.
    pub commit: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            keyword: DEFAULT_KEYWORD.to_string(),
            create: false,
            commit: true,
        }
    }
}

impl PluginConfig {
    /// Returns the settings for one route, leaving `self` untouched.
    pub fn overlay(&self, route: &RouteOverride) -> PluginConfig {
        PluginConfig {
            keyword: route.keyword.clone().unwrap_or_else(|| self.keyword.clone()),
            create: route.create.unwrap_or(self.create),
            commit: route.commit.unwrap_or(self.commit),
        }
    }
}

/// Per-route settings, read from the route's config under the plugin name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteOverride {
    pub keyword: Option<String>,
    pub create: Option<bool>,
    pub commit: Option<bool>,
}

/// Opens, injects and finalizes a [`Session`] per request.
pub struct SessionPlugin {
    name: String,
    config: PluginConfig,
    source: Arc<dyn SessionSource>,
    schema: Option<Schema>,
    schema_ready: AtomicBool,
}

impl SessionPlugin {
    pub fn builder<S: SessionSource>(source: S) -> SessionPluginBuilder {
        SessionPluginBuilder {
            name: DEFAULT_NAME.to_string(),
            config: PluginConfig::default(),
            source: Arc::new(source),
            schema: None,
        }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    fn check_schema(&self, create: bool) -> Result<(), PluginError> {
        if create && self.schema.is_none() {
            return Err(PluginError::ConfigurationConflict(
                "auto-create requested but no schema was given".to_string(),
            ));
        }
        Ok(())
    }

    /// Creates missing tables the first time a route needs them.
    ///
    /// Racing callers may both run `create_all`; it skips tables that exist.
    fn ensure_schema(&self) -> Result<(), PluginError> {
        if self.schema_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let Some(schema) = self.schema.as_ref() else {
            return Err(PluginError::ConfigurationConflict(
                "auto-create requested but no schema was given".to_string(),
            ));
        };

        let mut conn = self.source.connect()?;
        let created = schema.create_all(&mut conn)?;
        self.schema_ready.store(true, Ordering::Release);

        tracing::debug!(plugin = %self.name, created, "schema ready");
        Ok(())
    }
}

impl Plugin for SessionPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&self, installed: &[Arc<dyn Plugin>]) -> Result<(), PluginError> {
        let conflict = installed
            .iter()
            .filter_map(|p| p.as_any().downcast_ref::<SessionPlugin>())
            .any(|other| other.config.keyword == self.config.keyword);
        if conflict {
            return Err(PluginError::ConfigurationConflict(format!(
                "another session plugin already injects `{}`",
                self.config.keyword
            )));
        }

        self.check_schema(self.config.create)
    }

    fn apply(&self, handler: BoxHandler, route: &RouteContext) -> Result<BoxHandler, PluginError> {
        let config = match route.config(&self.name) {
            Some(value) => {
                let route_override = RouteOverride::deserialize(value).map_err(|e| {
                    PluginError::ConfigurationConflict(format!(
                        "invalid `{}` settings on {} {}: {}",
                        self.name,
                        route.method(),
                        route.path(),
                        e
                    ))
                })?;
                self.config.overlay(&route_override)
            }
            None => self.config.clone(),
        };

        if !route.declares(&config.keyword) {
            return Ok(handler);
        }

        if config.create {
            self.ensure_schema()?;
        }

        Ok(Arc::new(ScopedHandler {
            inner: handler,
            source: self.source.clone(),
            route: format!("{} {}", route.method(), route.path()),
            keyword: config.keyword,
            commit: config.commit,
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Builder for [`SessionPlugin`].
pub struct SessionPluginBuilder {
    name: String,
    config: PluginConfig,
    source: Arc<dyn SessionSource>,
    schema: Option<Schema>,
}

impl SessionPluginBuilder {
    /// Registered name; routes put their overrides under this key.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replaces keyword, create and commit at once.
    pub fn config(mut self, config: PluginConfig) -> Self {
        self.config = config;
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.config.keyword = keyword.into();
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        self.config.create = create;
        self
    }

    pub fn commit(mut self, commit: bool) -> Self {
        self.config.commit = commit;
        self
    }

    /// # Errors
    ///
    /// Returns `ConfigurationConflict` if auto-create is on without a schema.
    pub fn build(self) -> Result<SessionPlugin, PluginError> {
        let plugin = SessionPlugin {
            name: self.name,
            config: self.config,
            source: self.source,
            schema: self.schema,
            schema_ready: AtomicBool::new(false),
        };
        plugin.check_schema(plugin.config.create)?;
        Ok(plugin)
    }
}

/// A route handler running inside a session.
struct ScopedHandler {
    inner: BoxHandler,
    source: Arc<dyn SessionSource>,
    route: String,
    keyword: String,
    commit: bool,
}

impl ScopedHandler {
    fn finalize(&self, session: &mut Session, result: HandlerResult) -> HandlerResult {
        match result {
            Ok(response) => self.commit_then(session, Ok(response)),
            Err(Interrupt::Redirect(redirect)) => {
                self.commit_then(session, Err(Interrupt::Redirect(redirect)))
            }
            Err(
                interrupt @ (Interrupt::Abort(_) | Interrupt::Database(_) | Interrupt::Fault(_)),
            ) => {
                self.rollback(session);
                Err(interrupt)
            }
        }
    }

    /// Commits if configured to, then hands back `outcome`.
    ///
    /// A failed commit is rolled back and replaces `outcome`.
    fn commit_then(&self, session: &mut Session, outcome: HandlerResult) -> HandlerResult {
        if !self.commit {
            return outcome;
        }

        match session.commit() {
            Ok(()) => {
                tracing::debug!(route = %self.route, keyword = %self.keyword, "committed session");
                outcome
            }
            Err(e) => {
                tracing::warn!(route = %self.route, keyword = %self.keyword, "commit failed: {}", e);
                self.rollback(session);
                Err(Interrupt::Database(e))
            }
        }
    }

    fn rollback(&self, session: &mut Session) {
        match session.rollback() {
            Ok(()) => {
                tracing::debug!(route = %self.route, keyword = %self.keyword, "rolled back session")
            }
            Err(e) => {
                tracing::warn!(route = %self.route, keyword = %self.keyword, "rollback failed: {}", e)
            }
        }
    }
}

impl Handler for ScopedHandler {
    fn call(&self, inv: &mut Invocation) -> HandlerResult {
        let session = self.source.open()?;
        tracing::debug!(route = %self.route, keyword = %self.keyword, "opened session");

        inv.inject(self.keyword.clone(), session);
        let result = self.inner.call(inv);

        let Some(mut session) = inv.take_arg::<Session>(&self.keyword) else {
            tracing::warn!(
                route = %self.route,
                keyword = %self.keyword,
                "handler removed its session; skipping finalization"
            );
            return result;
        };

        if session.is_closed() {
            tracing::debug!(
                route = %self.route,
                keyword = %self.keyword,
                "handler closed its session; skipping finalization"
            );
            return result;
        }

        let result = self.finalize(&mut session, result);

        if let Err(e) = session.close() {
            tracing::warn!(route = %self.route, keyword = %self.keyword, "failed to close session: {}", e);
        }
        tracing::debug!(route = %self.route, keyword = %self.keyword, "closed session");

        result
    }
}
