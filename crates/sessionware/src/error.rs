//! Errors raised while installing plugins and binding routes.

use sessionware_db::DbError;

/// Errors that can occur at install or bind time.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The plugin's settings clash with another plugin or cannot be satisfied.
    #[error("configuration conflict: {0}")]
    ConfigurationConflict(String),

    /// Creating the schema failed while binding a route.
    #[error("failed to prepare schema: {0}")]
    Schema(#[from] DbError),
}
