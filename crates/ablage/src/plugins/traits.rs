//! Identity and lifecycle shared by every pipeline plugin.

use crate::Result;

/// Base trait for pipeline plugins.
///
/// A plugin is built once by its registry factory, initialized when the stage
/// set is resolved and shut down with the pipeline. Between those points one
/// instance serves every document, possibly from several workers at once, so
/// implementations are `Send + Sync` and keep mutable state behind interior
/// mutability.
///
/// # Example
///
/// ```rust
/// use ablage::plugins::Plugin;
/// use ablage::{AblageError, Result};
/// use std::sync::OnceLock;
///
/// struct RenderServicePlugin {
///     endpoint: Option<String>,
///     resolved: OnceLock<String>,
/// }
///
/// impl Plugin for RenderServicePlugin {
///     fn name(&self) -> &str {
///         "render-service"
///     }
///
///     fn version(&self) -> String {
///         env!("CARGO_PKG_VERSION").to_string()
///     }
///
///     fn initialize(&self) -> Result<()> {
///         let endpoint = self
///             .endpoint
///             .clone()
///             .ok_or_else(|| AblageError::configuration("render-service needs an endpoint"))?;
///         let _ = self.resolved.set(endpoint);
///         Ok(())
///     }
///
///     fn shutdown(&self) -> Result<()> {
///         Ok(())
///     }
/// }
///
/// let plugin = RenderServicePlugin { endpoint: None, resolved: OnceLock::new() };
/// assert!(plugin.initialize().is_err());
/// ```
pub trait Plugin: Send + Sync {
    /// Stage key as used in configuration, logs and reports (`"text-extraction"`).
    fn name(&self) -> &str;

    fn version(&self) -> String;

    /// Runs once during stage resolution.
    ///
    /// # Errors
    ///
    /// Any error aborts resolution and is surfaced as a startup failure.
    fn initialize(&self) -> Result<()>;

    /// Runs once on pipeline shutdown. A failure is logged and the remaining
    /// plugins are still shut down.
    fn shutdown(&self) -> Result<()>;

    fn description(&self) -> &str {
        ""
    }
}
