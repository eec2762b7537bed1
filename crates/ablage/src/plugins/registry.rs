//! Stage registration and resolution.
//!
//! [`StageRegistry`] maps stable string keys to stage factories. At startup the
//! configured, ordered list of keys is resolved into a [`StageSet`]: each
//! stage is constructed and initialized exactly once and the set is immutable
//! afterwards. An unknown key is a fatal configuration error.

use crate::core::config::PipelineConfig;
use crate::plugins::Stage;
use crate::{AblageError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Constructs a stage from the pipeline configuration.
///
/// Each stage pulls its own section (API keys, endpoints, flags) from the
/// config at construction time.
pub type StageFactory = Arc<dyn Fn(&PipelineConfig) -> Result<Arc<dyn Stage>> + Send + Sync>;

/// Validate a plugin name before registration.
///
/// # Rules
///
/// - Name cannot be empty
/// - Name cannot contain whitespace
fn validate_plugin_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AblageError::configuration("Plugin name cannot be empty"));
    }

    if name.contains(char::is_whitespace) {
        return Err(AblageError::configuration(format!(
            "Plugin name '{}' cannot contain whitespace",
            name
        )));
    }

    Ok(())
}

/// Registry of stage factories keyed by identifier.
///
/// # Example
///
/// ```rust
/// use ablage::core::config::PipelineConfig;
/// use ablage::plugins::registry::StageRegistry;
///
/// let registry = StageRegistry::with_builtins();
/// let mut config = PipelineConfig::default();
/// config.stages = vec!["text-extraction".to_string(), "search-vector".to_string()];
///
/// let stages = registry.resolve(&config)?;
/// assert_eq!(stages.names(), vec!["text-extraction", "search-vector"]);
/// # Ok::<(), ablage::AblageError>(())
/// ```
#[derive(Clone, Default)]
pub struct StageRegistry {
    factories: BTreeMap<String, StageFactory>,
}

impl StageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in stages registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::stages::register_builtins(&mut registry);
        registry
    }

    /// Register a factory under `key`. A later registration for the same key
    /// replaces the earlier one.
    pub fn register_factory<F>(&mut self, key: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(&PipelineConfig) -> Result<Arc<dyn Stage>> + Send + Sync + 'static,
    {
        let key = key.into();
        validate_plugin_name(&key)?;
        self.factories.insert(key, Arc::new(factory));
        Ok(())
    }

    /// Built-in keys are fixed, valid identifiers.
    pub(crate) fn insert_builtin<F>(&mut self, key: &'static str, factory: F)
    where
        F: Fn(&PipelineConfig) -> Result<Arc<dyn Stage>> + Send + Sync + 'static,
    {
        self.factories.insert(key.to_string(), Arc::new(factory));
    }

    /// Register an already constructed stage under its own name.
    pub fn register_instance(&mut self, stage: Arc<dyn Stage>) -> Result<()> {
        let key = stage.name().to_string();
        self.register_factory(key, move |_| Ok(Arc::clone(&stage)))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Resolve the configured stage list into live stages.
    ///
    /// Order follows `config.stages`. A key listed twice yields the same
    /// instance twice; every instance is initialized exactly once.
    ///
    /// # Errors
    ///
    /// `AblageError::Configuration` for an unknown key, a stage reporting an
    /// invalid name, or a factory/initialization failure.
    pub fn resolve(&self, config: &PipelineConfig) -> Result<StageSet> {
        let mut instances: HashMap<&str, Arc<dyn Stage>> = HashMap::new();
        let mut ordered = Vec::with_capacity(config.stages.len());

        for key in &config.stages {
            let key = key.as_str();
            validate_plugin_name(key)?;

            if let Some(existing) = instances.get(key) {
                tracing::warn!(stage = key, "Stage listed more than once; reusing the same instance");
                ordered.push(Arc::clone(existing));
                continue;
            }

            let factory = self.factories.get(key).ok_or_else(|| {
                AblageError::configuration(format!(
                    "Unknown stage '{}' (known stages: {})",
                    key,
                    self.keys().join(", ")
                ))
            })?;

            let stage = factory(config).map_err(|e| {
                AblageError::configuration_with_source(format!("Failed to construct stage '{}'", key), e)
            })?;
            validate_plugin_name(stage.name())?;

            stage.initialize().map_err(|e| {
                AblageError::configuration_with_source(format!("Failed to initialize stage '{}'", key), e)
            })?;

            tracing::debug!(stage = key, version = %stage.version(), "Stage initialized");
            instances.insert(key, Arc::clone(&stage));
            ordered.push(stage);
        }

        Ok(StageSet {
            stages: ordered.into(),
        })
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry").field("keys", &self.keys()).finish()
    }
}

/// Immutable, ordered set of initialized stages.
#[derive(Clone)]
pub struct StageSet {
    stages: Arc<[Arc<dyn Stage>]>,
}

impl StageSet {
    /// Build a set directly from stages, initializing each distinct instance once.
    pub fn from_stages(stages: Vec<Arc<dyn Stage>>) -> Result<Self> {
        let mut seen: Vec<*const ()> = Vec::new();
        for stage in &stages {
            let ptr = Arc::as_ptr(stage) as *const ();
            if !seen.contains(&ptr) {
                validate_plugin_name(stage.name())?;
                stage.initialize()?;
                seen.push(ptr);
            }
        }
        Ok(Self { stages: stages.into() })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Stage>> {
        self.stages.iter()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Call `shutdown` once on every distinct stage. Errors are logged.
    pub fn shutdown_all(&self) {
        let mut seen: Vec<*const ()> = Vec::new();
        for stage in self.stages.iter() {
            let ptr = Arc::as_ptr(stage) as *const ();
            if seen.contains(&ptr) {
                continue;
            }
            seen.push(ptr);

            if let Err(e) = stage.shutdown() {
                tracing::warn!(stage = stage.name(), error = %e, "Stage shutdown failed");
            }
        }
    }
}

impl std::fmt::Debug for StageSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
