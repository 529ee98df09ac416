//! Pluggable file serving.
//!
//! A component may register its own [`ServingStrategy`]; components without
//! one are served by [`DefaultServing`]. Every strategy runs the base access
//! check before it transmits anything.

mod default;
mod folder;
mod send;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use filegate_core::access::ContextInfo;
use filegate_core::path::validate_component;
use filegate_core::policy::ServingRules;
use filegate_core::session::Session;
use filegate_core::{Error, Result};

use crate::store::{Store, StoredFile};

pub use default::{DefaultServing, check_file_access};
pub use folder::FolderServing;
pub use send::{
    BufferedResponse, Cacheability, ResponseSink, SendFileOptions, SendParams, Transmission,
    send_stored_file,
};

/// Collaborators for one serve call.
pub struct ServeContext<'a> {
    pub store: &'a mut dyn Store,
    pub session: &'a dyn Session,
    pub sink: &'a mut dyn ResponseSink,
    pub rules: &'a ServingRules,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    Sent,
    /// The strategy does not serve this file; nothing was transmitted.
    Unhandled,
}

pub trait ServingStrategy: Send + Sync {
    fn component(&self) -> &str;

    fn get_stored_file(
        &self,
        store: &mut dyn Store,
        context_id: i64,
        area: &str,
        args: &[String],
    ) -> Result<Option<StoredFile>>;

    /// Returns the context the file lives in when access is allowed.
    fn check_access(&self, ctx: &mut ServeContext<'_>, file: &StoredFile) -> Result<ContextInfo>;

    fn serve(
        &self,
        ctx: &mut ServeContext<'_>,
        file: &StoredFile,
        force_download: bool,
        options: &SendFileOptions,
    ) -> Result<ServeOutcome>;
}

pub type StrategyFactory = Arc<dyn Fn(&str) -> Box<dyn ServingStrategy> + Send + Sync>;

/// Name a component's strategy is registered under.
pub fn strategy_type_name(component: &str) -> String {
    format!("{component}::files::serving")
}

/// Component name -> strategy factory. Filled at startup, read-only afterwards.
#[derive(Clone, Default)]
pub struct ServingRegistry {
    factories: HashMap<String, StrategyFactory>,
}

impl fmt::Debug for ServingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServingRegistry")
            .field("components", &self.components())
            .finish()
    }
}

impl ServingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the strategies shipped in this crate.
    pub fn with_builtin() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(FolderServing::COMPONENT, |_| Box::new(FolderServing::new()))?;
        Ok(registry)
    }

    /// Validates the factory once, up front: the name must be a plugin name,
    /// not yet taken, and the strategy built for it must report that name.
    pub fn register<F>(&mut self, component: &str, factory: F) -> Result<()>
    where
        F: Fn(&str) -> Box<dyn ServingStrategy> + Send + Sync + 'static,
    {
        validate_component(component).map_err(|err| {
            Error::Configuration(format!(
                "cannot register {}: {err}",
                strategy_type_name(component)
            ))
        })?;
        if self.factories.contains_key(component) {
            return Err(Error::Configuration(format!(
                "{} is already registered",
                strategy_type_name(component)
            )));
        }

        let probe = factory(component);
        if probe.component() != component {
            tracing::error!(
                component,
                reported = probe.component(),
                "serving strategy reports a different component"
            );
            return Err(Error::Configuration(format!(
                "{} builds a strategy for {:?}",
                strategy_type_name(component),
                probe.component()
            )));
        }

        tracing::debug!(strategy = %strategy_type_name(component), "registered serving strategy");
        self.factories
            .insert(component.to_string(), Arc::new(factory));
        Ok(())
    }

    /// `None` means the component has no custom serving; use [`DefaultServing`].
    pub fn resolve(&self, component: &str) -> Option<Box<dyn ServingStrategy>> {
        self.factories
            .get(component)
            .map(|factory| factory(component))
    }

    pub fn components(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
