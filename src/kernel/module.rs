//! Module contract - what every feature module implements

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;

use super::BotCore;
use crate::application::errors::ModuleError;
use crate::application::messaging::Handler;

/// Handlers and commands a module hands back from `setup`
#[derive(Debug, Default)]
pub struct ModuleSetup {
    pub handlers: Vec<Handler>,
    pub commands: Vec<String>,
}

impl ModuleSetup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(mut self, handler: Handler) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn command(mut self, name: impl Into<String>) -> Self {
        self.commands.push(name.into());
        self
    }
}

/// A resource a module offers to the rest of the bot.
///
/// Only names ending in `_manager` are ever bound onto the core.
#[derive(Clone)]
pub struct SharedResource {
    pub name: String,
    pub handle: Arc<dyn Any + Send + Sync>,
}

impl SharedResource {
    pub fn new<T: Any + Send + Sync>(name: impl Into<String>, value: Arc<T>) -> Self {
        Self {
            name: name.into(),
            handle: value,
        }
    }
}

impl std::fmt::Debug for SharedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedResource").field("name", &self.name).finish()
    }
}

/// Feature module lifecycle.
///
/// `setup` receives the core once every module of the cycle has been
/// imported and every `_manager` resource has been bound, so lookups of
/// other modules' managers succeed regardless of discovery order.
#[async_trait]
pub trait Module: Send + Sync {
    async fn setup(&self, core: &Arc<BotCore>) -> Result<ModuleSetup, ModuleError>;

    /// Teardown before the instance is dropped
    async fn cleanup(&self, _core: &BotCore) -> Result<(), ModuleError> {
        Ok(())
    }

    fn resources(&self) -> Vec<SharedResource> {
        Vec::new()
    }

    /// Public entry points, listed in the module status
    fn exports(&self) -> Vec<&'static str> {
        vec!["setup"]
    }
}
