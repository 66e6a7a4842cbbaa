//! Module registry - discovers, instantiates and tracks feature modules

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::module::Module;
use crate::application::errors::ModuleError;
use crate::application::messaging::HandlerId;

/// Factory producing a fresh module instance
pub type ModuleFactory = Arc<dyn Fn() -> Result<Arc<dyn Module>, ModuleError> + Send + Sync>;

#[derive(Clone)]
struct CatalogEntry {
    name: String,
    source: &'static str,
    factory: ModuleFactory,
}

/// Ordered set of module factories compiled into the binary.
///
/// Registration order is discovery order.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    entries: Vec<CatalogEntry>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory. A later entry with the same name replaces the earlier one in place.
    pub fn register<F>(&mut self, name: impl Into<String>, source: &'static str, factory: F)
    where
        F: Fn() -> Result<Arc<dyn Module>, ModuleError> + Send + Sync + 'static,
    {
        let entry = CatalogEntry {
            name: name.into(),
            source,
            factory: Arc::new(factory),
        };
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Builder form of `register`
    pub fn with<F>(mut self, name: impl Into<String>, source: &'static str, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Module>, ModuleError> + Send + Sync + 'static,
    {
        self.register(name, source, factory);
        self
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        self.entries.len() != before
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    fn entry(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// Bookkeeping for one imported module
pub struct ModuleRecord {
    pub name: String,
    pub module: Arc<dyn Module>,
    pub handlers: Vec<HandlerId>,
    pub commands: Vec<String>,
    pub loaded_at: DateTime<Utc>,
    pub enabled: bool,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub source: &'static str,
}

/// Status line shown in the admin module list
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleStatus {
    pub name: String,
    pub enabled: bool,
    pub loaded_at: DateTime<Utc>,
    pub commands: Vec<String>,
    pub handler_count: usize,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub exports: Vec<&'static str>,
    pub source: &'static str,
}

/// Loaded module records, keyed by name
pub struct ModuleRegistry {
    catalog: ModuleCatalog,
    disabled: Vec<String>,
    records: BTreeMap<String, ModuleRecord>,
}

impl ModuleRegistry {
    pub fn new(catalog: ModuleCatalog, disabled: Vec<String>) -> Self {
        Self {
            catalog,
            disabled,
            records: BTreeMap::new(),
        }
    }

    /// Candidate module names in discovery order.
    ///
    /// Names starting with `_` and names disabled in config are skipped.
    pub fn discover(&self) -> Vec<String> {
        self.catalog
            .names()
            .into_iter()
            .filter(|name| !name.starts_with('_'))
            .filter(|name| !self.disabled.iter().any(|d| d == name))
            .collect()
    }

    /// Instantiate `name` afresh and register a new record for it.
    ///
    /// Any previous record of the same name is replaced. Factory failures
    /// and panics come back as `ModuleError::Import`.
    pub fn load(&mut self, name: &str) -> Result<Arc<dyn Module>, ModuleError> {
        let entry = self
            .catalog
            .entry(name)
            .cloned()
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))?;

        let module = match catch_unwind(AssertUnwindSafe(|| (entry.factory)())) {
            Ok(Ok(module)) => module,
            Ok(Err(e)) => {
                warn!(module = name, "Import failed: {}", e);
                return Err(match e {
                    ModuleError::Import { .. } => e,
                    other => ModuleError::Import {
                        name: name.to_string(),
                        reason: other.to_string(),
                    },
                });
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(module = name, "Import panicked: {}", reason);
                return Err(ModuleError::Import {
                    name: name.to_string(),
                    reason,
                });
            }
        };

        if self.records.contains_key(name) {
            debug!(module = name, "Replacing previous instance");
        }

        self.records.insert(
            name.to_string(),
            ModuleRecord {
                name: name.to_string(),
                module: module.clone(),
                handlers: Vec::new(),
                commands: Vec::new(),
                loaded_at: Utc::now(),
                enabled: true,
                error_count: 0,
                last_error: None,
                source: entry.source,
            },
        );
        info!(module = name, "Module imported");
        Ok(module)
    }

    /// Take the record out of the registry; the caller runs teardown
    pub fn remove(&mut self, name: &str) -> Option<ModuleRecord> {
        self.records.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&ModuleRecord> {
        self.records.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ModuleRecord> {
        self.records.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// Snapshot of the loaded names
    pub fn loaded_names(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Mark a failed setup on the record
    pub fn record_failure(&mut self, name: &str, error: impl Into<String>) {
        if let Some(record) = self.records.get_mut(name) {
            record.error_count += 1;
            record.last_error = Some(error.into());
            record.handlers.clear();
            record.commands.clear();
        }
    }

    /// Keep the record but take it out of service: no handlers, not enabled
    pub fn disable(&mut self, name: &str, error: impl Into<String>) {
        self.record_failure(name, error);
        if let Some(record) = self.records.get_mut(name) {
            record.enabled = false;
        }
    }

    /// Status of every loaded module, sorted by name
    pub fn status(&self) -> Vec<ModuleStatus> {
        self.records
            .values()
            .map(|r| ModuleStatus {
                name: r.name.clone(),
                enabled: r.enabled,
                loaded_at: r.loaded_at,
                commands: r.commands.clone(),
                handler_count: r.handlers.len(),
                error_count: r.error_count,
                last_error: r.last_error.clone(),
                exports: r.module.exports(),
                source: r.source,
            })
            .collect()
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut ModuleCatalog {
        &mut self.catalog
    }
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::module::ModuleSetup;
    use crate::kernel::BotCore;
    use async_trait::async_trait;

    struct Empty;

    #[async_trait]
    impl Module for Empty {
        async fn setup(&self, _core: &Arc<BotCore>) -> Result<ModuleSetup, ModuleError> {
            Ok(ModuleSetup::new())
        }
    }

    fn catalog() -> ModuleCatalog {
        ModuleCatalog::new()
            .with("zeta", "zeta.rs", || Ok(Arc::new(Empty) as Arc<dyn Module>))
            .with("_private", "private.rs", || Ok(Arc::new(Empty) as Arc<dyn Module>))
            .with("alpha", "alpha.rs", || Ok(Arc::new(Empty) as Arc<dyn Module>))
            .with("broken", "broken.rs", || {
                Err(ModuleError::Setup("syntax error".to_string()))
            })
            .with("off", "off.rs", || Ok(Arc::new(Empty) as Arc<dyn Module>))
    }

    #[test]
    fn discover_keeps_catalog_order_and_skips_hidden() {
        let registry = ModuleRegistry::new(catalog(), vec!["off".to_string()]);
        assert_eq!(registry.discover(), vec!["zeta", "alpha", "broken"]);
    }

    #[test]
    fn load_replaces_previous_record() {
        let mut registry = ModuleRegistry::new(catalog(), vec![]);
        let first = registry.load("alpha").unwrap();
        registry.record_failure("alpha", "boom");
        let second = registry.load("alpha").unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("alpha").unwrap().error_count, 0);
    }

    #[test]
    fn failed_import_leaves_no_record() {
        let mut registry = ModuleRegistry::new(catalog(), vec![]);
        let err = registry.load("broken").err().unwrap();
        assert!(matches!(err, ModuleError::Import { .. }));
        assert!(!registry.contains("broken"));
        assert!(matches!(registry.load("missing"), Err(ModuleError::NotFound(_))));
    }

    #[test]
    fn panicking_factory_is_an_import_failure() {
        let catalog = ModuleCatalog::new().with("bad", "bad.rs", || -> Result<Arc<dyn Module>, ModuleError> {
            panic!("factory exploded")
        });
        let mut registry = ModuleRegistry::new(catalog, vec![]);
        match registry.load("bad") {
            Err(ModuleError::Import { reason, .. }) => assert_eq!(reason, "factory exploded"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn status_is_sorted_by_name() {
        let mut registry = ModuleRegistry::new(catalog(), vec![]);
        registry.load("zeta").unwrap();
        registry.load("alpha").unwrap();
        let names: Vec<String> = registry.status().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
