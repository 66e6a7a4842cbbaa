//! Shared resource bindings - `_manager` resources wired onto the core

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use super::module::{Module, SharedResource};

/// Suffix a resource name needs to be bound
pub const MANAGER_SUFFIX: &str = "_manager";

/// Name held by the core's own module registry
pub const RESERVED_NAME: &str = "module_manager";

#[derive(Clone)]
struct Binding {
    owner: String,
    handle: Arc<dyn Any + Send + Sync>,
}

/// What happened to one offered resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    Bound,
    /// Name already taken; the earlier binding stays
    Collision { existing_owner: String },
    /// Not a manager, or the reserved name
    Ignored,
}

/// Summary of one wiring pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WiringReport {
    pub bound: Vec<String>,
    /// (resource name, kept owner, rejected owner)
    pub collisions: Vec<(String, String, String)>,
}

/// Name -> resource map, first writer wins
#[derive(Default)]
pub struct ResourceBindings {
    bindings: RwLock<BTreeMap<String, Binding>>,
}

impl ResourceBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, owner: &str, resource: SharedResource) -> BindOutcome {
        if !resource.name.ends_with(MANAGER_SUFFIX) || resource.name == RESERVED_NAME {
            debug!(module = owner, resource = %resource.name, "Resource not bindable");
            return BindOutcome::Ignored;
        }

        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = bindings.get(&resource.name) {
            warn!(
                resource = %resource.name,
                kept = %existing.owner,
                rejected = owner,
                "Resource name collision, keeping first binding"
            );
            return BindOutcome::Collision {
                existing_owner: existing.owner.clone(),
            };
        }

        info!(module = owner, resource = %resource.name, "Resource bound");
        bindings.insert(
            resource.name,
            Binding {
                owner: owner.to_string(),
                handle: resource.handle,
            },
        );
        BindOutcome::Bound
    }

    /// Bind the managers of every module, in the order given
    pub fn wire(&self, modules: &[(String, Arc<dyn Module>)]) -> WiringReport {
        let mut report = WiringReport::default();
        for (owner, module) in modules {
            for resource in module.resources() {
                let name = resource.name.clone();
                match self.bind(owner, resource) {
                    BindOutcome::Bound => report.bound.push(name),
                    BindOutcome::Collision { existing_owner } => {
                        report.collisions.push((name, existing_owner, owner.clone()))
                    }
                    BindOutcome::Ignored => {}
                }
            }
        }
        report
    }

    /// Typed lookup, `None` when unbound or of another type
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let handle = self
            .bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|b| b.handle.clone())?;
        handle.downcast::<T>().ok()
    }

    pub fn owner(&self, name: &str) -> Option<String> {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|b| b.owner.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Bound names, sorted
    pub fn names(&self) -> Vec<String> {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every binding owned by `owner`, returns the released names
    pub fn release(&self, owner: &str) -> Vec<String> {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        let names: Vec<String> = bindings
            .iter()
            .filter(|(_, b)| b.owner == owner)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &names {
            bindings.remove(name);
        }
        names
    }

    /// Drop every binding
    pub fn clear(&self) -> usize {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        let count = bindings.len();
        bindings.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(u32);

    #[test]
    fn first_writer_wins() {
        let bindings = ResourceBindings::new();
        assert_eq!(
            bindings.bind("a", SharedResource::new("xyz_manager", Arc::new(Counter(1)))),
            BindOutcome::Bound
        );
        assert_eq!(
            bindings.bind("b", SharedResource::new("xyz_manager", Arc::new(Counter(2)))),
            BindOutcome::Collision {
                existing_owner: "a".to_string()
            }
        );
        assert_eq!(bindings.get::<Counter>("xyz_manager").unwrap().0, 1);
        assert_eq!(bindings.owner("xyz_manager").as_deref(), Some("a"));
    }

    #[test]
    fn only_managers_are_bound() {
        let bindings = ResourceBindings::new();
        assert_eq!(
            bindings.bind("a", SharedResource::new("helper", Arc::new(Counter(1)))),
            BindOutcome::Ignored
        );
        assert_eq!(
            bindings.bind("a", SharedResource::new(RESERVED_NAME, Arc::new(Counter(1)))),
            BindOutcome::Ignored
        );
        assert!(bindings.is_empty());
    }

    #[test]
    fn typed_lookup_rejects_wrong_type() {
        let bindings = ResourceBindings::new();
        bindings.bind("a", SharedResource::new("count_manager", Arc::new(Counter(3))));
        assert!(bindings.get::<String>("count_manager").is_none());
        assert!(bindings.get::<Counter>("missing_manager").is_none());
    }

    #[test]
    fn clear_drops_everything() {
        let bindings = ResourceBindings::new();
        bindings.bind("a", SharedResource::new("one_manager", Arc::new(Counter(1))));
        bindings.bind("a", SharedResource::new("two_manager", Arc::new(Counter(2))));
        assert_eq!(bindings.names(), vec!["one_manager", "two_manager"]);
        assert_eq!(bindings.clear(), 2);
        assert!(bindings.names().is_empty());
    }
}
