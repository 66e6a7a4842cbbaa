//! Kernel - module lifecycle, capability wiring, reloads and the admin panel

pub mod admin;
pub mod core;
pub mod events;
pub mod module;
pub mod progress;
pub mod registry;
pub mod resources;

pub use self::core::{
    format_gc, resident_memory_kb, Application, BotCore, CoreStats, CycleStatus, GcReport, LoadReport, ReloadState,
};
pub use admin::{AdminAction, AdminSessions, PendingInput};
pub use events::{KernelEvent, KernelLog, Severity};
pub use module::{Module, ModuleSetup, SharedResource};
pub use progress::{ProgressTarget, ReloadProgress};
pub use registry::{ModuleCatalog, ModuleFactory, ModuleRecord, ModuleRegistry, ModuleStatus};
pub use resources::{BindOutcome, ResourceBindings, WiringReport, MANAGER_SUFFIX, RESERVED_NAME};
