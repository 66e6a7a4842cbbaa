//! Bot core - owns the module registry, resource bindings and kernel log
//! and runs the three-phase load protocol.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::admin::{self, AdminSessions};
use super::events::{KernelEvent, KernelLog, Severity};
use super::module::Module;
use super::progress::{ProgressTarget, ReloadProgress};
use super::registry::{panic_message, ModuleCatalog, ModuleRegistry, ModuleStatus};
use super::resources::ResourceBindings;
use crate::application::errors::{BotError, ModuleError};
use crate::application::format::escape_html;
use crate::application::messaging::{
    Dispatcher, HandlerId, LoggingMiddleware, MaintenanceMiddleware, MessageCounters,
    MiddlewareChain, StatsMiddleware,
};
use crate::domain::entities::Message;
use crate::domain::traits::{Bot, Keyboard, Store};
use crate::infrastructure::config::Config;
use crate::modules::profile::ProfileBlockManager;

/// Transport context: the bot client and its handler table
pub struct Application {
    pub bot: Arc<dyn Bot>,
    pub dispatcher: Dispatcher,
}

/// Where a reload cycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadState {
    Idle { last: Option<CycleStatus> },
    Unloading,
    Importing,
    Wiring,
    SettingUp,
}

impl fmt::Display for ReloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadState::Idle { last: None } => write!(f, "idle"),
            ReloadState::Idle { last: Some(status) } => write!(f, "idle ({})", status),
            ReloadState::Unloading => write!(f, "unloading"),
            ReloadState::Importing => write!(f, "importing"),
            ReloadState::Wiring => write!(f, "wiring"),
            ReloadState::SettingUp => write!(f, "setting up"),
        }
    }
}

/// How a finished cycle went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    Success,
    PartialFailure,
    Failed,
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleStatus::Success => write!(f, "success"),
            CycleStatus::PartialFailure => write!(f, "partial failure"),
            CycleStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What one load cycle did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub unloaded: Vec<String>,
    pub imported: Vec<String>,
    /// (module, reason)
    pub failed_imports: Vec<(String, String)>,
    pub bound: Vec<String>,
    /// (resource, kept owner, rejected owner)
    pub collisions: Vec<(String, String, String)>,
    /// (module, reason)
    pub setup_failures: Vec<(String, String)>,
}

impl LoadReport {
    pub fn status(&self) -> CycleStatus {
        if self.failed_imports.is_empty() && self.setup_failures.is_empty() {
            CycleStatus::Success
        } else {
            CycleStatus::PartialFailure
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} imported, {} import failures, {} resources bound, {} setup failures",
            self.imported.len(),
            self.failed_imports.len(),
            self.bound.len(),
            self.setup_failures.len()
        )
    }
}

/// Counters behind the admin statistics
#[derive(Debug, Default)]
pub struct CoreStats {
    pub messages: Arc<MessageCounters>,
    pub errors: AtomicU64,
    pub reloads: AtomicU64,
}

impl CoreStats {
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn reloads(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }
}

/// Resident memory before and after a compaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcReport {
    pub before_kb: Option<u64>,
    pub after_kb: Option<u64>,
}

/// Central orchestrator, shared as `Arc<BotCore>`
pub struct BotCore {
    config: Config,
    store: Arc<dyn Store>,
    application: Option<Application>,
    registry: Mutex<ModuleRegistry>,
    resources: ResourceBindings,
    kernel_log: KernelLog,
    maintenance: Arc<AtomicBool>,
    stats: CoreStats,
    started_at: DateTime<Utc>,
    started: Instant,
    reload_state: Mutex<ReloadState>,
    reload_lock: tokio::sync::Mutex<()>,
    core_handlers: Mutex<Vec<HandlerId>>,
    admin: AdminSessions,
}

impl BotCore {
    pub fn new(config: Config, store: Arc<dyn Store>, catalog: ModuleCatalog) -> Self {
        let disabled = config.modules.disabled.clone();
        Self {
            config,
            store,
            application: None,
            registry: Mutex::new(ModuleRegistry::new(catalog, disabled)),
            resources: ResourceBindings::new(),
            kernel_log: KernelLog::new(),
            maintenance: Arc::new(AtomicBool::new(false)),
            stats: CoreStats::default(),
            started_at: Utc::now(),
            started: Instant::now(),
            reload_state: Mutex::new(ReloadState::Idle { last: None }),
            reload_lock: tokio::sync::Mutex::new(()),
            core_handlers: Mutex::new(Vec::new()),
            admin: AdminSessions::default(),
        }
    }

    /// Attach a transport; builds the dispatcher and its middleware chain
    pub fn with_application(mut self, bot: Arc<dyn Bot>) -> Self {
        let middleware = MiddlewareChain::new()
            .add(MaintenanceMiddleware::new(self.maintenance.clone(), self.config.owners.clone()))
            .add(StatsMiddleware::new(self.stats.messages.clone()))
            .add(LoggingMiddleware)
            .build();
        self.application = Some(Application {
            bot,
            dispatcher: Dispatcher::new(middleware),
        });
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn application(&self) -> Option<&Application> {
        self.application.as_ref()
    }

    pub fn bot(&self) -> Option<Arc<dyn Bot>> {
        self.application.as_ref().map(|app| app.bot.clone())
    }

    pub fn kernel_log(&self) -> &KernelLog {
        &self.kernel_log
    }

    pub fn resources(&self) -> &ResourceBindings {
        &self.resources
    }

    pub fn stats(&self) -> &CoreStats {
        &self.stats
    }

    pub fn admin_sessions(&self) -> &AdminSessions {
        &self.admin
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_owner(&self, user_id: i64) -> bool {
        self.config.is_owner(user_id)
    }

    fn registry(&self) -> MutexGuard<'_, ModuleRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ReloadState) {
        debug!(state = %state, "Reload state");
        *self.reload_state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn reload_state(&self) -> ReloadState {
        *self.reload_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Typed access to a bound `_manager` resource
    pub fn resource<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.resources.get::<T>(name)
    }

    pub fn require_resource<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, ModuleError> {
        self.resource::<T>(name)
            .ok_or_else(|| ModuleError::MissingResource(name.to_string()))
    }

    pub fn resource_names(&self) -> Vec<String> {
        self.resources.names()
    }

    pub fn module_status(&self) -> Vec<ModuleStatus> {
        self.registry().status()
    }

    pub fn discover_modules(&self) -> Vec<String> {
        self.registry().discover()
    }

    pub fn loaded_modules(&self) -> Vec<String> {
        self.registry().loaded_names()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.registry().contains(name)
    }

    /// Change the set of compiled-in factories
    pub fn update_catalog(&self, f: impl FnOnce(&mut ModuleCatalog)) {
        f(self.registry().catalog_mut());
    }

    pub fn is_maintenance(&self) -> bool {
        self.maintenance.load(Ordering::SeqCst)
    }

    /// Flip maintenance mode, returns the new state
    pub fn toggle_maintenance(&self) -> bool {
        let enabled = !self.maintenance.fetch_xor(true, Ordering::SeqCst);
        self.log_kernel_event(
            Severity::Warning,
            "Maintenance mode",
            if enabled { "enabled" } else { "disabled" },
        );
        enabled
    }

    /// Append to the kernel log. PANIC also notifies every owner in the background.
    pub fn log_kernel_event(&self, severity: Severity, action: impl Into<String>, outcome: impl Into<String>) -> KernelEvent {
        let event = self.kernel_log.append(severity, action, outcome);
        if severity == Severity::Panic {
            self.notify_owners(&event);
        }
        event
    }

    fn notify_owners(&self, event: &KernelEvent) {
        let Some(bot) = self.bot() else {
            warn!("No transport, owners not notified of panic");
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime, owners not notified of panic");
            return;
        };

        let owners = self.config.owners.clone();
        let text = event.to_html();
        runtime.spawn(async move {
            for owner in owners {
                if let Err(e) = bot.send_message(owner, &text, None).await {
                    warn!(owner, "Panic notification failed: {}", e);
                }
            }
        });
    }

    /// Send without failing the caller; `None` when nothing was delivered
    pub async fn safe_send_message(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Option<i64> {
        let bot = self.bot()?;
        match bot.send_message(chat_id, text, keyboard).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(chat_id, "Send failed: {}", e);
                None
            }
        }
    }

    pub async fn safe_edit_message(&self, chat_id: i64, message_id: i64, text: &str, keyboard: Option<&Keyboard>) -> bool {
        let Some(bot) = self.bot() else {
            return false;
        };
        match bot.edit_message(chat_id, message_id, text, keyboard).await {
            Ok(()) => true,
            Err(e) => {
                debug!(chat_id, message_id, "Edit failed: {}", e);
                false
            }
        }
    }

    pub async fn answer_callback(&self, callback_id: &str, text: Option<&str>) {
        if let Some(bot) = self.bot() {
            if let Err(e) = bot.answer_callback(callback_id, text).await {
                debug!("Callback answer failed: {}", e);
            }
        }
    }

    /// Detach handlers, run teardown, drop the instance. False if not loaded.
    pub async fn unload_module(&self, name: &str) -> bool {
        let record = self.registry().remove(name);
        let Some(record) = record else {
            return false;
        };

        if let Some(app) = &self.application {
            for id in &record.handlers {
                app.dispatcher.remove_handler(*id);
            }
        }

        match AssertUnwindSafe(record.module.cleanup(self)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(module = name, "Cleanup failed: {}", e),
            Err(panic) => warn!(module = name, "Cleanup panicked: {}", panic_message(panic.as_ref())),
        }

        info!(module = name, "Module unloaded");
        true
    }

    /// Discover and run the three phases against the current registry
    pub async fn load_and_register_modules(self: &Arc<Self>, progress: &mut ReloadProgress) -> Result<LoadReport, BotError> {
        let discovered = self.discover_modules();
        progress.set_total(0, discovered.len());
        let result = self.run_phases(&discovered, progress, LoadReport::default()).await;
        self.finish_cycle(result)
    }

    /// Unload everything, drop all bindings, then load from scratch
    pub async fn reload_all_modules(self: &Arc<Self>, target: Option<ProgressTarget>) -> Result<LoadReport, BotError> {
        let _cycle = self.reload_lock.lock().await;
        self.stats.reloads.fetch_add(1, Ordering::Relaxed);
        self.log_kernel_event(Severity::Stable, "Module reload", "started");

        let mut progress = match (self.bot(), target) {
            (Some(bot), Some(target)) => ReloadProgress::new("🔄 <b>Reloading modules</b>", bot, target),
            _ => ReloadProgress::silent("Reloading modules"),
        };

        let result = self.reload_cycle(&mut progress).await;
        let result = self.finish_cycle(result);

        if let (Err(e), Some(target)) = (&result, target) {
            let text = format!("❌ <b>Reload failed</b>\n<code>{}</code>", escape_html(&e.to_string()));
            self.safe_edit_message(target.chat_id, target.message_id, &text, None).await;
        }
        result
    }

    async fn reload_cycle(self: &Arc<Self>, progress: &mut ReloadProgress) -> Result<LoadReport, BotError> {
        let cleared = self.resources.clear();
        debug!(cleared, "Resource bindings cleared");

        self.set_state(ReloadState::Unloading);
        let to_unload = if self.application.is_some() {
            self.loaded_modules()
        } else {
            Vec::new()
        };
        let discovered = self.discover_modules();
        progress.set_total(to_unload.len(), discovered.len());

        let mut report = LoadReport::default();
        for name in to_unload {
            if self.unload_module(&name).await {
                report.unloaded.push(name.clone());
            }
            progress.advance(&format!("Unloading {}", name)).await;
        }
        self.log_kernel_event(
            Severity::Stable,
            "Phase 0: unload",
            format!("{} modules unloaded", report.unloaded.len()),
        );

        self.run_phases(&discovered, progress, report).await
    }

    async fn run_phases(
        self: &Arc<Self>,
        discovered: &[String],
        progress: &mut ReloadProgress,
        mut report: LoadReport,
    ) -> Result<LoadReport, BotError> {
        // Phase 1: import
        self.set_state(ReloadState::Importing);
        let mut imported: Vec<(String, Arc<dyn Module>)> = Vec::new();
        for name in discovered {
            let loaded = self.registry().load(name);
            match loaded {
                Ok(module) => {
                    report.imported.push(name.clone());
                    imported.push((name.clone(), module));
                }
                Err(e) => {
                    self.log_kernel_event(Severity::Error, format!("Import {}", name), e.to_string());
                    report.failed_imports.push((name.clone(), e.to_string()));
                }
            }
            progress.advance(&format!("Importing {}", name)).await;
        }
        self.log_kernel_event(
            Severity::Stable,
            "Phase 1: import",
            format!("{}/{} modules imported", report.imported.len(), discovered.len()),
        );

        // Phase 2: bind `_manager` resources, first writer wins
        self.set_state(ReloadState::Wiring);
        for name in discovered {
            if let Some(entry) = imported.iter().find(|(n, _)| n == name) {
                let wiring = self.resources.wire(std::slice::from_ref(entry));
                for (resource, kept, rejected) in &wiring.collisions {
                    self.log_kernel_event(
                        Severity::Warning,
                        "Resource collision",
                        format!("{} from {} ignored, bound to {}", resource, rejected, kept),
                    );
                }
                report.bound.extend(wiring.bound);
                report.collisions.extend(wiring.collisions);
            }
            progress.advance(&format!("Wiring {}", name)).await;
        }
        self.log_kernel_event(
            Severity::Stable,
            "Phase 2: wiring",
            format!("{} resources bound", report.bound.len()),
        );

        // Phase 3: setup and handler attach
        self.set_state(ReloadState::SettingUp);
        let mut cycle_error: Option<BotError> = None;
        for name in discovered {
            if let Some((_, module)) = imported.iter().find(|(n, _)| n == name) {
                let skipped = cycle_error.as_ref().map(|e| format!("not set up: {}", e));
                if let Some(reason) = skipped {
                    self.take_out_of_service(name, &reason);
                } else {
                    match self.setup_module(name, module.clone()).await {
                        Ok(Some(failure)) => report.setup_failures.push((name.clone(), failure)),
                        Ok(None) => {}
                        Err(e) => cycle_error = Some(e),
                    }
                }
            }
            progress.advance(&format!("Setting up {}", name)).await;
        }
        self.log_kernel_event(
            Severity::Stable,
            "Phase 3: setup",
            format!(
                "{} modules ready, {} failed",
                report.imported.len() - report.setup_failures.len(),
                report.setup_failures.len()
            ),
        );

        self.publish_commands().await;
        match cycle_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Run one module's setup. `Ok(Some(reason))` is a contained failure,
    /// `Err` means handlers could not be attached at all; the module is then
    /// taken out of service before returning.
    async fn setup_module(self: &Arc<Self>, name: &str, module: Arc<dyn Module>) -> Result<Option<String>, BotError> {
        let outcome = AssertUnwindSafe(module.setup(self)).catch_unwind().await;
        let setup = match outcome {
            Ok(Ok(setup)) => setup,
            Ok(Err(e)) => return Ok(Some(self.fail_setup(name, e.to_string()))),
            Err(panic) => return Ok(Some(self.fail_setup(name, format!("panic: {}", panic_message(panic.as_ref()))))),
        };

        let mut ids = Vec::with_capacity(setup.handlers.len());
        for handler in setup.handlers {
            match &self.application {
                Some(app) => match app.dispatcher.add_handler(handler) {
                    Ok(id) => ids.push(id),
                    Err(e) => {
                        for id in &ids {
                            app.dispatcher.remove_handler(*id);
                        }
                        self.take_out_of_service(name, &format!("handler attach failed: {}", e));
                        return Err(e);
                    }
                },
                None => ids.push(handler.id()),
            }
        }

        let handler_count = ids.len();
        let command_count = setup.commands.len();
        if let Some(record) = self.registry().get_mut(name) {
            record.handlers = ids;
            record.commands = setup.commands;
            record.enabled = true;
        }

        self.log_kernel_event(
            Severity::Stable,
            format!("Setup {}", name),
            format!("{} handlers, {} commands", handler_count, command_count),
        );
        Ok(None)
    }

    /// Disable a module that cannot serve this cycle and drop the managers it owns
    fn take_out_of_service(&self, name: &str, reason: &str) {
        self.registry().disable(name, reason);
        let released = self.resources.release(name);
        if !released.is_empty() {
            debug!(module = name, ?released, "Bindings released");
        }
        self.log_kernel_event(Severity::Error, format!("Setup {}", name), reason);
    }

    fn fail_setup(&self, name: &str, reason: String) -> String {
        self.registry().record_failure(name, reason.clone());
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        self.log_kernel_event(Severity::Error, format!("Setup {}", name), reason.clone());
        reason
    }

    fn finish_cycle(&self, result: Result<LoadReport, BotError>) -> Result<LoadReport, BotError> {
        match &result {
            Ok(report) => {
                let status = report.status();
                self.set_state(ReloadState::Idle { last: Some(status) });
                let severity = match status {
                    CycleStatus::Success => Severity::Stable,
                    _ => Severity::Warning,
                };
                self.log_kernel_event(severity, "Load cycle", format!("{}: {}", status, report.summary()));
            }
            Err(e) => {
                self.set_state(ReloadState::Idle { last: Some(CycleStatus::Failed) });
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                error!("Load cycle failed: {}", e);
                self.log_kernel_event(Severity::Error, "Load cycle", format!("failed: {}", e));
            }
        }
        result
    }

    /// Push the command list of every loaded module to the client
    async fn publish_commands(&self) {
        let Some(bot) = self.bot() else {
            return;
        };
        let mut commands: Vec<(String, String)> = self
            .module_status()
            .into_iter()
            .flat_map(|status| {
                let module = status.name.clone();
                status
                    .commands
                    .into_iter()
                    .map(move |cmd| (cmd, format!("{} module", module)))
            })
            .collect();
        commands.sort();
        commands.dedup_by(|a, b| a.0 == b.0);
        commands.push(("core".to_string(), "Control panel".to_string()));

        if let Err(e) = bot.set_commands(&commands).await {
            warn!("Publishing commands failed: {}", e);
        }
    }

    /// Attach the core's own admin handlers. They survive module reloads.
    pub fn setup_handlers(&self) -> Result<usize, BotError> {
        let Some(app) = &self.application else {
            return Ok(0);
        };
        let mut ids = self.core_handlers.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.is_empty() {
            return Ok(ids.len());
        }
        for handler in admin::handlers() {
            ids.push(app.dispatcher.add_handler(handler)?);
        }
        Ok(ids.len())
    }

    /// Startup: core handlers, owner notice, module load with progress, ready notice
    pub async fn post_init(self: &Arc<Self>) -> Result<LoadReport, BotError> {
        let result = self.startup().await;
        if let Err(e) = &result {
            self.log_kernel_event(Severity::Panic, "Startup", e.to_string());
        }
        result
    }

    async fn startup(self: &Arc<Self>) -> Result<LoadReport, BotError> {
        self.setup_handlers()?;

        let mut notices = Vec::new();
        for owner in &self.config.owners {
            if let Some(message_id) = self
                .safe_send_message(*owner, "⏳ <b>Starting up…</b>", None)
                .await
            {
                notices.push(ProgressTarget {
                    chat_id: *owner,
                    message_id,
                });
            }
        }

        let mut progress = match (self.bot(), notices.first()) {
            (Some(bot), Some(target)) => ReloadProgress::new("⏳ <b>Loading modules</b>", bot, *target),
            _ => ReloadProgress::silent("Loading modules"),
        };

        let report = self.load_and_register_modules(&mut progress).await?;

        let ready = format!(
            "✅ <b>{} is ready</b>\n{}",
            escape_html(&self.config.bot.name),
            report.summary()
        );
        for target in &notices {
            self.safe_edit_message(target.chat_id, target.message_id, &ready, None).await;
        }
        self.log_kernel_event(Severity::Stable, "Startup", report.summary());
        Ok(report)
    }

    /// Route one update through middleware and handlers
    pub async fn dispatch(self: &Arc<Self>, message: Message) {
        let Some(app) = &self.application else {
            debug!("No transport, update dropped");
            return;
        };
        let outcome = app.dispatcher.dispatch(self.clone(), message).await;
        if outcome.failed > 0 {
            self.stats.errors.fetch_add(outcome.failed as u64, Ordering::Relaxed);
        }
    }

    /// Shrink internal buffers and report resident memory around it
    pub fn collect_garbage(&self) -> GcReport {
        let before_kb = resident_memory_kb();

        self.kernel_log.compact();
        if let Some(app) = &self.application {
            app.dispatcher.compact();
        }
        if let Some(blocks) = self.resource::<ProfileBlockManager>("profile_manager") {
            blocks.compact();
        }

        let report = GcReport {
            before_kb,
            after_kb: resident_memory_kb(),
        };
        self.log_kernel_event(Severity::Stable, "Garbage collection", format_gc(&report));
        report
    }
}

pub fn format_gc(report: &GcReport) -> String {
    match (report.before_kb, report.after_kb) {
        (Some(before), Some(after)) => format!(
            "{:.1} MB → {:.1} MB",
            before as f64 / 1024.0,
            after as f64 / 1024.0
        ),
        _ => "buffers compacted".to_string(),
    }
}

/// VmRSS of this process, where the platform exposes it
pub fn resident_memory_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse().ok())
}
