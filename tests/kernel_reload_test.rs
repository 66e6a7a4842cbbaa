//! Kernel load/reload integration tests
//! Run with: cargo test --test kernel_reload_test

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use wiralis_bot::application::errors::{BotError, ModuleError};
use wiralis_bot::application::messaging::Handler;
use wiralis_bot::domain::entities::{Message, User};
use wiralis_bot::domain::traits::{Bot, BotInfo, Keyboard, Store};
use wiralis_bot::infrastructure::config::Config;
use wiralis_bot::infrastructure::database::Database;
use wiralis_bot::kernel::{
    BotCore, CycleStatus, Module, ModuleCatalog, ModuleSetup, ProgressTarget, ReloadState, Severity, SharedResource,
};
use wiralis_bot::modules::builtin_catalog;

static INIT: Once = Once::new();

fn ensure_init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
    });
}

/// Transport that remembers everything it was asked to do
#[derive(Default)]
struct RecordingBot {
    sent: Mutex<Vec<(i64, String)>>,
    edits: Mutex<Vec<(i64, i64, String)>>,
    toasts: Mutex<Vec<String>>,
    next_id: AtomicI64,
    unreachable: Mutex<Vec<i64>>,
}

impl RecordingBot {
    fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn edits(&self) -> Vec<(i64, i64, String)> {
        self.edits.lock().unwrap().clone()
    }

    fn toasts(&self) -> Vec<String> {
        self.toasts.lock().unwrap().clone()
    }

    fn sent_to(&self, chat: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(c, _)| *c == chat)
            .map(|(_, text)| text)
            .collect()
    }

    /// Make every send to `chat` fail
    fn block_chat(&self, chat: i64) {
        self.unreachable.lock().unwrap().push(chat);
    }
}

#[async_trait]
impl Bot for RecordingBot {
    async fn start(&self) -> Result<(), BotError> {
        Ok(())
    }

    async fn send_message(&self, chat_id: i64, text: &str, _keyboard: Option<&Keyboard>) -> Result<i64, BotError> {
        if self.unreachable.lock().unwrap().contains(&chat_id) {
            return Err(BotError::Transport("chat not found".to_string()));
        }
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str, _keyboard: Option<&Keyboard>) -> Result<(), BotError> {
        self.edits.lock().unwrap().push((chat_id, message_id, text.to_string()));
        Ok(())
    }

    async fn answer_callback(&self, _callback_id: &str, text: Option<&str>) -> Result<(), BotError> {
        if let Some(text) = text {
            self.toasts.lock().unwrap().push(text.to_string());
        }
        Ok(())
    }

    fn bot_info(&self) -> BotInfo {
        BotInfo {
            id: "0".to_string(),
            name: "test".to_string(),
            username: "test_bot".to_string(),
        }
    }
}

/// Marker value exposed as a resource
struct Tag(&'static str);

/// Module exposing one resource and doing nothing else
struct Provider {
    resource: &'static str,
    tag: &'static str,
}

#[async_trait]
impl Module for Provider {
    async fn setup(&self, _core: &Arc<BotCore>) -> Result<ModuleSetup, ModuleError> {
        Ok(ModuleSetup::new())
    }

    fn resources(&self) -> Vec<SharedResource> {
        vec![SharedResource::new(self.resource, Arc::new(Tag(self.tag)))]
    }
}

struct PanickingSetup;

#[async_trait]
impl Module for PanickingSetup {
    async fn setup(&self, _core: &Arc<BotCore>) -> Result<ModuleSetup, ModuleError> {
        panic!("setup exploded");
    }
}

struct FailingSetup;

#[async_trait]
impl Module for FailingSetup {
    async fn setup(&self, _core: &Arc<BotCore>) -> Result<ModuleSetup, ModuleError> {
        Err(ModuleError::Setup("database unreachable".to_string()))
    }
}

/// Module whose only command panics when it runs
struct Explosive;

async fn boom(_core: Arc<BotCore>, _msg: Message) -> Result<(), BotError> {
    panic!("handler exploded")
}

#[async_trait]
impl Module for Explosive {
    async fn setup(&self, _core: &Arc<BotCore>) -> Result<ModuleSetup, ModuleError> {
        Ok(ModuleSetup::new().handler(Handler::command("boom", boom)).command("boom"))
    }
}

/// How a tracked module's teardown behaves
#[derive(Clone, Copy)]
enum Teardown {
    Clean,
    Fails,
    Panics,
}

/// Module counting its teardowns
struct Tracked {
    cleanups: Arc<AtomicUsize>,
    teardown: Teardown,
}

#[async_trait]
impl Module for Tracked {
    async fn setup(&self, _core: &Arc<BotCore>) -> Result<ModuleSetup, ModuleError> {
        Ok(ModuleSetup::new())
    }

    async fn cleanup(&self, _core: &BotCore) -> Result<(), ModuleError> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        match self.teardown {
            Teardown::Clean => Ok(()),
            Teardown::Fails => Err(ModuleError::Cleanup("file handle already closed".to_string())),
            Teardown::Panics => panic!("cleanup exploded"),
        }
    }
}

fn tracked(cleanups: &Arc<AtomicUsize>, teardown: Teardown) -> impl Fn() -> Result<Arc<dyn Module>, ModuleError> + Send + Sync {
    let cleanups = cleanups.clone();
    move || {
        Ok(Arc::new(Tracked {
            cleanups: cleanups.clone(),
            teardown,
        }) as Arc<dyn Module>)
    }
}

/// Give spawned notification tasks a chance to run
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn provider(resource: &'static str, tag: &'static str) -> impl Fn() -> Result<Arc<dyn Module>, ModuleError> + Send + Sync {
    move || Ok(Arc::new(Provider { resource, tag }) as Arc<dyn Module>)
}

fn store() -> Arc<dyn Store> {
    Arc::new(Database::open_in_memory().unwrap())
}

fn core_with(store: Arc<dyn Store>, catalog: ModuleCatalog) -> (Arc<BotCore>, Arc<RecordingBot>) {
    ensure_init();
    let bot = Arc::new(RecordingBot::default());
    let core = BotCore::new(Config::default(), store, catalog).with_application(bot.clone());
    (Arc::new(core), bot)
}

fn neo() -> User {
    User::new(100).with_username("neo").with_name("Neo", None::<String>)
}

#[tokio::test]
async fn builtin_modules_load_and_bind_managers() {
    let store = store();
    let (core, _bot) = core_with(store.clone(), builtin_catalog(store));

    let report = core.reload_all_modules(None).await.unwrap();

    assert_eq!(report.status(), CycleStatus::Success);
    assert_eq!(report.imported, vec!["badges", "profile", "settings", "themes"]);
    assert_eq!(
        core.resource_names(),
        vec!["badge_manager", "profile_manager", "theme_manager"]
    );
    assert_eq!(core.reload_state(), ReloadState::Idle { last: Some(CycleStatus::Success) });
    assert!(core.module_status().iter().all(|s| s.enabled && s.handler_count > 0));
}

#[tokio::test]
async fn failing_modules_do_not_stop_the_rest() {
    let store = store();
    let catalog = builtin_catalog(store.clone())
        .with("broken", "tests/broken.rs", || {
            Err(ModuleError::Import {
                name: "broken".to_string(),
                reason: "missing dependency".to_string(),
            })
        })
        .with("exploding", "tests/exploding.rs", || -> Result<Arc<dyn Module>, ModuleError> {
            panic!("factory exploded")
        })
        .with("panicky", "tests/panicky.rs", || Ok(Arc::new(PanickingSetup) as Arc<dyn Module>))
        .with("failing", "tests/failing.rs", || Ok(Arc::new(FailingSetup) as Arc<dyn Module>));
    let (core, _bot) = core_with(store.clone(), catalog);

    let report = core.reload_all_modules(None).await.unwrap();

    assert_eq!(report.status(), CycleStatus::PartialFailure);
    let failed: Vec<_> = report.failed_imports.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(failed, vec!["broken", "exploding"]);
    assert!(report.failed_imports[1].1.contains("factory exploded"));

    let setup_failed: Vec<_> = report.setup_failures.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(setup_failed, vec!["panicky", "failing"]);
    assert!(report.setup_failures[0].1.contains("setup exploded"));

    let panicky = core
        .module_status()
        .into_iter()
        .find(|s| s.name == "panicky")
        .unwrap();
    assert_eq!(panicky.error_count, 1);
    assert_eq!(panicky.handler_count, 0);

    assert!(core.is_loaded("profile"));
    assert!(core.resources().contains("profile_manager"));
    assert!(core.kernel_log().count(Severity::Error) >= 4);
    assert_eq!(core.stats().errors(), 2);
}

#[tokio::test]
async fn first_module_in_discovery_order_keeps_a_colliding_name() {
    let catalog = ModuleCatalog::new()
        .with("alpha", "tests/alpha.rs", provider("xyz_manager", "alpha"))
        .with("beta", "tests/beta.rs", provider("xyz_manager", "beta"))
        .with("gamma", "tests/gamma.rs", provider("helper_service", "gamma"));
    let (core, _bot) = core_with(store(), catalog);

    let report = core.reload_all_modules(None).await.unwrap();

    assert_eq!(core.resource::<Tag>("xyz_manager").unwrap().0, "alpha");
    assert_eq!(
        report.collisions,
        vec![("xyz_manager".to_string(), "alpha".to_string(), "beta".to_string())]
    );
    // only `_manager` names are bound
    assert!(core.resource::<Tag>("helper_service").is_none());
    assert_eq!(core.resource_names(), vec!["xyz_manager"]);
    assert!(core.kernel_log().count(Severity::Warning) >= 1);
}

#[tokio::test]
async fn reloads_are_deterministic() {
    let store = store();
    let catalog = builtin_catalog(store.clone())
        .with("beta", "tests/beta.rs", provider("xyz_manager", "beta"))
        .with("alpha", "tests/alpha.rs", provider("xyz_manager", "alpha"));
    let (core, _bot) = core_with(store, catalog);

    let snapshot = |core: &BotCore| {
        let status: Vec<_> = core
            .module_status()
            .into_iter()
            .map(|s| (s.name, s.enabled, s.commands, s.handler_count, s.error_count, s.last_error, s.exports, s.source))
            .collect();
        (core.resource_names(), status)
    };

    core.reload_all_modules(None).await.unwrap();
    let first = snapshot(&core);
    for _ in 0..2 {
        let report = core.reload_all_modules(None).await.unwrap();
        assert_eq!(report.collisions.len(), 1);
        assert_eq!(core.resources().owner("xyz_manager").as_deref(), Some("beta"));
        assert_eq!(snapshot(&core), first);
    }
    assert_eq!(core.stats().reloads(), 3);
}

#[tokio::test]
async fn removed_module_leaves_no_binding_behind() {
    let store = store();
    let (core, _bot) = core_with(store.clone(), builtin_catalog(store));
    core.reload_all_modules(None).await.unwrap();
    assert!(core.resources().contains("badge_manager"));

    core.update_catalog(|catalog| {
        catalog.remove("badges");
    });
    let report = core.reload_all_modules(None).await.unwrap();

    assert_eq!(report.unloaded, vec!["badges", "profile", "settings", "themes"]);
    assert!(!core.resources().contains("badge_manager"));
    assert!(!core.is_loaded("badges"));
    assert!(core.is_loaded("profile"));
}

#[tokio::test]
async fn disabled_and_underscored_modules_are_not_discovered() {
    let mut config = Config::default();
    config.modules.disabled = vec!["themes".to_string()];
    let store = store();
    let catalog = builtin_catalog(store.clone()).with("_scratch", "tests/scratch.rs", provider("scratch_manager", "x"));
    let core = Arc::new(BotCore::new(config, store, catalog));

    assert_eq!(core.discover_modules(), vec!["badges", "profile", "settings"]);
    let report = core.reload_all_modules(None).await.unwrap();
    assert!(!core.resources().contains("theme_manager"));
    assert!(!core.resources().contains("scratch_manager"));
    assert_eq!(report.imported.len(), 3);
}

#[tokio::test]
async fn reload_progress_ends_at_full_bar() {
    let store = store();
    let (core, bot) = core_with(store.clone(), builtin_catalog(store));
    let target = ProgressTarget {
        chat_id: 1,
        message_id: 10,
    };

    core.reload_all_modules(Some(target)).await.unwrap();

    let edits = bot.edits();
    assert!(!edits.is_empty());
    assert!(edits.iter().all(|(chat, id, _)| *chat == 1 && *id == 10));
    assert!(edits.last().unwrap().2.contains("100%"));
}

#[tokio::test]
async fn profile_command_renders_blocks_from_every_module() {
    let store = store();
    let (core, bot) = core_with(store.clone(), builtin_catalog(store));
    core.reload_all_modules(None).await.unwrap();

    core.dispatch(Message::from_text(100, "hello").with_sender(neo())).await;
    core.dispatch(Message::from_command(100, "profile", vec![]).with_sender(neo()))
        .await;

    let (chat, text) = bot.sent().last().cloned().unwrap();
    assert_eq!(chat, 100);
    assert!(text.contains("<b>Neo</b>"));
    assert!(text.contains("Neutral (0)"));
    assert!(text.contains("Default"));
    // owner-only block is visible in the self view
    assert!(text.contains("Visible to others"));
}

#[tokio::test]
async fn votes_are_counted_and_self_votes_rejected() {
    let store = store();
    let (core, bot) = core_with(store.clone(), builtin_catalog(store.clone()));
    core.reload_all_modules(None).await.unwrap();

    let trinity = User::new(200).with_name("Trinity", None::<String>);
    core.dispatch(Message::from_text(100, "hi").with_sender(neo())).await;
    core.dispatch(Message::from_text(200, "hi").with_sender(trinity.clone())).await;

    core.dispatch(
        Message::from_callback(200, "q1", "profile_vote_up_100")
            .with_sender(trinity)
            .with_message_id(5),
    )
    .await;
    core.dispatch(Message::from_callback(100, "q2", "profile_vote_up_100").with_sender(neo()))
        .await;

    assert_eq!(store.rating(100).await.unwrap().score, 1);
    let toasts = bot.toasts();
    assert!(toasts.iter().any(|t| t.contains("Hype counted")));
    assert!(toasts.iter().any(|t| t.contains("can't vote for yourself")));
}

#[tokio::test]
async fn maintenance_blocks_everyone_but_owners() {
    let store = store();
    let (core, bot) = core_with(store.clone(), builtin_catalog(store));
    core.reload_all_modules(None).await.unwrap();

    assert!(core.toggle_maintenance());
    core.dispatch(Message::from_command(100, "trends", vec![]).with_sender(neo()))
        .await;
    assert!(bot.sent().is_empty());

    assert!(!core.toggle_maintenance());
    core.dispatch(Message::from_command(100, "trends", vec![]).with_sender(neo()))
        .await;
    assert_eq!(bot.sent().len(), 1);
}

#[tokio::test]
async fn panicking_handler_does_not_take_the_bot_down() {
    let store = store();
    let catalog = builtin_catalog(store.clone()).with("explosive", "tests/explosive.rs", || {
        Ok(Arc::new(Explosive) as Arc<dyn Module>)
    });
    let (core, bot) = core_with(store, catalog);
    core.reload_all_modules(None).await.unwrap();

    core.dispatch(Message::from_command(100, "boom", vec![]).with_sender(neo()))
        .await;
    assert_eq!(core.stats().errors(), 1);

    // the next update is served as usual
    core.dispatch(Message::from_command(100, "trends", vec![]).with_sender(neo()))
        .await;
    assert_eq!(bot.sent().len(), 1);
    assert!(core.is_loaded("explosive"));
}

#[tokio::test]
async fn failed_handler_attach_takes_remaining_modules_out_of_service() {
    let store = store();
    let (core, bot) = core_with(store.clone(), builtin_catalog(store));
    core.reload_all_modules(None).await.unwrap();
    let errors_before = core.kernel_log().count(Severity::Error);

    core.application().unwrap().dispatcher.close();
    let target = ProgressTarget {
        chat_id: 1,
        message_id: 42,
    };
    let result = core.reload_all_modules(Some(target)).await;

    assert!(matches!(result, Err(BotError::Transport(_))));
    assert_eq!(core.reload_state(), ReloadState::Idle { last: Some(CycleStatus::Failed) });
    let statuses = core.module_status();
    assert_eq!(statuses.len(), 4);
    for status in statuses {
        assert!(!status.enabled, "{} still enabled", status.name);
        assert_eq!(status.handler_count, 0);
        assert!(status.last_error.is_some());
    }
    assert!(core.resource_names().is_empty());
    assert!(core.kernel_log().count(Severity::Error) > errors_before);

    let (chat, id, text) = bot.edits().last().cloned().unwrap();
    assert_eq!((chat, id), (1, 42));
    assert!(text.contains("Reload failed"));
    assert!(text.contains("dispatcher is closed"));
}

#[tokio::test]
async fn unload_runs_teardown_even_when_it_fails() {
    let clean = Arc::new(AtomicUsize::new(0));
    let failing = Arc::new(AtomicUsize::new(0));
    let panicking = Arc::new(AtomicUsize::new(0));
    let catalog = ModuleCatalog::new()
        .with("clean", "tests/clean.rs", tracked(&clean, Teardown::Clean))
        .with("failing", "tests/failing.rs", tracked(&failing, Teardown::Fails))
        .with("panicking", "tests/panicking.rs", tracked(&panicking, Teardown::Panics));
    let (core, _bot) = core_with(store(), catalog);
    core.reload_all_modules(None).await.unwrap();

    let report = core.reload_all_modules(None).await.unwrap();
    assert_eq!(report.unloaded, vec!["clean", "failing", "panicking"]);
    assert_eq!(report.status(), CycleStatus::Success);
    for counter in [&clean, &failing, &panicking] {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    assert!(core.unload_module("panicking").await);
    assert_eq!(panicking.load(Ordering::SeqCst), 2);
    assert!(!core.is_loaded("panicking"));
    assert!(!core.unload_module("panicking").await);
    assert!(core.is_loaded("clean"));
}

#[tokio::test]
async fn startup_reports_to_reachable_owners() {
    ensure_init();
    let mut config = Config::default();
    config.owners = vec![1, 2];
    let store = store();
    let bot = Arc::new(RecordingBot::default());
    bot.block_chat(2);
    let core = Arc::new(BotCore::new(config, store.clone(), builtin_catalog(store)).with_application(bot.clone()));

    let report = core.post_init().await.unwrap();

    assert_eq!(report.status(), CycleStatus::Success);
    assert!(bot.sent_to(1)[0].contains("Starting up"));
    assert!(bot.sent_to(2).is_empty());
    let (chat, _, text) = bot.edits().last().cloned().unwrap();
    assert_eq!(chat, 1);
    assert!(text.contains("is ready"));
    assert!(core.is_loaded("profile"));
}

#[tokio::test]
async fn panic_events_reach_every_owner() {
    ensure_init();
    let mut config = Config::default();
    config.owners = vec![1, 2, 3];
    let bot = Arc::new(RecordingBot::default());
    bot.block_chat(2);
    let core = Arc::new(BotCore::new(config, store(), ModuleCatalog::new()).with_application(bot.clone()));

    let event = core.log_kernel_event(Severity::Panic, "Database", "connection lost");
    assert_eq!(event.severity, Severity::Panic);
    settle().await;

    assert!(bot.sent_to(1)[0].contains("connection lost"));
    assert!(bot.sent_to(2).is_empty());
    // the failed delivery to owner 2 does not stop the rest
    assert!(bot.sent_to(3)[0].contains("connection lost"));
}

#[tokio::test]
async fn failed_startup_is_a_panic_event() {
    ensure_init();
    let mut config = Config::default();
    config.owners = vec![1];
    let store = store();
    let bot = Arc::new(RecordingBot::default());
    let core = Arc::new(BotCore::new(config, store.clone(), builtin_catalog(store)).with_application(bot.clone()));
    core.application().unwrap().dispatcher.close();

    assert!(core.post_init().await.is_err());
    let latest = core.kernel_log().latest().unwrap();
    assert_eq!(latest.severity, Severity::Panic);
    assert_eq!(latest.action, "Startup");

    settle().await;
    assert!(bot.sent_to(1).iter().any(|text| text.contains("Startup")));
}
