//! Message dispatcher - Routes messages to the handlers modules attach

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

use super::middleware::{Context, Middleware, MiddlewareError, Next};
use crate::application::errors::BotError;
use crate::domain::entities::{Content, Message};
use crate::kernel::registry::panic_message;
use crate::kernel::BotCore;

/// Handler function type
pub type HandlerFn = Arc<dyn Fn(Arc<BotCore>, Message) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Handler result
pub type HandlerResult = Result<(), BotError>;

/// Handle used to detach a handler again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

impl HandlerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of update a handler reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// `/name`, compared case-insensitively
    Command(String),
    /// Callback data starting with the prefix
    Callback(String),
    /// Any plain text message
    Text,
    /// Every update
    Any,
}

impl Trigger {
    pub fn matches(&self, content: &Content) -> bool {
        match (self, content) {
            (Trigger::Command(expected), Content::Command { name, .. }) => expected.eq_ignore_ascii_case(name),
            (Trigger::Callback(prefix), Content::Callback { data, .. }) => data.starts_with(prefix.as_str()),
            (Trigger::Text, Content::Text(_)) => true,
            (Trigger::Any, _) => true,
            _ => false,
        }
    }
}

/// A routable handler.
///
/// Handlers are grouped; groups run in ascending order and inside a group
/// only the first matching handler runs.
#[derive(Clone)]
pub struct Handler {
    id: HandlerId,
    trigger: Trigger,
    group: i32,
    callback: HandlerFn,
}

impl Handler {
    pub fn new<F, Fut>(trigger: Trigger, f: F) -> Self
    where
        F: Fn(Arc<BotCore>, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            id: HandlerId::new(),
            trigger,
            group: 0,
            callback: Arc::new(move |core, message| Box::pin(f(core, message))),
        }
    }

    pub fn command<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<BotCore>, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::new(Trigger::Command(name.into()), f)
    }

    pub fn callback<F, Fut>(prefix: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<BotCore>, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::new(Trigger::Callback(prefix.into()), f)
    }

    pub fn with_group(mut self, group: i32) -> Self {
        self.group = group;
        self
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn group(&self) -> i32 {
        self.group
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("trigger", &self.trigger)
            .field("group", &self.group)
            .finish()
    }
}

/// Result of routing one update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchOutcome {
    pub blocked: bool,
    pub handled: usize,
    pub failed: usize,
}

/// Handler table of the running application.
///
/// Modules attach handlers during setup and the core detaches them on unload.
/// Once closed, attaching fails: the transport is gone.
pub struct Dispatcher {
    handlers: RwLock<Vec<Handler>>,
    middleware: Vec<Arc<dyn Middleware>>,
    closed: AtomicBool,
}

impl Dispatcher {
    pub fn new(middleware: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            middleware,
            closed: AtomicBool::new(false),
        }
    }

    /// Attach a handler
    pub fn add_handler(&self, handler: Handler) -> Result<HandlerId, BotError> {
        if self.is_closed() {
            return Err(BotError::Transport("dispatcher is closed".to_string()));
        }
        let id = handler.id;
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
        Ok(id)
    }

    /// Detach a handler, false if it was not attached
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|h| h.id != id);
        handlers.len() != before
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Release spare capacity of the handler table
    pub fn compact(&self) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shrink_to_fit();
    }

    /// First matching handler of every group, groups ascending
    fn select(&self, content: &Content) -> Vec<(HandlerId, HandlerFn)> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);

        let mut groups: Vec<i32> = handlers.iter().map(|h| h.group).collect();
        groups.sort_unstable();
        groups.dedup();

        groups
            .into_iter()
            .filter_map(|group| {
                handlers
                    .iter()
                    .find(|h| h.group == group && h.trigger.matches(content))
                    .map(|h| (h.id, h.callback.clone()))
            })
            .collect()
    }

    /// Run the middleware chain, then every selected handler.
    ///
    /// Handler failures and panics are logged and counted; they never stop
    /// the remaining groups.
    pub async fn dispatch(&self, core: Arc<BotCore>, message: Message) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        let ctx = match Next::new(self.middleware.clone()).run(Context::new(message)) {
            Ok(ctx) => ctx,
            Err(MiddlewareError::Blocked(_)) => {
                outcome.blocked = true;
                return outcome;
            }
            Err(e) => {
                tracing::warn!("Middleware failed: {}", e);
                outcome.blocked = true;
                return outcome;
            }
        };

        let message = ctx.message;
        for (id, callback) in self.select(&message.content) {
            let run = AssertUnwindSafe(callback(core.clone(), message.clone())).catch_unwind();
            match run.await {
                Ok(Ok(())) => outcome.handled += 1,
                Ok(Err(e)) => {
                    outcome.failed += 1;
                    tracing::error!(handler = %id, chat_id = message.chat_id, "Handler failed: {}", e);
                }
                Err(panic) => {
                    outcome.failed += 1;
                    tracing::error!(
                        handler = %id,
                        chat_id = message.chat_id,
                        "Handler panicked: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(trigger: Trigger) -> Handler {
        Handler::new(trigger, |_core, _msg| async { Ok(()) })
    }

    #[test]
    fn triggers_match_their_content() {
        let cmd = Content::Command { name: "Profile".to_string(), args: vec![] };
        assert!(Trigger::Command("profile".to_string()).matches(&cmd));
        assert!(!Trigger::Text.matches(&cmd));

        let cb = Content::Callback { query_id: "1".to_string(), data: "core_stats".to_string() };
        assert!(Trigger::Callback("core_".to_string()).matches(&cb));
        assert!(!Trigger::Callback("profile_".to_string()).matches(&cb));
        assert!(Trigger::Any.matches(&cb));
    }

    #[test]
    fn selects_first_match_per_group() {
        let dispatcher = Dispatcher::new(Vec::new());
        let first = dispatcher.add_handler(noop(Trigger::Text)).unwrap();
        dispatcher.add_handler(noop(Trigger::Text)).unwrap();
        let tracker = dispatcher.add_handler(noop(Trigger::Any).with_group(-1)).unwrap();

        let selected: Vec<HandlerId> = dispatcher
            .select(&Content::Text("hi".to_string()))
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(selected, vec![tracker, first]);
    }

    #[test]
    fn closed_dispatcher_rejects_handlers() {
        let dispatcher = Dispatcher::new(Vec::new());
        let id = dispatcher.add_handler(noop(Trigger::Text)).unwrap();
        dispatcher.close();
        assert!(matches!(dispatcher.add_handler(noop(Trigger::Text)), Err(BotError::Transport(_))));
        assert!(dispatcher.remove_handler(id));
        assert!(!dispatcher.remove_handler(id));
    }
}
