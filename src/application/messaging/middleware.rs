//! Middleware system for message processing pipeline
//!
//! Middleware runs synchronously before any handler sees an update and can
//! stop the update from reaching handlers at all.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::domain::entities::{Content, Message};

/// Context passed through middleware chain
#[derive(Debug, Clone)]
pub struct Context {
    pub message: Message,
    pub chat_id: i64,
    pub user_id: i64,
    pub data: HashMap<String, String>,
}

impl Context {
    pub fn new(message: Message) -> Self {
        let chat_id = message.chat_id;
        let user_id = message.user_id();

        Self {
            message,
            chat_id,
            user_id,
            data: HashMap::new(),
        }
    }

    /// Get data from context
    pub fn get(&self, key: &str) -> Option<&String> {
        self.data.get(key)
    }

    /// Set data in context
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), value.into());
    }
}

/// Middleware trait - processors that can intercept message handling
pub trait Middleware: Send + Sync {
    /// Process a message and optionally modify the context
    fn process(&self, ctx: Context, next: Next) -> MiddlewareResult;
}

/// Result of middleware processing
pub type MiddlewareResult = Result<Context, MiddlewareError>;

/// Middleware errors
#[derive(Debug, Clone)]
pub enum MiddlewareError {
    /// Stop processing silently
    Blocked(String),
    /// Internal error
    Internal(String),
}

impl std::fmt::Display for MiddlewareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MiddlewareError::Blocked(msg) => write!(f, "Blocked: {}", msg),
            MiddlewareError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for MiddlewareError {}

/// Next middleware in chain
#[derive(Clone)]
pub struct Next {
    remaining: Arc<Vec<Arc<dyn Middleware>>>,
}

impl Next {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            remaining: Arc::new(middlewares),
        }
    }

    /// Process remaining middleware
    pub fn run(self, ctx: Context) -> MiddlewareResult {
        if let Some(first) = self.remaining.first() {
            let remaining = self.remaining[1..].to_vec();
            let next = Next::new(remaining);
            first.process(ctx, next)
        } else {
            Ok(ctx)
        }
    }
}

/// Middleware chain builder
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    pub fn add<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn build(self) -> Vec<Arc<dyn Middleware>> {
        self.middlewares
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Drops every non-owner update while maintenance mode is on.
///
/// `/core` always passes so owners can switch the mode back off.
pub struct MaintenanceMiddleware {
    enabled: Arc<AtomicBool>,
    owners: Vec<i64>,
}

impl MaintenanceMiddleware {
    pub fn new(enabled: Arc<AtomicBool>, owners: Vec<i64>) -> Self {
        Self { enabled, owners }
    }
}

impl Middleware for MaintenanceMiddleware {
    fn process(&self, ctx: Context, next: Next) -> MiddlewareResult {
        if !self.enabled.load(Ordering::Relaxed) || self.owners.contains(&ctx.user_id) {
            return next.run(ctx);
        }
        if ctx.message.content.command_name() == Some("core") {
            return next.run(ctx);
        }
        Err(MiddlewareError::Blocked("maintenance".to_string()))
    }
}

/// Traffic counters shown in the admin statistics
#[derive(Debug, Default)]
pub struct MessageCounters {
    pub messages_processed: AtomicU64,
    pub commands_executed: AtomicU64,
}

impl MessageCounters {
    pub fn messages(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    pub fn commands(&self) -> u64 {
        self.commands_executed.load(Ordering::Relaxed)
    }
}

/// Counts every update that passes through the chain
pub struct StatsMiddleware {
    counters: Arc<MessageCounters>,
}

impl StatsMiddleware {
    pub fn new(counters: Arc<MessageCounters>) -> Self {
        Self { counters }
    }
}

impl Middleware for StatsMiddleware {
    fn process(&self, ctx: Context, next: Next) -> MiddlewareResult {
        match &ctx.message.content {
            Content::Command { .. } => {
                self.counters.commands_executed.fetch_add(1, Ordering::Relaxed);
            }
            Content::Text(_) => {
                self.counters.messages_processed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        next.run(ctx)
    }
}

/// Logging middleware for debugging
pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn process(&self, ctx: Context, next: Next) -> MiddlewareResult {
        let preview = match &ctx.message.content {
            Content::Text(text) => text.chars().take(50).collect::<String>(),
            Content::Command { name, .. } => format!("/{}", name),
            Content::Callback { data, .. } => format!("[callback] {}", data),
            Content::Empty => "[empty]".to_string(),
        };

        tracing::debug!(chat_id = ctx.chat_id, user_id = ctx.user_id, "{}", preview);

        let chat_id = ctx.chat_id;
        let result = next.run(ctx);
        if let Err(e) = &result {
            tracing::debug!(chat_id, "Update stopped: {}", e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::User;

    fn chain(enabled: bool) -> (Next, Arc<MessageCounters>) {
        let counters = Arc::new(MessageCounters::default());
        let next = Next::new(
            MiddlewareChain::new()
                .add(MaintenanceMiddleware::new(Arc::new(AtomicBool::new(enabled)), vec![1]))
                .add(StatsMiddleware::new(counters.clone()))
                .build(),
        );
        (next, counters)
    }

    #[test]
    fn maintenance_blocks_regular_users() {
        let (next, counters) = chain(true);
        let msg = Message::from_text(5, "hi").with_sender(User::new(5));
        assert!(matches!(next.run(Context::new(msg)), Err(MiddlewareError::Blocked(_))));
        assert_eq!(counters.messages(), 0);
    }

    #[test]
    fn maintenance_lets_owner_and_core_through() {
        let (next, _) = chain(true);
        let owner = Message::from_text(1, "hi").with_sender(User::new(1));
        assert!(next.clone().run(Context::new(owner)).is_ok());

        let core = Message::from_command(5, "core", vec![]).with_sender(User::new(5));
        assert!(next.run(Context::new(core)).is_ok());
    }

    #[test]
    fn stats_count_commands_and_texts() {
        let (next, counters) = chain(false);
        next.clone().run(Context::new(Message::from_text(5, "hi"))).unwrap();
        next.run(Context::new(Message::from_command(5, "profile", vec![]))).unwrap();
        assert_eq!(counters.messages(), 1);
        assert_eq!(counters.commands(), 1);
    }
}
