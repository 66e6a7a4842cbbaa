//! Message handling - Event-driven message processing

pub mod dispatcher;
pub mod middleware;
pub mod parser;

pub use dispatcher::{DispatchOutcome, Dispatcher, Handler, HandlerFn, HandlerId, HandlerResult, Trigger};
pub use middleware::{
    LoggingMiddleware, MaintenanceMiddleware, MessageCounters, Middleware, MiddlewareChain, StatsMiddleware,
};
pub use parser::MessageParser;
