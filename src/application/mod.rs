//! Application layer - Message routing and errors
//!
//! This layer contains:
//! - Errors: Domain-specific errors
//! - Messaging: Message parsing, middleware, dispatching
//! - Format: HTML helpers

pub mod errors;
pub mod format;
pub mod messaging;
