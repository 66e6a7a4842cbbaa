//! Infrastructure layer - External concerns
//!
//! This layer contains:
//! - Config: YAML configuration loading
//! - Database: SQLite persistence behind `Store`
//! - Adapters: Telegram and console transports
//! - Logging: tracing subscriber setup

pub mod adapters;
pub mod config;
pub mod database;
pub mod logging;
