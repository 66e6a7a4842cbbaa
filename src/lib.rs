//! WIRALIS community bot: profiles, badges, themes and peer rating on top of
//! a hot-reloadable module kernel.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod kernel;
pub mod modules;

pub use application::errors::{BotError, ConfigError, ModuleError, StorageError};
pub use infrastructure::config::Config;
pub use kernel::BotCore;
