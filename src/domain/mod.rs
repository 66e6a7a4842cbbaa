//! Domain layer - Core business objects with no I/O
//!
//! This layer contains:
//! - Entities: Core business objects (User, UserProfile, Message, Page)
//! - Traits: Abstractions for infrastructure (Bot, Store)

pub mod entities;
pub mod traits;
