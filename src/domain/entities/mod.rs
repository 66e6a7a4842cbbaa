//! Domain entities - Core business objects with no external dependencies

pub mod user;
pub mod message;
pub mod page;

pub use user::{
    BadgeDefinition, Rating, RatingCategory, ThemeDefinition, ThemeStyles, TrendEntry, User,
    UserProfile,
};
pub use message::{Content, Message};
pub use page::Page;
