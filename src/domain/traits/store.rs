use async_trait::async_trait;
use std::collections::HashMap;

use crate::application::errors::StorageError;
use crate::domain::entities::{BadgeDefinition, Rating, ThemeDefinition, TrendEntry, UserProfile};

/// Outcome of a raw statement typed into the admin console
#[derive(Debug, Clone, PartialEq)]
pub enum RawQueryResult {
    Rows {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Affected(usize),
}

/// Store trait - abstraction for data persistence
#[async_trait]
pub trait Store: Send + Sync {
    // User operations
    async fn upsert_user(&self, telegram_id: i64, nickname: &str, username: Option<&str>) -> Result<UserProfile, StorageError>;
    async fn get_user(&self, telegram_id: i64) -> Result<Option<UserProfile>, StorageError>;
    /// Look a user up by telegram id, `@username` or nickname
    async fn find_user(&self, identifier: &str) -> Result<Option<UserProfile>, StorageError>;
    async fn count_users(&self) -> Result<usize, StorageError>;
    /// Newest registrations first
    async fn list_users(&self, limit: usize, offset: usize) -> Result<Vec<UserProfile>, StorageError>;
    async fn set_quote(&self, telegram_id: i64, quote: Option<&str>) -> Result<bool, StorageError>;

    // Profile visibility (block id -> visible to others)
    async fn profile_visibility(&self, telegram_id: i64) -> Result<HashMap<String, bool>, StorageError>;
    async fn set_block_visibility(&self, telegram_id: i64, block_id: &str, visible: bool) -> Result<(), StorageError>;

    // Rating operations
    async fn upsert_vote(&self, voter_id: i64, target_id: i64, vote: i8) -> Result<(), StorageError>;
    async fn rating(&self, telegram_id: i64) -> Result<Rating, StorageError>;
    async fn trends(&self, limit: usize, antihype: bool) -> Result<Vec<TrendEntry>, StorageError>;

    // Badge operations
    async fn badge_by_code(&self, code_name: &str) -> Result<Option<BadgeDefinition>, StorageError>;
    async fn badge_by_id(&self, badge_id: i64) -> Result<Option<BadgeDefinition>, StorageError>;
    /// Returns false when the user already owned the badge
    async fn grant_badge(&self, telegram_id: i64, badge_id: i64, context: Option<&str>) -> Result<bool, StorageError>;
    async fn user_badges(&self, telegram_id: i64) -> Result<Vec<BadgeDefinition>, StorageError>;
    async fn set_active_badge(&self, telegram_id: i64, badge_id: Option<i64>) -> Result<bool, StorageError>;

    // Theme operations
    async fn theme_definitions(&self) -> Result<Vec<ThemeDefinition>, StorageError>;
    /// Returns false when the theme was already unlocked
    async fn unlock_theme(&self, telegram_id: i64, theme_id: i64) -> Result<bool, StorageError>;
    async fn unlocked_themes(&self, telegram_id: i64) -> Result<Vec<ThemeDefinition>, StorageError>;
    async fn set_active_theme(&self, telegram_id: i64, theme_id: Option<i64>) -> Result<bool, StorageError>;

    // Key-value state
    async fn get_state(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set_state(&self, key: &str, value: &str) -> Result<(), StorageError>;

    // Admin console
    async fn table_counts(&self) -> Result<Vec<(String, usize)>, StorageError>;
    async fn execute_raw(&self, sql: &str) -> Result<RawQueryResult, StorageError>;
}
