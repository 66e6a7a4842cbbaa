use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;

/// Telegram account that sent an update
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_bot: bool,
}

impl User {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            username: None,
            first_name: None,
            last_name: None,
            is_bot: false,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_name(mut self, first: impl Into<String>, last: Option<impl Into<String>>) -> Self {
        self.first_name = Some(first.into());
        self.last_name = last.map(|l| l.into());
        self
    }

    /// Name used as the initial profile nickname
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name, &self.username) {
            (Some(first), Some(last), _) => format!("{} {}", first, last),
            (Some(first), None, _) => first.clone(),
            (None, _, Some(username)) => username.clone(),
            _ => self.id.to_string(),
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Persisted community profile
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub telegram_id: i64,
    pub nickname: String,
    pub username: Option<String>,
    pub role: String,
    pub quote: Option<String>,
    pub active_badge_id: Option<i64>,
    pub active_theme_id: Option<i64>,
    /// Block id -> visible in restricted views
    pub profile_visibility: HashMap<String, bool>,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn is_visible(&self, block_id: &str) -> bool {
        self.profile_visibility.get(block_id).copied().unwrap_or(true)
    }
}

/// Sum of hype/antihype votes and the position inside its category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rating {
    pub score: i64,
    pub rank: Option<u32>,
}

impl Rating {
    pub fn category(&self) -> RatingCategory {
        match self.score {
            0 => RatingCategory::Neutral,
            s if s > 0 => RatingCategory::Hype,
            _ => RatingCategory::Antihype,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingCategory {
    Hype,
    Antihype,
    Neutral,
}

/// One row of the trends listing
#[derive(Debug, Clone, PartialEq)]
pub struct TrendEntry {
    pub telegram_id: i64,
    pub nickname: String,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BadgeDefinition {
    pub id: i64,
    pub code_name: String,
    pub display_name: String,
    pub emoji: String,
    pub rarity: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThemeDefinition {
    pub id: i64,
    pub code_name: String,
    pub display_name: String,
    pub emoji: String,
    pub rarity: String,
    pub profile_styles: ThemeStyles,
}

/// Decorations a theme applies to rendered text
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ThemeStyles {
    #[serde(default)]
    pub header_emoji: String,
    #[serde(default)]
    pub footer_emoji: String,
    #[serde(default)]
    pub separator: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_full_name() {
        let user = User::new(7).with_username("neo").with_name("Thomas", Some("Anderson"));
        assert_eq!(user.display_name(), "Thomas Anderson");
        assert_eq!(User::new(7).with_username("neo").display_name(), "neo");
        assert_eq!(User::new(7).display_name(), "7");
    }

    #[test]
    fn rating_category_follows_sign() {
        assert_eq!(Rating { score: 0, rank: None }.category(), RatingCategory::Neutral);
        assert_eq!(Rating { score: 3, rank: Some(1) }.category(), RatingCategory::Hype);
        assert_eq!(Rating { score: -2, rank: Some(4) }.category(), RatingCategory::Antihype);
    }
}
