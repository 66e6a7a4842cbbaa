//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::application::errors::ConfigError;

/// Bot configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub bot: BotConfig,
    /// Telegram ids allowed into the admin panel
    pub owners: Vec<i64>,
    pub modules: ModulesConfig,
    pub database: DatabaseConfig,
    pub admin: AdminConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BotConfig {
    pub name: String,
    pub prefix: String,
    pub token: Option<String>,
}

/// Which feature modules take part in discovery
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ModulesConfig {
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AdminConfig {
    /// Shared secret unlocking the SQL console, console disabled when unset
    pub sql_password: Option<String>,
    pub modules_per_page: usize,
    pub users_per_page: usize,
    pub events_per_page: usize,
    pub log_tail_lines: usize,
    pub sql_max_rows: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "wiralis-bot".to_string(),
            prefix: "/".to_string(),
            token: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("wiralis.db"),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            sql_password: None,
            modules_per_page: 5,
            users_per_page: 10,
            events_per_page: 5,
            log_tail_lines: 15,
            sql_max_rows: 20,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config.with_env())
    }

    /// Defaults plus environment overrides
    pub fn load_env() -> Self {
        Config::default().with_env()
    }

    /// Apply `BOT_TOKEN`, `WIRALIS_OWNERS` and `WIRALIS_DB`
    pub fn with_env(mut self) -> Self {
        if let Ok(token) = std::env::var("BOT_TOKEN") {
            if !token.trim().is_empty() {
                self.bot.token = Some(token);
            }
        }

        if let Ok(owners) = std::env::var("WIRALIS_OWNERS") {
            let parsed = parse_owner_list(&owners);
            if !parsed.is_empty() {
                self.owners = parsed;
            }
        }

        if let Ok(path) = std::env::var("WIRALIS_DB") {
            self.database.path = PathBuf::from(path);
        }

        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.prefix.is_empty() {
            return Err(ConfigError::InvalidValue("bot.prefix must not be empty".to_string()));
        }
        let admin = &self.admin;
        if admin.modules_per_page == 0 || admin.users_per_page == 0 || admin.events_per_page == 0 {
            return Err(ConfigError::InvalidValue("admin page sizes must be positive".to_string()));
        }
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn is_owner(&self, user_id: i64) -> bool {
        self.owners.contains(&user_id)
    }

    pub fn token(&self) -> Option<&str> {
        self.bot.token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Comma or whitespace separated ids; unparsable entries are skipped
pub fn parse_owner_list(raw: &str) -> Vec<i64> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_list_parsing() {
        assert_eq!(parse_owner_list("1, 2 3,x"), vec![1, 2, 3]);
        assert!(parse_owner_list("").is_empty());
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.admin.modules_per_page, 5);
        assert_eq!(config.admin.users_per_page, 10);
        assert!(config.token().is_none());
    }

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let config: Config = serde_yaml::from_str("owners: [42]\nmodules:\n  disabled: [themes]\n").unwrap();
        assert!(config.is_owner(42));
        assert_eq!(config.modules.disabled, vec!["themes"]);
        assert_eq!(config.bot.prefix, "/");
    }
}
