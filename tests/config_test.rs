//! Configuration file tests
//! Run with: cargo test --test config_test

use wiralis_bot::infrastructure::config::Config;
use wiralis_bot::ConfigError;

#[test]
fn saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");

    let mut config = Config::default();
    config.bot.name = "wiralis-test".to_string();
    config.owners = vec![7, 8];
    config.modules.disabled = vec!["themes".to_string()];
    config.admin.sql_max_rows = 5;
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.bot.name, "wiralis-test");
    assert_eq!(loaded.modules.disabled, vec!["themes"]);
    assert_eq!(loaded.admin.sql_max_rows, 5);
    assert!(loaded.is_owner(7) || std::env::var("WIRALIS_OWNERS").is_ok());
}

#[test]
fn keys_are_kebab_case_and_optional() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "admin:\n  users-per-page: 3\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.admin.users_per_page, 3);
    assert_eq!(config.admin.modules_per_page, 5);
    assert_eq!(config.bot.prefix, "/");
}

#[test]
fn empty_prefix_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "bot:\n  prefix: \"\"\n").unwrap();

    assert!(matches!(Config::load(&path), Err(ConfigError::InvalidValue(_))));
}

#[test]
fn missing_file_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Config::load(dir.path().join("absent.yaml"));
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}
