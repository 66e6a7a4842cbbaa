//! SQLite persistence behind the `Store` trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::application::errors::StorageError;
use crate::domain::entities::{BadgeDefinition, Rating, ThemeDefinition, ThemeStyles, TrendEntry, UserProfile};
use crate::domain::traits::{RawQueryResult, Store};

const USER_COLUMNS: &str =
    "telegram_id, nickname, username, role, quote, active_badge_id, active_theme_id, profile_visibility, created_at";

/// (code, display name, emoji, rarity)
const SEED_BADGES: [(&str, &str, &str, &str); 4] = [
    ("founder", "Founder", "👑", "legendary"),
    ("pioneer", "Pioneer", "🚀", "epic"),
    ("hype_star", "Hype Star", "🌟", "rare"),
    ("helper", "Helper", "🤝", "common"),
];

/// (code, display name, emoji, rarity, header, footer, separator)
const SEED_THEMES: [(&str, &str, &str, &str, &str, &str, &str); 3] = [
    ("classic", "Classic", "📜", "common", "", "", "──────────"),
    ("neon", "Neon", "🌈", "rare", "🌆", "🌃", "━━━━━━━━━━"),
    ("matrix", "Matrix", "💾", "epic", "▓▒░", "░▒▓", "· · · · · ·"),
];

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref())?;
        let db = Self::from_connection(conn)?;
        info!(path = %path.as_ref().display(), "Database opened");
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        let db = Self { conn: Mutex::new(conn) };
        db.init_tables()?;
        db.seed_definitions()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_tables(&self) -> Result<(), StorageError> {
        self.conn().execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                telegram_id INTEGER UNIQUE NOT NULL,
                nickname TEXT NOT NULL,
                username TEXT,
                role TEXT NOT NULL DEFAULT 'player',
                quote TEXT,
                active_badge_id INTEGER REFERENCES badge_definitions(id) ON DELETE SET NULL,
                active_theme_id INTEGER REFERENCES theme_definitions(id) ON DELETE SET NULL,
                profile_visibility TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS user_ratings (
                voter_telegram_id INTEGER NOT NULL,
                target_telegram_id INTEGER NOT NULL,
                vote_type INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (voter_telegram_id, target_telegram_id)
            );
            CREATE TABLE IF NOT EXISTS badge_definitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code_name TEXT UNIQUE NOT NULL,
                display_name TEXT NOT NULL,
                emoji TEXT NOT NULL,
                rarity TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            );
            CREATE TABLE IF NOT EXISTS user_badges (
                telegram_id INTEGER NOT NULL,
                badge_id INTEGER NOT NULL REFERENCES badge_definitions(id),
                context TEXT,
                awarded_at TEXT NOT NULL,
                PRIMARY KEY (telegram_id, badge_id)
            );
            CREATE TABLE IF NOT EXISTS theme_definitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code_name TEXT UNIQUE NOT NULL,
                display_name TEXT NOT NULL,
                emoji TEXT NOT NULL,
                rarity TEXT NOT NULL,
                profile_styles TEXT NOT NULL DEFAULT '{}',
                is_active INTEGER NOT NULL DEFAULT 1
            );
            CREATE TABLE IF NOT EXISTS user_themes (
                telegram_id INTEGER NOT NULL,
                theme_id INTEGER NOT NULL REFERENCES theme_definitions(id),
                unlocked_at TEXT NOT NULL,
                PRIMARY KEY (telegram_id, theme_id)
            );
            CREATE TABLE IF NOT EXISTS bot_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_ratings_target ON user_ratings(target_telegram_id);",
        )?;
        Ok(())
    }

    fn seed_definitions(&self) -> Result<(), StorageError> {
        let conn = self.conn();
        for (code, name, emoji, rarity) in SEED_BADGES {
            conn.execute(
                "INSERT OR IGNORE INTO badge_definitions (code_name, display_name, emoji, rarity) VALUES (?1, ?2, ?3, ?4)",
                params![code, name, emoji, rarity],
            )?;
        }
        for (code, name, emoji, rarity, header, footer, separator) in SEED_THEMES {
            let styles = serde_json::to_string(&ThemeStyles {
                header_emoji: header.to_string(),
                footer_emoji: footer.to_string(),
                separator: separator.to_string(),
            })?;
            conn.execute(
                "INSERT OR IGNORE INTO theme_definitions (code_name, display_name, emoji, rarity, profile_styles)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![code, name, emoji, rarity, styles],
            )?;
        }
        Ok(())
    }

    fn query_user(conn: &Connection, clause: &str, value: &dyn rusqlite::ToSql) -> Result<Option<UserProfile>, StorageError> {
        let sql = format!("SELECT {} FROM users WHERE {} LIMIT 1", USER_COLUMNS, clause);
        let user = conn.query_row(&sql, [value], user_from_row).optional()?;
        Ok(user)
    }

    fn rating_sums(conn: &Connection) -> Result<Vec<(i64, i64)>, StorageError> {
        // ordered by score, ties broken by most recent vote
        let mut stmt = conn.prepare(
            "SELECT target_telegram_id, SUM(vote_type) AS score, MAX(updated_at) AS last_vote
             FROM user_ratings GROUP BY target_telegram_id
             ORDER BY score DESC, last_vote DESC",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut sums = Vec::new();
        for row in rows {
            sums.push(row?);
        }
        Ok(sums)
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserProfile> {
    let visibility: String = row.get(7)?;
    let created_at: String = row.get(8)?;
    Ok(UserProfile {
        telegram_id: row.get(0)?,
        nickname: row.get(1)?,
        username: row.get(2)?,
        role: row.get(3)?,
        quote: row.get(4)?,
        active_badge_id: row.get(5)?,
        active_theme_id: row.get(6)?,
        profile_visibility: serde_json::from_str(&visibility).unwrap_or_default(),
        created_at: parse_timestamp(&created_at),
    })
}

fn badge_from_row(row: &Row<'_>) -> rusqlite::Result<BadgeDefinition> {
    Ok(BadgeDefinition {
        id: row.get(0)?,
        code_name: row.get(1)?,
        display_name: row.get(2)?,
        emoji: row.get(3)?,
        rarity: row.get(4)?,
    })
}

fn theme_from_row(row: &Row<'_>) -> rusqlite::Result<ThemeDefinition> {
    let styles: String = row.get(5)?;
    Ok(ThemeDefinition {
        id: row.get(0)?,
        code_name: row.get(1)?,
        display_name: row.get(2)?,
        emoji: row.get(3)?,
        rarity: row.get(4)?,
        profile_styles: serde_json::from_str(&styles).unwrap_or_default(),
    })
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>, StorageError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn cell(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

#[async_trait]
impl Store for Database {
    async fn upsert_user(&self, telegram_id: i64, nickname: &str, username: Option<&str>) -> Result<UserProfile, StorageError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO users (telegram_id, nickname, username, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(telegram_id) DO UPDATE SET username = excluded.username",
            params![telegram_id, nickname, username, now()],
        )?;
        Self::query_user(&conn, "telegram_id = ?1", &telegram_id)?
            .ok_or_else(|| StorageError::NotFound(format!("user {}", telegram_id)))
    }

    async fn get_user(&self, telegram_id: i64) -> Result<Option<UserProfile>, StorageError> {
        Self::query_user(&self.conn(), "telegram_id = ?1", &telegram_id)
    }

    async fn find_user(&self, identifier: &str) -> Result<Option<UserProfile>, StorageError> {
        let identifier = identifier.trim();
        let conn = self.conn();
        if let Some(username) = identifier.strip_prefix('@') {
            return Self::query_user(&conn, "username = ?1 COLLATE NOCASE", &username);
        }
        if let Ok(id) = identifier.parse::<i64>() {
            if let Some(user) = Self::query_user(&conn, "telegram_id = ?1", &id)? {
                return Ok(Some(user));
            }
        }
        match Self::query_user(&conn, "username = ?1 COLLATE NOCASE", &identifier)? {
            Some(user) => Ok(Some(user)),
            None => Self::query_user(&conn, "nickname = ?1 COLLATE NOCASE", &identifier),
        }
    }

    async fn count_users(&self) -> Result<usize, StorageError> {
        let count: i64 = self.conn().query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    async fn list_users(&self, limit: usize, offset: usize) -> Result<Vec<UserProfile>, StorageError> {
        let conn = self.conn();
        let sql = format!("SELECT {} FROM users ORDER BY id DESC LIMIT ?1 OFFSET ?2", USER_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], user_from_row)?;
        collect(rows)
    }

    async fn set_quote(&self, telegram_id: i64, quote: Option<&str>) -> Result<bool, StorageError> {
        let changed = self.conn().execute(
            "UPDATE users SET quote = ?1 WHERE telegram_id = ?2",
            params![quote, telegram_id],
        )?;
        Ok(changed > 0)
    }

    async fn profile_visibility(&self, telegram_id: i64) -> Result<HashMap<String, bool>, StorageError> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT profile_visibility FROM users WHERE telegram_id = ?1",
                [telegram_id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(HashMap::new()),
        }
    }

    async fn set_block_visibility(&self, telegram_id: i64, block_id: &str, visible: bool) -> Result<(), StorageError> {
        let conn = self.conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT profile_visibility FROM users WHERE telegram_id = ?1",
                [telegram_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Err(StorageError::NotFound(format!("user {}", telegram_id)));
        };

        let mut visibility: HashMap<String, bool> = serde_json::from_str(&raw).unwrap_or_default();
        visibility.insert(block_id.to_string(), visible);
        conn.execute(
            "UPDATE users SET profile_visibility = ?1 WHERE telegram_id = ?2",
            params![serde_json::to_string(&visibility)?, telegram_id],
        )?;
        debug!(telegram_id, block_id, visible, "Block visibility updated");
        Ok(())
    }

    async fn upsert_vote(&self, voter_id: i64, target_id: i64, vote: i8) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO user_ratings (voter_telegram_id, target_telegram_id, vote_type, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(voter_telegram_id, target_telegram_id)
             DO UPDATE SET vote_type = excluded.vote_type, updated_at = excluded.updated_at",
            params![voter_id, target_id, vote.signum() as i64, now()],
        )?;
        Ok(())
    }

    async fn rating(&self, telegram_id: i64) -> Result<Rating, StorageError> {
        let sums = Self::rating_sums(&self.conn())?;
        let score = sums
            .iter()
            .find(|(id, _)| *id == telegram_id)
            .map(|(_, s)| *s)
            .unwrap_or(0);
        if score == 0 {
            return Ok(Rating { score, rank: None });
        }

        // hype ranks from the top, antihype from the bottom
        let same_side: Vec<i64> = if score > 0 {
            sums.iter().filter(|(_, s)| *s > 0).map(|(id, _)| *id).collect()
        } else {
            let mut low: Vec<_> = sums.iter().filter(|(_, s)| *s < 0).copied().collect();
            low.sort_by_key(|(_, s)| *s);
            low.into_iter().map(|(id, _)| id).collect()
        };
        let rank = same_side
            .iter()
            .position(|id| *id == telegram_id)
            .map(|p| p as u32 + 1);
        Ok(Rating { score, rank })
    }

    async fn trends(&self, limit: usize, antihype: bool) -> Result<Vec<TrendEntry>, StorageError> {
        let sql = if antihype {
            "SELECT u.telegram_id, u.nickname, SUM(r.vote_type) AS score, MAX(r.updated_at) AS last_vote
             FROM user_ratings r JOIN users u ON u.telegram_id = r.target_telegram_id
             GROUP BY u.telegram_id HAVING score < 0
             ORDER BY score ASC, last_vote DESC LIMIT ?1"
        } else {
            "SELECT u.telegram_id, u.nickname, SUM(r.vote_type) AS score, MAX(r.updated_at) AS last_vote
             FROM user_ratings r JOIN users u ON u.telegram_id = r.target_telegram_id
             GROUP BY u.telegram_id HAVING score > 0
             ORDER BY score DESC, last_vote DESC LIMIT ?1"
        };
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(TrendEntry {
                telegram_id: row.get(0)?,
                nickname: row.get(1)?,
                score: row.get(2)?,
            })
        })?;
        collect(rows)
    }

    async fn badge_by_code(&self, code_name: &str) -> Result<Option<BadgeDefinition>, StorageError> {
        let badge = self
            .conn()
            .query_row(
                "SELECT id, code_name, display_name, emoji, rarity FROM badge_definitions
                 WHERE code_name = ?1 AND is_active = 1",
                [code_name],
                badge_from_row,
            )
            .optional()?;
        Ok(badge)
    }

    async fn badge_by_id(&self, badge_id: i64) -> Result<Option<BadgeDefinition>, StorageError> {
        let badge = self
            .conn()
            .query_row(
                "SELECT id, code_name, display_name, emoji, rarity FROM badge_definitions WHERE id = ?1",
                [badge_id],
                badge_from_row,
            )
            .optional()?;
        Ok(badge)
    }

    async fn grant_badge(&self, telegram_id: i64, badge_id: i64, context: Option<&str>) -> Result<bool, StorageError> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO user_badges (telegram_id, badge_id, context, awarded_at) VALUES (?1, ?2, ?3, ?4)",
            params![telegram_id, badge_id, context, now()],
        )?;
        Ok(inserted > 0)
    }

    async fn user_badges(&self, telegram_id: i64) -> Result<Vec<BadgeDefinition>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT b.id, b.code_name, b.display_name, b.emoji, b.rarity
             FROM user_badges ub JOIN badge_definitions b ON b.id = ub.badge_id
             WHERE ub.telegram_id = ?1 AND b.is_active = 1
             ORDER BY ub.awarded_at, b.id",
        )?;
        let rows = stmt.query_map([telegram_id], badge_from_row)?;
        collect(rows)
    }

    async fn set_active_badge(&self, telegram_id: i64, badge_id: Option<i64>) -> Result<bool, StorageError> {
        let changed = self.conn().execute(
            "UPDATE users SET active_badge_id = ?1 WHERE telegram_id = ?2",
            params![badge_id, telegram_id],
        )?;
        Ok(changed > 0)
    }

    async fn theme_definitions(&self) -> Result<Vec<ThemeDefinition>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, code_name, display_name, emoji, rarity, profile_styles
             FROM theme_definitions WHERE is_active = 1 ORDER BY id",
        )?;
        let rows = stmt.query_map([], theme_from_row)?;
        collect(rows)
    }

    async fn unlock_theme(&self, telegram_id: i64, theme_id: i64) -> Result<bool, StorageError> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO user_themes (telegram_id, theme_id, unlocked_at) VALUES (?1, ?2, ?3)",
            params![telegram_id, theme_id, now()],
        )?;
        Ok(inserted > 0)
    }

    async fn unlocked_themes(&self, telegram_id: i64) -> Result<Vec<ThemeDefinition>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT t.id, t.code_name, t.display_name, t.emoji, t.rarity, t.profile_styles
             FROM user_themes ut JOIN theme_definitions t ON t.id = ut.theme_id
             WHERE ut.telegram_id = ?1 AND t.is_active = 1
             ORDER BY t.rarity, t.display_name",
        )?;
        let rows = stmt.query_map([telegram_id], theme_from_row)?;
        collect(rows)
    }

    async fn set_active_theme(&self, telegram_id: i64, theme_id: Option<i64>) -> Result<bool, StorageError> {
        let changed = self.conn().execute(
            "UPDATE users SET active_theme_id = ?1 WHERE telegram_id = ?2",
            params![theme_id, telegram_id],
        )?;
        Ok(changed > 0)
    }

    async fn get_state(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .conn()
            .query_row("SELECT value FROM bot_state WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    async fn set_state(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO bot_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    async fn table_counts(&self) -> Result<Vec<(String, usize)>, StorageError> {
        let conn = self.conn();
        let tables: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            collect(rows)?
        };

        let mut counts = Vec::with_capacity(tables.len());
        for table in tables {
            let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| row.get(0))?;
            counts.push((table, count as usize));
        }
        Ok(counts)
    }

    async fn execute_raw(&self, sql: &str) -> Result<RawQueryResult, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;

        if stmt.column_count() == 0 {
            let affected = stmt.execute([])?;
            info!(affected, "Raw statement executed");
            return Ok(RawQueryResult::Affected(affected));
        }

        let headers: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = headers.len();
        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut cells = Vec::with_capacity(width);
            for i in 0..width {
                cells.push(cell(row.get_ref(i)?));
            }
            rows.push(cells);
        }
        Ok(RawQueryResult::Rows { headers, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn upsert_keeps_nickname_and_updates_username() {
        let db = db();
        db.upsert_user(1, "Neo", Some("neo")).await.unwrap();
        let user = db.upsert_user(1, "Thomas", Some("the_one")).await.unwrap();
        assert_eq!(user.nickname, "Neo");
        assert_eq!(user.username.as_deref(), Some("the_one"));
        assert_eq!(user.role, "player");
        assert_eq!(db.count_users().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn find_user_by_any_identifier() {
        let db = db();
        db.upsert_user(42, "Trinity", Some("trin")).await.unwrap();
        assert!(db.find_user("42").await.unwrap().is_some());
        assert!(db.find_user("@TRIN").await.unwrap().is_some());
        assert!(db.find_user("trinity").await.unwrap().is_some());
        assert!(db.find_user("@nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_users_newest_first() {
        let db = db();
        for id in 1..=3 {
            db.upsert_user(id, &format!("u{}", id), None).await.unwrap();
        }
        let ids: Vec<_> = db.list_users(2, 0).await.unwrap().iter().map(|u| u.telegram_id).collect();
        assert_eq!(ids, vec![3, 2]);
        assert_eq!(db.list_users(2, 2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn votes_are_upserted_and_ranked() {
        let db = db();
        for id in 1..=4 {
            db.upsert_user(id, &format!("u{}", id), None).await.unwrap();
        }
        db.upsert_vote(1, 2, 1).await.unwrap();
        db.upsert_vote(3, 2, 1).await.unwrap();
        db.upsert_vote(1, 4, 1).await.unwrap();
        // changing a vote replaces it
        db.upsert_vote(1, 4, -1).await.unwrap();

        assert_eq!(db.rating(2).await.unwrap(), Rating { score: 2, rank: Some(1) });
        assert_eq!(db.rating(4).await.unwrap(), Rating { score: -1, rank: Some(1) });
        assert_eq!(db.rating(3).await.unwrap(), Rating { score: 0, rank: None });

        let hype = db.trends(10, false).await.unwrap();
        assert_eq!(hype.len(), 1);
        assert_eq!(hype[0].telegram_id, 2);
        let antihype = db.trends(10, true).await.unwrap();
        assert_eq!(antihype[0].score, -1);
    }

    #[tokio::test]
    async fn visibility_round_trips_through_json() {
        let db = db();
        db.upsert_user(5, "Morpheus", None).await.unwrap();
        db.set_block_visibility(5, "profile_rating", false).await.unwrap();
        let map = db.profile_visibility(5).await.unwrap();
        assert_eq!(map.get("profile_rating"), Some(&false));
        assert!(db.set_block_visibility(6, "profile_rating", false).await.is_err());
    }

    #[tokio::test]
    async fn seeded_badges_can_be_granted_once() {
        let db = db();
        db.upsert_user(7, "Oracle", None).await.unwrap();
        let badge = db.badge_by_code("pioneer").await.unwrap().unwrap();
        assert!(db.grant_badge(7, badge.id, None).await.unwrap());
        assert!(!db.grant_badge(7, badge.id, None).await.unwrap());
        assert_eq!(db.user_badges(7).await.unwrap().len(), 1);
        assert_eq!(db.theme_definitions().await.unwrap().len(), SEED_THEMES.len());
    }

    #[tokio::test]
    async fn raw_console_reports_rows_and_changes() {
        let db = db();
        db.upsert_user(8, "Tank", None).await.unwrap();
        match db.execute_raw("SELECT telegram_id, nickname FROM users").await.unwrap() {
            RawQueryResult::Rows { headers, rows } => {
                assert_eq!(headers, vec!["telegram_id", "nickname"]);
                assert_eq!(rows, vec![vec!["8".to_string(), "Tank".to_string()]]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            db.execute_raw("UPDATE users SET role = 'admin'").await.unwrap(),
            RawQueryResult::Affected(1)
        );
        assert!(db.execute_raw("SELEC nonsense").await.is_err());
    }
}
