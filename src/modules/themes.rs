//! Cosmetic profile themes

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, PoisonError};
use tracing::{info, warn};

use crate::application::errors::{ModuleError, StorageError};
use crate::application::format::escape_html;
use crate::application::messaging::{Handler, HandlerResult};
use crate::domain::entities::{Content, Message, ThemeDefinition};
use crate::domain::traits::{Keyboard, KeyboardButton, Store};
use crate::kernel::{BotCore, Module, ModuleSetup, SharedResource};
use crate::modules::profile::{self, BlockContent, ProfileBlockManager, RenderResult};

pub const RESOURCE_NAME: &str = "theme_manager";
pub const BLOCK_ID: &str = "theme_info";

/// Decorate `text` with a theme's header, footer and separator
pub fn apply_theme_to_text(text: &str, theme: Option<&ThemeDefinition>) -> String {
    let Some(theme) = theme else {
        return text.to_string();
    };
    let styles = &theme.profile_styles;

    let mut result = text.to_string();
    if !styles.header_emoji.is_empty() {
        result = format!("{}\n{}", styles.header_emoji, result);
    }
    if !styles.footer_emoji.is_empty() {
        result = format!("{}\n{}", result, styles.footer_emoji);
    }
    if !styles.separator.is_empty() {
        result = result.replace("\n\n", &format!("\n{}\n", styles.separator));
    }
    result
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThemeOutcome {
    Unlocked(ThemeDefinition),
    AlreadyUnlocked(ThemeDefinition),
    Applied(ThemeDefinition),
    Reset,
    NotUnlocked,
    UnknownTheme,
    UnknownUser,
}

impl ThemeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ThemeOutcome::Unlocked(_) | ThemeOutcome::Applied(_) | ThemeOutcome::Reset
        )
    }

    pub fn message(&self) -> String {
        match self {
            ThemeOutcome::Unlocked(t) => format!("🎨 Theme unlocked: {}", t.display_name),
            ThemeOutcome::AlreadyUnlocked(t) => format!("Theme {} is already unlocked.", t.display_name),
            ThemeOutcome::Applied(t) => format!("🎨 Theme applied: {}", t.display_name),
            ThemeOutcome::Reset => "🎨 Default look restored.".to_string(),
            ThemeOutcome::NotUnlocked => "You haven't unlocked this theme.".to_string(),
            ThemeOutcome::UnknownTheme => "Theme not found.".to_string(),
            ThemeOutcome::UnknownUser => "User not found.".to_string(),
        }
    }
}

/// Theme lookups with an id -> definition cache
pub struct ThemeManager {
    store: Arc<dyn Store>,
    cache: RwLock<HashMap<i64, ThemeDefinition>>,
}

impl ThemeManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Reload every definition into the cache
    pub async fn load_cache(&self) -> Result<usize, StorageError> {
        let themes = self.store.theme_definitions().await?;
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        *cache = themes.into_iter().map(|t| (t.id, t)).collect();
        info!(count = cache.len(), "Theme cache loaded");
        Ok(cache.len())
    }

    pub fn cached(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub async fn theme_by_id(&self, theme_id: i64) -> Result<Option<ThemeDefinition>, StorageError> {
        let hit = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&theme_id)
            .cloned();
        if hit.is_some() {
            return Ok(hit);
        }
        let themes = self.store.theme_definitions().await?;
        Ok(themes.into_iter().find(|t| t.id == theme_id))
    }

    pub async fn theme_by_code(&self, code_name: &str) -> Result<Option<ThemeDefinition>, StorageError> {
        let themes = self.store.theme_definitions().await?;
        Ok(themes.into_iter().find(|t| t.code_name == code_name))
    }

    pub async fn unlock(&self, user_id: i64, theme_id: i64) -> Result<ThemeOutcome, StorageError> {
        let Some(theme) = self.theme_by_id(theme_id).await? else {
            return Ok(ThemeOutcome::UnknownTheme);
        };
        if self.store.get_user(user_id).await?.is_none() {
            return Ok(ThemeOutcome::UnknownUser);
        }
        if self.store.unlock_theme(user_id, theme_id).await? {
            info!(user_id, theme = %theme.code_name, "Theme unlocked");
            Ok(ThemeOutcome::Unlocked(theme))
        } else {
            Ok(ThemeOutcome::AlreadyUnlocked(theme))
        }
    }

    /// Activate an unlocked theme, `None` resets to the default look
    pub async fn apply(&self, user_id: i64, theme_id: Option<i64>) -> Result<ThemeOutcome, StorageError> {
        let Some(theme_id) = theme_id else {
            return Ok(if self.store.set_active_theme(user_id, None).await? {
                ThemeOutcome::Reset
            } else {
                ThemeOutcome::UnknownUser
            });
        };

        let unlocked = self.store.unlocked_themes(user_id).await?;
        let Some(theme) = unlocked.into_iter().find(|t| t.id == theme_id) else {
            return Ok(ThemeOutcome::NotUnlocked);
        };
        if !self.store.set_active_theme(user_id, Some(theme_id)).await? {
            return Ok(ThemeOutcome::UnknownUser);
        }
        info!(user_id, theme = %theme.code_name, "Theme applied");
        Ok(ThemeOutcome::Applied(theme))
    }

    pub async fn unlocked(&self, user_id: i64) -> Result<Vec<ThemeDefinition>, StorageError> {
        self.store.unlocked_themes(user_id).await
    }

    pub async fn active_theme(&self, user_id: i64) -> Result<Option<ThemeDefinition>, StorageError> {
        let Some(user) = self.store.get_user(user_id).await? else {
            return Ok(None);
        };
        match user.active_theme_id {
            Some(id) => self.theme_by_id(id).await,
            None => Ok(None),
        }
    }

    /// Apply the user's active theme to a rendered profile
    pub async fn style_profile(&self, user_id: i64, text: &str) -> String {
        match self.active_theme(user_id).await {
            Ok(theme) => apply_theme_to_text(text, theme.as_ref()),
            Err(e) => {
                warn!(user_id, "Active theme lookup failed: {}", e);
                text.to_string()
            }
        }
    }
}

pub struct ThemesModule {
    manager: Arc<ThemeManager>,
}

impl ThemesModule {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            manager: Arc::new(ThemeManager::new(store)),
        }
    }
}

#[async_trait]
impl Module for ThemesModule {
    async fn setup(&self, core: &Arc<BotCore>) -> Result<ModuleSetup, ModuleError> {
        self.manager.load_cache().await?;

        if let Some(blocks) = core.resource::<ProfileBlockManager>(profile::RESOURCE_NAME) {
            let manager = self.manager.clone();
            blocks.register_block(BLOCK_ID, "🎨 Theme", 60, move |subject| theme_block(manager.clone(), subject));
        } else {
            warn!("profile_manager not bound, theme block not registered");
        }

        let manager = self.manager.clone();
        let themes = Handler::command("themes", move |core, msg| themes_command(core, msg, manager.clone()));

        let manager = self.manager.clone();
        let grant = Handler::command("granttheme", move |core, msg| {
            let manager = manager.clone();
            async move { grant_command(core, msg, manager).await }
        });

        let manager = self.manager.clone();
        let callbacks = Handler::callback("theme", move |core, msg| {
            let manager = manager.clone();
            async move { theme_callback(core, msg, manager).await }
        });

        Ok(ModuleSetup::new()
            .handler(themes)
            .handler(grant)
            .handler(callbacks)
            .command("themes"))
    }

    async fn cleanup(&self, core: &BotCore) -> Result<(), ModuleError> {
        if let Some(blocks) = core.resource::<ProfileBlockManager>(profile::RESOURCE_NAME) {
            blocks.unregister_block(BLOCK_ID);
        }
        Ok(())
    }

    fn resources(&self) -> Vec<SharedResource> {
        vec![SharedResource::new(RESOURCE_NAME, self.manager.clone())]
    }

    fn exports(&self) -> Vec<&'static str> {
        vec!["setup", "cleanup", "apply_theme_to_text"]
    }
}

async fn theme_block(manager: Arc<ThemeManager>, subject: i64) -> RenderResult {
    let content = match manager.active_theme(subject).await? {
        Some(theme) => format!("{} {}", theme.emoji, escape_html(&theme.display_name)),
        None => "Default".to_string(),
    };
    let buttons = vec![vec![KeyboardButton::callback(
        "🎨 Theme menu",
        format!("themes_menu_{}", subject),
    )]];
    Ok(Some(BlockContent::text(content).with_buttons(buttons)))
}

async fn themes_command(core: Arc<BotCore>, msg: Message, manager: Arc<ThemeManager>) -> HandlerResult {
    let (text, keyboard) = themes_menu(&manager, msg.user_id()).await?;
    core.safe_send_message(msg.chat_id, &text, Some(&keyboard)).await;
    Ok(())
}

async fn themes_menu(manager: &ThemeManager, user_id: i64) -> Result<(String, Keyboard), StorageError> {
    let unlocked = manager.unlocked(user_id).await?;
    let active = manager.active_theme(user_id).await?;
    let back = vec![KeyboardButton::callback(
        "« Back to profile",
        format!("profile_back_self_{}", user_id),
    )];

    if unlocked.is_empty() {
        let text = "🎨 <b>Themes</b>\n\nYou have no unlocked themes yet.".to_string();
        return Ok((text, vec![back]));
    }

    let active_name = active
        .as_ref()
        .map(|t| escape_html(&t.display_name))
        .unwrap_or_else(|| "Default".to_string());
    let text = format!("🎨 <b>Themes</b>\n\nActive: <b>{}</b>\n\nYour themes:", active_name);

    let mut keyboard: Keyboard = unlocked
        .iter()
        .map(|theme| {
            let is_active = active.as_ref().is_some_and(|a| a.id == theme.id);
            let (marker, data) = if is_active {
                ("✅".to_string(), "theme_noop".to_string())
            } else {
                (theme.emoji.clone(), format!("theme_apply_{}", theme.id))
            };
            vec![KeyboardButton::callback(format!("{} {}", marker, theme.display_name), data)]
        })
        .collect();
    keyboard.push(vec![KeyboardButton::callback("🔄 Reset to default", "theme_reset")]);
    keyboard.push(back);
    Ok((text, keyboard))
}

/// `/granttheme <user> <theme_code>`, owners only
async fn grant_command(core: Arc<BotCore>, msg: Message, manager: Arc<ThemeManager>) -> HandlerResult {
    if !core.is_owner(msg.user_id()) {
        return Ok(());
    }
    let Content::Command { args, .. } = &msg.content else {
        return Ok(());
    };
    let [who, code, ..] = args.as_slice() else {
        core.safe_send_message(msg.chat_id, "Usage: <code>/granttheme &lt;user&gt; &lt;theme_code&gt;</code>", None)
            .await;
        return Ok(());
    };

    let outcome = match (core.store().find_user(who).await?, manager.theme_by_code(code).await?) {
        (None, _) => ThemeOutcome::UnknownUser,
        (_, None) => ThemeOutcome::UnknownTheme,
        (Some(user), Some(theme)) => manager.unlock(user.telegram_id, theme.id).await?,
    };
    core.safe_send_message(msg.chat_id, &escape_html(&outcome.message()), None)
        .await;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThemeAction {
    Menu(i64),
    Apply(i64),
    Reset,
    Noop,
}

impl ThemeAction {
    pub fn parse(data: &str) -> Option<Self> {
        if let Some(owner) = data.strip_prefix("themes_menu_") {
            return owner.parse().ok().map(ThemeAction::Menu);
        }
        if let Some(id) = data.strip_prefix("theme_apply_") {
            return id.parse().ok().map(ThemeAction::Apply);
        }
        match data {
            "theme_reset" => Some(ThemeAction::Reset),
            "theme_noop" => Some(ThemeAction::Noop),
            _ => None,
        }
    }
}

async fn theme_callback(core: Arc<BotCore>, msg: Message, manager: Arc<ThemeManager>) -> HandlerResult {
    let Content::Callback { query_id, data } = &msg.content else {
        return Ok(());
    };
    let user_id = msg.user_id();

    let outcome = match ThemeAction::parse(data) {
        None | Some(ThemeAction::Noop) => {
            core.answer_callback(query_id, None).await;
            return Ok(());
        }
        Some(ThemeAction::Menu(owner)) if owner != user_id => {
            core.answer_callback(query_id, Some("This menu belongs to someone else.")).await;
            return Ok(());
        }
        Some(ThemeAction::Menu(_)) => None,
        Some(ThemeAction::Apply(id)) => Some(manager.apply(user_id, Some(id)).await?),
        Some(ThemeAction::Reset) => Some(manager.apply(user_id, None).await?),
    };

    match &outcome {
        Some(outcome) => core.answer_callback(query_id, Some(&outcome.message())).await,
        None => core.answer_callback(query_id, None).await,
    }
    if outcome.as_ref().is_some_and(|o| !o.is_success()) {
        return Ok(());
    }

    let (text, keyboard) = themes_menu(&manager, user_id).await?;
    match msg.message_id {
        Some(message_id) if outcome.is_some() => {
            core.safe_edit_message(msg.chat_id, message_id, &text, Some(&keyboard))
                .await;
        }
        _ => {
            core.safe_send_message(msg.chat_id, &text, Some(&keyboard)).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ThemeStyles;

    fn theme(header: &str, footer: &str, separator: &str) -> ThemeDefinition {
        ThemeDefinition {
            id: 1,
            code_name: "neon".into(),
            display_name: "Neon".into(),
            emoji: "🌈".into(),
            rarity: "rare".into(),
            profile_styles: ThemeStyles {
                header_emoji: header.into(),
                footer_emoji: footer.into(),
                separator: separator.into(),
            },
        }
    }

    #[test]
    fn no_theme_leaves_text_alone() {
        assert_eq!(apply_theme_to_text("a\n\nb", None), "a\n\nb");
    }

    #[test]
    fn theme_wraps_and_separates() {
        let styled = apply_theme_to_text("a\n\nb", Some(&theme("🌟", "✨", "───")));
        assert_eq!(styled, "🌟\na\n───\nb\n✨");
    }

    #[test]
    fn empty_styles_are_skipped() {
        let styled = apply_theme_to_text("a\n\nb", Some(&theme("", "✨", "")));
        assert_eq!(styled, "a\n\nb\n✨");
    }

    #[test]
    fn parses_theme_callbacks() {
        assert_eq!(ThemeAction::parse("themes_menu_4"), Some(ThemeAction::Menu(4)));
        assert_eq!(ThemeAction::parse("theme_apply_2"), Some(ThemeAction::Apply(2)));
        assert_eq!(ThemeAction::parse("theme_reset"), Some(ThemeAction::Reset));
        assert_eq!(ThemeAction::parse("theme_apply_x"), None);
    }
}
