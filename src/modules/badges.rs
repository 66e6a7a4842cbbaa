//! Badges - collectible achievements shown next to a profile name

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::errors::{ModuleError, StorageError};
use crate::application::format::escape_html;
use crate::application::messaging::{Handler, HandlerResult};
use crate::domain::entities::{BadgeDefinition, Content, Message};
use crate::domain::traits::{Keyboard, KeyboardButton, Store};
use crate::kernel::{BotCore, Module, ModuleSetup, SharedResource};
use crate::modules::profile::{self, BlockContent, ProfileBlockManager, RenderResult};

pub const RESOURCE_NAME: &str = "badge_manager";
pub const BLOCK_ID: &str = "profile_badges";

/// Result of handing a badge to a user
#[derive(Debug, Clone, PartialEq)]
pub enum AwardOutcome {
    Awarded(BadgeDefinition),
    AlreadyOwned(BadgeDefinition),
    UnknownBadge,
    UnknownUser,
}

impl AwardOutcome {
    pub fn message(&self) -> String {
        match self {
            AwardOutcome::Awarded(b) => format!("{} Badge «{}» awarded!", b.emoji, escape_html(&b.display_name)),
            AwardOutcome::AlreadyOwned(b) => format!("User already has «{}».", escape_html(&b.display_name)),
            AwardOutcome::UnknownBadge => "❌ No such badge.".to_string(),
            AwardOutcome::UnknownUser => "❌ No such user.".to_string(),
        }
    }
}

/// Badge operations other features reach through `badge_manager`
pub struct BadgeManager {
    store: Arc<dyn Store>,
}

impl BadgeManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn award(&self, user_id: i64, code_name: &str, context: Option<&str>) -> Result<AwardOutcome, StorageError> {
        let Some(badge) = self.store.badge_by_code(code_name).await? else {
            return Ok(AwardOutcome::UnknownBadge);
        };
        if self.store.get_user(user_id).await?.is_none() {
            return Ok(AwardOutcome::UnknownUser);
        }

        if self.store.grant_badge(user_id, badge.id, context).await? {
            info!(user_id, badge = %badge.code_name, "Badge awarded");
            Ok(AwardOutcome::Awarded(badge))
        } else {
            Ok(AwardOutcome::AlreadyOwned(badge))
        }
    }

    pub async fn has(&self, user_id: i64, code_name: &str) -> Result<bool, StorageError> {
        let owned = self.store.user_badges(user_id).await?;
        Ok(owned.iter().any(|b| b.code_name == code_name))
    }

    pub async fn list(&self, user_id: i64) -> Result<Vec<BadgeDefinition>, StorageError> {
        self.store.user_badges(user_id).await
    }

    /// Select the badge shown next to the name; `None` clears it.
    /// False when the user does not own the badge.
    pub async fn set_active(&self, user_id: i64, badge_id: Option<i64>) -> Result<bool, StorageError> {
        if let Some(id) = badge_id {
            let owned = self.store.user_badges(user_id).await?;
            if !owned.iter().any(|b| b.id == id) {
                return Ok(false);
            }
        }
        self.store.set_active_badge(user_id, badge_id).await
    }

    pub async fn active(&self, user_id: i64) -> Result<Option<BadgeDefinition>, StorageError> {
        let Some(user) = self.store.get_user(user_id).await? else {
            return Ok(None);
        };
        match user.active_badge_id {
            Some(id) => self.store.badge_by_id(id).await,
            None => Ok(None),
        }
    }

    /// Emoji of the active badge, lookup failures read as no badge
    pub async fn active_emoji(&self, user_id: i64) -> Option<String> {
        match self.active(user_id).await {
            Ok(badge) => badge.map(|b| b.emoji),
            Err(e) => {
                warn!(user_id, "Active badge lookup failed: {}", e);
                None
            }
        }
    }
}

pub struct BadgesModule {
    manager: Arc<BadgeManager>,
}

impl BadgesModule {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            manager: Arc::new(BadgeManager::new(store)),
        }
    }
}

#[async_trait]
impl Module for BadgesModule {
    async fn setup(&self, core: &Arc<BotCore>) -> Result<ModuleSetup, ModuleError> {
        if let Some(blocks) = core.resource::<ProfileBlockManager>(profile::RESOURCE_NAME) {
            let manager = self.manager.clone();
            blocks.register_block(BLOCK_ID, "🎖 Badges", 70, move |subject| badges_block(manager.clone(), subject));
        } else {
            warn!("profile_manager not bound, badges block not registered");
        }

        let manager = self.manager.clone();
        let badges = Handler::command("badges", move |core, msg| {
            let manager = manager.clone();
            async move { badges_command(core, msg, manager).await }
        });

        let manager = self.manager.clone();
        let award = Handler::command("award", move |core, msg| {
            let manager = manager.clone();
            async move { award_command(core, msg, manager).await }
        });

        let manager = self.manager.clone();
        let callbacks = Handler::callback("badge_", move |core, msg| {
            let manager = manager.clone();
            async move { badge_callback(core, msg, manager).await }
        });

        Ok(ModuleSetup::new()
            .handler(badges)
            .handler(award)
            .handler(callbacks)
            .command("badges"))
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
        vec!["setup", "cleanup", "award_badge"]
    }
}

async fn badges_block(manager: Arc<BadgeManager>, subject: i64) -> RenderResult {
    let owned = manager.list(subject).await?;
    if owned.is_empty() {
        return Ok(None);
    }
    let lines = owned
        .iter()
        .map(|b| format!("{} {}", b.emoji, escape_html(&b.display_name)))
        .collect::<Vec<_>>()
        .join("\n");
    let buttons = vec![vec![KeyboardButton::callback(
        "🎖 Choose badge",
        format!("badge_menu_{}", subject),
    )]];
    Ok(Some(BlockContent::text(lines).with_buttons(buttons)))
}

fn badge_keyboard(user_id: i64, owned: &[BadgeDefinition]) -> Keyboard {
    let mut rows: Keyboard = owned
        .iter()
        .map(|b| {
            vec![KeyboardButton::callback(
                format!("{} {}", b.emoji, b.display_name),
                format!("badge_set_{}_{}", b.id, user_id),
            )]
        })
        .collect();
    rows.push(vec![KeyboardButton::callback(
        "🚫 Hide badge",
        format!("badge_set_remove_{}", user_id),
    )]);
    rows
}

async fn badge_menu(manager: &BadgeManager, user_id: i64) -> Result<(String, Option<Keyboard>), StorageError> {
    let owned = manager.list(user_id).await?;
    if owned.is_empty() {
        return Ok(("🎖 You have no badges yet.".to_string(), None));
    }
    let active = manager.active(user_id).await?.map(|b| b.id);

    let mut text = "🎖 <b>Your badges</b>\n\n".to_string();
    for badge in &owned {
        let marker = if Some(badge.id) == active { " ✅" } else { "" };
        text.push_str(&format!(
            "{} {} <i>({})</i>{}\n",
            badge.emoji,
            escape_html(&badge.display_name),
            escape_html(&badge.rarity),
            marker
        ));
    }
    text.push_str("\nPick the badge shown next to your name:");
    Ok((text, Some(badge_keyboard(user_id, &owned))))
}

async fn badges_command(core: Arc<BotCore>, msg: Message, manager: Arc<BadgeManager>) -> HandlerResult {
    let (text, keyboard) = badge_menu(&manager, msg.user_id()).await?;
    core.safe_send_message(msg.chat_id, &text, keyboard.as_ref()).await;
    Ok(())
}

/// `/award <user> <badge_code>`, owners only
async fn award_command(core: Arc<BotCore>, msg: Message, manager: Arc<BadgeManager>) -> HandlerResult {
    if !core.is_owner(msg.user_id()) {
        return Ok(());
    }
    let Content::Command { args, .. } = &msg.content else {
        return Ok(());
    };
    let [who, code, ..] = args.as_slice() else {
        core.safe_send_message(msg.chat_id, "Usage: <code>/award &lt;user&gt; &lt;badge_code&gt;</code>", None)
            .await;
        return Ok(());
    };

    let reply = match core.store().find_user(who).await? {
        Some(user) => manager
            .award(user.telegram_id, code, Some("awarded by owner"))
            .await?
            .message(),
        None => AwardOutcome::UnknownUser.message(),
    };
    core.safe_send_message(msg.chat_id, &reply, None).await;
    Ok(())
}

/// `badge_menu_<uid>` or `badge_set_<badge_id|remove>_<uid>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeAction {
    Menu(i64),
    Set { badge_id: Option<i64>, owner: i64 },
}

impl BadgeAction {
    pub fn parse(data: &str) -> Option<Self> {
        if let Some(owner) = data.strip_prefix("badge_menu_") {
            return owner.parse().ok().map(BadgeAction::Menu);
        }
        let rest = data.strip_prefix("badge_set_")?;
        let (badge, owner) = rest.rsplit_once('_')?;
        let owner = owner.parse().ok()?;
        let badge_id = match badge {
            "remove" => None,
            id => Some(id.parse().ok()?),
        };
        Some(BadgeAction::Set { badge_id, owner })
    }

    fn owner(&self) -> i64 {
        match self {
            BadgeAction::Menu(owner) | BadgeAction::Set { owner, .. } => *owner,
        }
    }
}

async fn badge_callback(core: Arc<BotCore>, msg: Message, manager: Arc<BadgeManager>) -> HandlerResult {
    let Content::Callback { query_id, data } = &msg.content else {
        return Ok(());
    };
    let Some(action) = BadgeAction::parse(data) else {
        core.answer_callback(query_id, None).await;
        return Ok(());
    };
    if action.owner() != msg.user_id() {
        core.answer_callback(query_id, Some("These are not your badges.")).await;
        return Ok(());
    }

    if let BadgeAction::Set { badge_id, owner } = action {
        let note = if manager.set_active(owner, badge_id).await? {
            if badge_id.is_some() { "✅ Badge selected" } else { "Badge hidden" }
        } else {
            "You don't own this badge."
        };
        core.answer_callback(query_id, Some(note)).await;
    } else {
        core.answer_callback(query_id, None).await;
    }

    let (text, keyboard) = badge_menu(&manager, action.owner()).await?;
    match msg.message_id {
        Some(message_id) if matches!(action, BadgeAction::Set { .. }) => {
            core.safe_edit_message(msg.chat_id, message_id, &text, keyboard.as_ref())
                .await;
        }
        _ => {
            core.safe_send_message(msg.chat_id, &text, keyboard.as_ref()).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_badge_callbacks() {
        assert_eq!(BadgeAction::parse("badge_menu_9"), Some(BadgeAction::Menu(9)));
        assert_eq!(
            BadgeAction::parse("badge_set_3_9"),
            Some(BadgeAction::Set { badge_id: Some(3), owner: 9 })
        );
        assert_eq!(
            BadgeAction::parse("badge_set_remove_9"),
            Some(BadgeAction::Set { badge_id: None, owner: 9 })
        );
        assert_eq!(BadgeAction::parse("badge_set_x_9"), None);
        assert_eq!(BadgeAction::parse("badge_unknown"), None);
    }

    #[test]
    fn keyboard_ends_with_hide_button() {
        let owned = vec![BadgeDefinition {
            id: 1,
            code_name: "pioneer".into(),
            display_name: "Pioneer".into(),
            emoji: "🚀".into(),
            rarity: "rare".into(),
        }];
        let keyboard = badge_keyboard(5, &owned);
        assert_eq!(keyboard.len(), 2);
        assert_eq!(keyboard[0][0].callback_data.as_deref(), Some("badge_set_1_5"));
        assert_eq!(keyboard[1][0].callback_data.as_deref(), Some("badge_set_remove_5"));
    }
}
