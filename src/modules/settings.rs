//! Privacy settings - which profile blocks other users may see

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::warn;

use crate::application::errors::ModuleError;
use crate::application::messaging::{Handler, HandlerResult};
use crate::domain::entities::{Content, Message};
use crate::domain::traits::{Keyboard, KeyboardButton, Store};
use crate::kernel::{BotCore, Module, ModuleSetup};
use crate::modules::profile::{self, BlockContent, BlockInfo, ProfileBlockManager, RenderResult, ALWAYS_EXCLUDED};

pub const BLOCK_ID: &str = "settings_profile_block";

/// Blocks whose visibility the subject can toggle
pub fn toggleable(blocks: &[BlockInfo]) -> Vec<&BlockInfo> {
    blocks
        .iter()
        .filter(|b| !ALWAYS_EXCLUDED.contains(&b.id.as_str()))
        .collect()
}

fn settings_view(blocks: &[BlockInfo], visibility: &HashMap<String, bool>) -> (String, Keyboard) {
    let toggles = toggleable(blocks);
    if toggles.is_empty() {
        return ("⚙️ <b>Settings</b>\n\nNothing to configure yet.".to_string(), Vec::new());
    }

    let keyboard = toggles
        .iter()
        .map(|b| {
            let visible = visibility.get(&b.id).copied().unwrap_or(true);
            let marker = if visible { "👁" } else { "🙈" };
            vec![KeyboardButton::callback(
                format!("{} {}", marker, b.title),
                format!("settings_toggle_{}", b.id),
            )]
        })
        .collect();
    let text = "⚙️ <b>Settings</b>\n\nChoose which blocks other users see on your profile:".to_string();
    (text, keyboard)
}

pub struct SettingsModule {
    store: Arc<dyn Store>,
}

impl SettingsModule {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Module for SettingsModule {
    async fn setup(&self, core: &Arc<BotCore>) -> Result<ModuleSetup, ModuleError> {
        let blocks = core.require_resource::<ProfileBlockManager>(profile::RESOURCE_NAME)?;

        let store = self.store.clone();
        let registry = Arc::downgrade(&blocks);
        blocks.register_block(BLOCK_ID, "⚙️ Settings", 10, move |subject| {
            settings_block(store.clone(), registry.clone(), subject)
        });

        let registry = blocks.clone();
        let command = Handler::command("settings", move |core, msg| settings_command(core, msg, registry.clone()));

        let registry = blocks.clone();
        let callbacks = Handler::callback("settings_", move |core, msg| {
            let registry = registry.clone();
            async move { settings_callback(core, msg, registry).await }
        });

        Ok(ModuleSetup::new()
            .handler(command)
            .handler(callbacks)
            .command("settings"))
    }

    async fn cleanup(&self, core: &BotCore) -> Result<(), ModuleError> {
        match core.resource::<ProfileBlockManager>(profile::RESOURCE_NAME) {
            Some(blocks) => {
                blocks.unregister_block(BLOCK_ID);
            }
            None => warn!("profile_manager gone before settings cleanup"),
        }
        Ok(())
    }

    fn exports(&self) -> Vec<&'static str> {
        vec!["setup", "cleanup"]
    }
}

async fn settings_block(store: Arc<dyn Store>, registry: Weak<ProfileBlockManager>, subject: i64) -> RenderResult {
    let Some(registry) = registry.upgrade() else {
        return Ok(None);
    };
    let visibility = store.profile_visibility(subject).await?;
    let infos = registry.blocks();
    let toggles = toggleable(&infos);
    let visible = toggles
        .iter()
        .filter(|b| visibility.get(&b.id).copied().unwrap_or(true))
        .count();
    let content = format!("Visible to others: {} of {} blocks", visible, toggles.len());
    let buttons = vec![vec![KeyboardButton::callback("⚙️ Privacy", "settings_open")]];
    Ok(Some(BlockContent::text(content).with_buttons(buttons)))
}

async fn settings_command(core: Arc<BotCore>, msg: Message, registry: Arc<ProfileBlockManager>) -> HandlerResult {
    let visibility = core.store().profile_visibility(msg.user_id()).await?;
    let (text, keyboard) = settings_view(&registry.blocks(), &visibility);
    let keyboard = (!keyboard.is_empty()).then_some(keyboard);
    core.safe_send_message(msg.chat_id, &text, keyboard.as_ref()).await;
    Ok(())
}

async fn settings_callback(core: Arc<BotCore>, msg: Message, registry: Arc<ProfileBlockManager>) -> HandlerResult {
    let Content::Callback { query_id, data } = &msg.content else {
        return Ok(());
    };
    let user_id = msg.user_id();
    let infos = registry.blocks();

    let note = match data.strip_prefix("settings_toggle_") {
        Some(block_id) => {
            if !toggleable(&infos).iter().any(|b| b.id == block_id) {
                core.answer_callback(query_id, Some("This block can't be toggled.")).await;
                return Ok(());
            }
            let current = core.store().profile_visibility(user_id).await?;
            let visible = !current.get(block_id).copied().unwrap_or(true);
            core.store().set_block_visibility(user_id, block_id, visible).await?;
            Some(if visible { "👁 Shown to others" } else { "🙈 Hidden from others" })
        }
        None => None,
    };
    core.answer_callback(query_id, note).await;

    let visibility = core.store().profile_visibility(user_id).await?;
    let (text, keyboard) = settings_view(&infos, &visibility);
    match (note, msg.message_id) {
        (Some(_), Some(message_id)) => {
            core.safe_edit_message(msg.chat_id, message_id, &text, Some(&keyboard))
                .await;
        }
        _ => {
            let keyboard = (!keyboard.is_empty()).then_some(keyboard);
            core.safe_send_message(msg.chat_id, &text, keyboard.as_ref()).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str) -> BlockInfo {
        BlockInfo {
            id: id.to_string(),
            title: id.to_uppercase(),
            priority: 0,
        }
    }

    #[test]
    fn excluded_blocks_are_not_toggleable() {
        let blocks = vec![info("profile_quote"), info(BLOCK_ID), info("registration_profile_info")];
        let ids: Vec<_> = toggleable(&blocks).into_iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["profile_quote"]);
    }

    #[test]
    fn view_marks_hidden_blocks() {
        let blocks = vec![info("profile_quote"), info("profile_rating")];
        let visibility = HashMap::from([("profile_rating".to_string(), false)]);
        let (_, keyboard) = settings_view(&blocks, &visibility);
        assert_eq!(keyboard.len(), 2);
        assert!(keyboard[0][0].text.starts_with("👁"));
        assert!(keyboard[1][0].text.starts_with("🙈"));
        assert_eq!(keyboard[1][0].callback_data.as_deref(), Some("settings_toggle_profile_rating"));
    }
}
