//! Profile feature - `/profile`, quotes, hype/antihype voting and trends.
//!
//! Owns the [`ProfileBlockManager`] every other feature publishes its
//! profile blocks into; it is bound as `profile_manager`.

pub mod blocks;

pub use blocks::{
    AggregatedProfile, BlockContent, BlockInfo, ProfileBlockManager, RenderFn, RenderResult, RenderedBlock,
    ALWAYS_EXCLUDED,
};

use async_trait::async_trait;
use regex_lite::Regex;
use std::sync::Arc;

use crate::application::errors::{BotError, ModuleError};
use crate::application::format::escape_html;
use crate::application::messaging::{Handler, HandlerResult, Trigger};
use crate::domain::entities::{Content, Message, RatingCategory, UserProfile};
use crate::domain::traits::{Keyboard, KeyboardButton, Store};
use crate::kernel::{BotCore, Module, ModuleSetup, SharedResource};
use crate::modules::badges::BadgeManager;
use crate::modules::themes::ThemeManager;

pub const RESOURCE_NAME: &str = "profile_manager";

const TRENDS_LIMIT: usize = 10;
const QUOTE_MAX_CHARS: usize = 150;

pub struct ProfileModule {
    store: Arc<dyn Store>,
    blocks: Arc<ProfileBlockManager>,
}

impl ProfileModule {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            blocks: Arc::new(ProfileBlockManager::new()),
        }
    }

    fn register_blocks(&self) {
        let store = self.store.clone();
        self.blocks.register_block("profile_quote", "💬 Quote", 90, move |subject| {
            let store = store.clone();
            async move { quote_block(store.as_ref(), subject).await }
        });

        let store = self.store.clone();
        self.blocks.register_block("profile_rating", "📈 Rating", 80, move |subject| {
            let store = store.clone();
            async move { rating_block(store.as_ref(), subject).await }
        });
    }
}

#[async_trait]
impl Module for ProfileModule {
    async fn setup(&self, _core: &Arc<BotCore>) -> Result<ModuleSetup, ModuleError> {
        self.register_blocks();

        let blocks = self.blocks.clone();
        let profile = Handler::command("profile", move |core, msg| {
            let blocks = blocks.clone();
            async move { profile_command(core, msg, blocks).await }
        });

        let blocks = self.blocks.clone();
        let callbacks = Handler::callback("profile_", move |core, msg| {
            let blocks = blocks.clone();
            async move { profile_callback(core, msg, blocks).await }
        });

        Ok(ModuleSetup::new()
            .handler(Handler::new(Trigger::Any, track_user).with_group(-1))
            .handler(profile)
            .handler(Handler::command("quote", quote_command))
            .handler(Handler::command("trends", |core, msg| trends_command(core, msg, false)))
            .handler(Handler::command("antitrends", |core, msg| trends_command(core, msg, true)))
            .handler(callbacks)
            .command("profile")
            .command("quote")
            .command("trends")
            .command("antitrends"))
    }

    async fn cleanup(&self, _core: &BotCore) -> Result<(), ModuleError> {
        let removed = self.blocks.clear();
        tracing::info!(removed, "Profile blocks cleared");
        Ok(())
    }

    fn resources(&self) -> Vec<SharedResource> {
        vec![SharedResource::new(RESOURCE_NAME, self.blocks.clone())]
    }

    fn exports(&self) -> Vec<&'static str> {
        vec!["setup", "cleanup", "render_profile", "register_block", "unregister_block"]
    }
}

async fn quote_block(store: &dyn Store, subject: i64) -> RenderResult {
    let Some(user) = store.get_user(subject).await? else {
        return Ok(None);
    };
    let content = match &user.quote {
        Some(quote) => format!(
            "{} says:\n«<i>{}</i>»",
            escape_html(&user.nickname),
            escape_html(quote)
        ),
        None => "No quote set.".to_string(),
    };
    let buttons = vec![vec![KeyboardButton::callback(
        "✏️ Edit quote",
        format!("profile_edit_quote_{}", subject),
    )]];
    Ok(Some(BlockContent::text(content).with_buttons(buttons)))
}

async fn rating_block(store: &dyn Store, subject: i64) -> RenderResult {
    let rating = store.rating(subject).await?;
    let content = match rating.category() {
        RatingCategory::Neutral => "Neutral (0)".to_string(),
        category => {
            let name = if category == RatingCategory::Hype {
                "🏆 Hype"
            } else {
                "📉 Antihype"
            };
            let rank = rating
                .rank
                .map(|r| format!("#{}", r))
                .unwrap_or_else(|| "unranked".to_string());
            format!("{}: {} ({})", name, rating.score, rank)
        }
    };
    Ok(Some(BlockContent::text(content)))
}

/// Keep the sender's profile row current
async fn track_user(core: Arc<BotCore>, msg: Message) -> HandlerResult {
    let Some(sender) = &msg.sender else {
        return Ok(());
    };
    if sender.is_bot {
        return Ok(());
    }
    core.store()
        .upsert_user(sender.id, &sender.display_name(), sender.username.as_deref())
        .await?;
    Ok(())
}

/// Full profile text and keyboard of `subject` as seen by `viewer_id`
pub async fn render_profile(
    core: &BotCore,
    blocks: &ProfileBlockManager,
    viewer_id: i64,
    subject: &UserProfile,
) -> (String, Keyboard) {
    let restricted = viewer_id != subject.telegram_id;
    let profile = blocks
        .aggregate(core.store().as_ref(), subject.telegram_id, restricted)
        .await;

    let badge = match core.resource::<BadgeManager>(crate::modules::badges::RESOURCE_NAME) {
        Some(badges) => badges.active_emoji(subject.telegram_id).await,
        None => None,
    };
    let mut header = String::new();
    if let Some(emoji) = badge {
        header.push_str(&emoji);
        header.push(' ');
    }
    header.push_str(&format!(
        "<b>{}</b>",
        escape_html(&subject.nickname)
    ));
    if let Some(username) = &subject.username {
        header.push_str(&format!(" (@{})", escape_html(username)));
    }
    header.push_str(&format!("\n<i>{}</i>", escape_html(&subject.role)));

    let mut text = format!("{}\n\n{}", header, profile.to_html());
    if let Some(themes) = core.resource::<ThemeManager>(crate::modules::themes::RESOURCE_NAME) {
        text = themes.style_profile(subject.telegram_id, &text).await;
    }

    let keyboard = if restricted {
        vec![vec![
            KeyboardButton::callback("🏆 Hype", format!("profile_vote_up_{}", subject.telegram_id)),
            KeyboardButton::callback("📉 Antihype", format!("profile_vote_down_{}", subject.telegram_id)),
        ]]
    } else {
        profile.buttons
    };
    (text, keyboard)
}

async fn profile_command(core: Arc<BotCore>, msg: Message, blocks: Arc<ProfileBlockManager>) -> HandlerResult {
    let viewer = msg.user_id();
    let target = match &msg.content {
        Content::Command { args, .. } if !args.is_empty() => core.store().find_user(&args[0]).await?,
        _ => core.store().get_user(viewer).await?,
    };

    let Some(subject) = target else {
        core.safe_send_message(msg.chat_id, "🤷 Profile not found.", None).await;
        return Ok(());
    };

    let (text, keyboard) = render_profile(&core, &blocks, viewer, &subject).await;
    let keyboard = (!keyboard.is_empty()).then_some(keyboard);
    core.safe_send_message(msg.chat_id, &text, keyboard.as_ref()).await;
    Ok(())
}

async fn quote_command(core: Arc<BotCore>, msg: Message) -> HandlerResult {
    let Content::Command { args, .. } = &msg.content else {
        return Ok(());
    };
    let quote = args.join(" ");
    let user_id = msg.user_id();

    let reply = if quote.is_empty() {
        core.store().set_quote(user_id, None).await?;
        "🗑 Quote removed.".to_string()
    } else if quote.chars().count() > QUOTE_MAX_CHARS {
        format!("❌ A quote can be at most {} characters.", QUOTE_MAX_CHARS)
    } else if core.store().set_quote(user_id, Some(&quote)).await? {
        "✅ Quote updated.".to_string()
    } else {
        "❌ Send any message first so your profile exists.".to_string()
    };
    core.safe_send_message(msg.chat_id, &reply, None).await;
    Ok(())
}

async fn trends_command(core: Arc<BotCore>, msg: Message, antihype: bool) -> HandlerResult {
    let entries = core.store().trends(TRENDS_LIMIT, antihype).await?;
    let title = if antihype {
        "📉 <b>Antitrends</b>"
    } else {
        "🏆 <b>Trends</b>"
    };

    let mut text = format!("{}\n\n", title);
    if entries.is_empty() {
        text.push_str("<i>Nobody here yet.</i>");
    }
    for (i, entry) in entries.iter().enumerate() {
        text.push_str(&format!(
            "{}. {} ({:+})\n",
            i + 1,
            escape_html(&entry.nickname),
            entry.score
        ));
    }
    core.safe_send_message(msg.chat_id, &text, None).await;
    Ok(())
}

/// Callback actions under the `profile_` prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileAction {
    Vote { target: i64, up: bool },
    EditQuote(i64),
    BackToSelf(i64),
}

impl ProfileAction {
    pub fn parse(data: &str) -> Option<Self> {
        let vote = Regex::new(r"^profile_vote_(up|down)_(\d+)$").ok()?;
        if let Some(caps) = vote.captures(data) {
            let target = caps.get(2)?.as_str().parse().ok()?;
            return Some(ProfileAction::Vote {
                target,
                up: caps.get(1)?.as_str() == "up",
            });
        }
        if let Some(id) = data.strip_prefix("profile_edit_quote_") {
            return id.parse().ok().map(ProfileAction::EditQuote);
        }
        if let Some(id) = data.strip_prefix("profile_back_self_") {
            return id.parse().ok().map(ProfileAction::BackToSelf);
        }
        None
    }
}

async fn profile_callback(core: Arc<BotCore>, msg: Message, blocks: Arc<ProfileBlockManager>) -> HandlerResult {
    let Content::Callback { query_id, data } = &msg.content else {
        return Ok(());
    };
    let viewer = msg.user_id();

    let Some(action) = ProfileAction::parse(data) else {
        core.answer_callback(query_id, None).await;
        return Ok(());
    };

    match action {
        ProfileAction::Vote { target, up } => {
            if target == viewer {
                core.answer_callback(query_id, Some("You can't vote for yourself.")).await;
                return Ok(());
            }
            let Some(subject) = core.store().get_user(target).await? else {
                core.answer_callback(query_id, Some("Profile not found.")).await;
                return Ok(());
            };
            core.store()
                .upsert_vote(viewer, target, if up { 1 } else { -1 })
                .await?;
            core.answer_callback(query_id, Some(if up { "🏆 Hype counted" } else { "📉 Antihype counted" }))
                .await;

            if let Some(message_id) = msg.message_id {
                let (text, keyboard) = render_profile(&core, &blocks, viewer, &subject).await;
                core.safe_edit_message(msg.chat_id, message_id, &text, Some(&keyboard))
                    .await;
            }
        }
        ProfileAction::EditQuote(owner) => {
            if owner != viewer {
                core.answer_callback(query_id, Some("This button is not for you.")).await;
                return Ok(());
            }
            core.answer_callback(query_id, None).await;
            let text = format!(
                "✏️ Send <code>/quote your text</code> to set a new quote (up to {} characters), or <code>/quote</code> to remove it.",
                QUOTE_MAX_CHARS
            );
            core.safe_send_message(msg.chat_id, &text, None).await;
        }
        ProfileAction::BackToSelf(owner) => {
            if owner != viewer {
                core.answer_callback(query_id, Some("This button is not for you.")).await;
                return Ok(());
            }
            core.answer_callback(query_id, None).await;
            let Some(subject) = core.store().get_user(viewer).await? else {
                return Err(BotError::NotFound(format!("profile {}", viewer)));
            };
            let (text, keyboard) = render_profile(&core, &blocks, viewer, &subject).await;
            match msg.message_id {
                Some(message_id) => {
                    core.safe_edit_message(msg.chat_id, message_id, &text, Some(&keyboard))
                        .await;
                }
                None => {
                    core.safe_send_message(msg.chat_id, &text, Some(&keyboard)).await;
                }
            }
        }
    }
    Ok(())
}
