//! Telegram adapter

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::application::errors::BotError;
use crate::application::messaging::MessageParser;
use crate::domain::entities::{Message as DomainMessage, User as DomainUser};
use crate::domain::traits::{Bot, BotInfo, Keyboard};

/// Telegram API base URL
const API_BASE: &str = "https://api.telegram.org";

/// Telegram update type
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl From<&User> for DomainUser {
    fn from(user: &User) -> Self {
        DomainUser {
            id: user.id,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            is_bot: user.is_bot,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

/// Envelope every Bot API response comes in
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Serialize)]
struct InlineKeyboardButton<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_data: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
}

#[derive(Serialize)]
struct ReplyMarkup<'a> {
    inline_keyboard: Vec<Vec<InlineKeyboardButton<'a>>>,
}

fn reply_markup(keyboard: Option<&Keyboard>) -> Option<ReplyMarkup<'_>> {
    keyboard.map(|rows| ReplyMarkup {
        inline_keyboard: rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|b| InlineKeyboardButton {
                        text: &b.text,
                        callback_data: b.callback_data.as_deref(),
                        url: b.url.as_deref(),
                    })
                    .collect()
            })
            .collect(),
    })
}

/// Strip tags and unescape entities for the plain-text retry
fn strip_html(text: &str) -> String {
    let mut plain = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => plain.push(c),
            _ => {}
        }
    }
    plain
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

fn is_parse_error(e: &BotError) -> bool {
    matches!(e, BotError::Transport(d) if d.contains("can't parse entities"))
}

/// Telegram bot adapter
pub struct TelegramAdapter {
    token: String,
    client: Client,
    info: BotInfo,
    parser: MessageParser,
}

impl TelegramAdapter {
    pub fn new(token: impl Into<String>, prefix: &str) -> Self {
        Self {
            token: token.into(),
            client: Client::new(),
            info: BotInfo {
                id: "unknown".to_string(),
                name: "wiralis-bot".to_string(),
                username: "wiralis_bot".to_string(),
            },
            parser: MessageParser::new(prefix),
        }
    }

    /// Get the API URL for a method
    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.token, method)
    }

    async fn call<B: Serialize, R: DeserializeOwned>(&self, method: &str, body: &B) -> Result<R, BotError> {
        let response = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| BotError::Network(e.to_string()))?;

        let data: ApiResponse<R> = response
            .json()
            .await
            .map_err(|e| BotError::Parse(e.to_string()))?;

        if data.ok {
            return data
                .result
                .ok_or_else(|| BotError::Parse(format!("{}: empty result", method)));
        }
        if let Some(retry) = data.parameters.and_then(|p| p.retry_after) {
            return Err(BotError::RateLimited(retry));
        }
        Err(BotError::Transport(format!(
            "{}: {}",
            method,
            data.description.unwrap_or_else(|| "unknown error".to_string())
        )))
    }

    /// Fetch bot info from Telegram API
    pub async fn fetch_bot_info(&mut self) -> Result<(), BotError> {
        #[derive(Deserialize)]
        struct Me {
            id: i64,
            first_name: String,
            username: String,
        }

        let me: Me = self.call("getMe", &serde_json::json!({})).await?;
        self.parser = self.parser.clone().with_bot_username(me.username.clone());
        self.info = BotInfo {
            id: me.id.to_string(),
            name: me.first_name,
            username: me.username,
        };
        Ok(())
    }

    /// Get updates from Telegram using getUpdates API
    pub async fn get_updates(&self, offset: i64, timeout: u64) -> Result<Vec<Update>, BotError> {
        #[derive(Serialize)]
        struct GetUpdatesRequest<'a> {
            offset: i64,
            timeout: u64,
            allowed_updates: [&'a str; 2],
        }

        let request = GetUpdatesRequest {
            offset,
            timeout,
            allowed_updates: ["message", "callback_query"],
        };
        self.call("getUpdates", &request).await
    }

    /// Get the next update offset
    pub fn next_offset(updates: &[Update], current: i64) -> i64 {
        updates
            .iter()
            .map(|u| u.update_id + 1)
            .max()
            .unwrap_or(current)
    }

    /// Translate an update into the dispatcher's message, `None` for kinds we ignore
    pub fn to_message(&self, update: &Update) -> Option<DomainMessage> {
        if let Some(query) = &update.callback_query {
            let data = query.data.clone()?;
            let chat_id = query.message.as_ref().map(|m| m.chat.id).unwrap_or(query.from.id);
            let mut message = self
                .parser
                .parse_callback(chat_id, query.id.clone(), data, DomainUser::from(&query.from));
            if let Some(origin) = &query.message {
                message = message.with_message_id(origin.message_id);
            }
            return Some(message);
        }

        let msg = update.message.as_ref()?;
        let text = msg.text.clone()?;
        let sender = msg.from.as_ref().map(DomainUser::from);
        Some(
            self.parser
                .parse(msg.chat.id, text, sender)
                .with_message_id(msg.message_id),
        )
    }

    /// Long-poll once; failures back off briefly and return no messages
    pub async fn poll(&self, offset: &mut i64, timeout: u64) -> Vec<DomainMessage> {
        match self.get_updates(*offset, timeout).await {
            Ok(updates) => {
                if !updates.is_empty() {
                    tracing::debug!("Received {} updates", updates.len());
                }
                *offset = Self::next_offset(&updates, *offset);
                updates.iter().filter_map(|u| self.to_message(u)).collect()
            }
            Err(BotError::RateLimited(secs)) => {
                tracing::warn!("Rate limited by Telegram, sleeping {}s", secs);
                tokio::time::sleep(Duration::from_secs(secs)).await;
                Vec::new()
            }
            Err(e) => {
                tracing::error!("getUpdates failed: {}", e);
                tokio::time::sleep(Duration::from_secs(3)).await;
                Vec::new()
            }
        }
    }

    async fn send_formatted(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>, html: bool) -> Result<i64, BotError> {
        #[derive(Serialize)]
        struct SendMessageRequest<'a> {
            chat_id: i64,
            text: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            parse_mode: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            reply_markup: Option<ReplyMarkup<'a>>,
        }

        #[derive(Deserialize)]
        struct Sent {
            message_id: i64,
        }

        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: html.then_some("HTML"),
            reply_markup: reply_markup(keyboard),
        };
        let sent: Sent = self.call("sendMessage", &request).await?;
        Ok(sent.message_id)
    }

    async fn edit_formatted(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
        html: bool,
    ) -> Result<(), BotError> {
        #[derive(Serialize)]
        struct EditMessageRequest<'a> {
            chat_id: i64,
            message_id: i64,
            text: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            parse_mode: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            reply_markup: Option<ReplyMarkup<'a>>,
        }

        let request = EditMessageRequest {
            chat_id,
            message_id,
            text,
            parse_mode: html.then_some("HTML"),
            reply_markup: reply_markup(keyboard),
        };
        // editMessageText returns the message or `true`
        match self.call::<_, serde_json::Value>("editMessageText", &request).await {
            Ok(_) => Ok(()),
            Err(BotError::Transport(d)) if d.contains("message is not modified") => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Bot for TelegramAdapter {
    async fn start(&self) -> Result<(), BotError> {
        tracing::info!("Starting Telegram bot @{}", self.info.username);
        Ok(())
    }

    async fn send_message(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<i64, BotError> {
        tracing::debug!(chat_id, "Sending message");
        match self.send_formatted(chat_id, text, keyboard, true).await {
            Err(e) if is_parse_error(&e) => {
                tracing::warn!("HTML rejected, resending as plain text: {}", e);
                self.send_formatted(chat_id, &strip_html(text), keyboard, false).await
            }
            other => other,
        }
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<(), BotError> {
        match self.edit_formatted(chat_id, message_id, text, keyboard, true).await {
            Err(e) if is_parse_error(&e) => {
                tracing::warn!("HTML rejected, editing as plain text: {}", e);
                self.edit_formatted(chat_id, message_id, &strip_html(text), keyboard, false)
                    .await
            }
            other => other,
        }
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<(), BotError> {
        #[derive(Serialize)]
        struct AnswerRequest<'a> {
            callback_query_id: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            text: Option<&'a str>,
        }

        let request = AnswerRequest {
            callback_query_id: callback_id,
            text,
        };
        let _: bool = self.call("answerCallbackQuery", &request).await?;
        Ok(())
    }

    async fn set_commands(&self, commands: &[(String, String)]) -> Result<(), BotError> {
        #[derive(Serialize)]
        struct Command<'a> {
            command: &'a str,
            description: &'a str,
        }

        #[derive(Serialize)]
        struct SetMyCommandsRequest<'a> {
            commands: Vec<Command<'a>>,
        }

        let request = SetMyCommandsRequest {
            commands: commands
                .iter()
                .map(|(command, description)| Command { command, description })
                .collect(),
        };
        let _: bool = self.call("setMyCommands", &request).await?;
        tracing::info!("Registered {} bot commands with Telegram", commands.len());
        Ok(())
    }

    fn bot_info(&self) -> BotInfo {
        self.info.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Content;

    fn adapter() -> TelegramAdapter {
        TelegramAdapter::new("123:abc", "/")
    }

    #[test]
    fn strips_markup_for_plain_retry() {
        assert_eq!(strip_html("<b>Hi</b> &lt;you&gt; &amp; me"), "Hi <you> & me");
    }

    #[test]
    fn callback_update_becomes_callback_message() {
        let update: Update = serde_json::from_value(serde_json::json!({
            "update_id": 10,
            "callback_query": {
                "id": "q1",
                "from": {"id": 5, "first_name": "Neo"},
                "message": {"message_id": 77, "chat": {"id": -100}},
                "data": "core_stats"
            }
        }))
        .unwrap();

        let message = adapter().to_message(&update).unwrap();
        assert_eq!(message.chat_id, -100);
        assert_eq!(message.message_id, Some(77));
        assert_eq!(message.user_id(), 5);
        assert!(matches!(message.content, Content::Callback { ref data, .. } if data == "core_stats"));
    }

    #[test]
    fn text_update_is_parsed_as_command() {
        let update: Update = serde_json::from_value(serde_json::json!({
            "update_id": 11,
            "message": {
                "message_id": 3,
                "from": {"id": 8, "first_name": "Trinity"},
                "chat": {"id": 8},
                "text": "/profile @neo"
            }
        }))
        .unwrap();

        let message = adapter().to_message(&update).unwrap();
        assert_eq!(message.content.command_name(), Some("profile"));
        assert_eq!(TelegramAdapter::next_offset(&[update], 0), 12);
    }

    #[test]
    fn non_text_messages_are_ignored() {
        let update: Update = serde_json::from_value(serde_json::json!({
            "update_id": 12,
            "message": {"message_id": 4, "chat": {"id": 1}}
        }))
        .unwrap();
        assert!(adapter().to_message(&update).is_none());
    }
}
