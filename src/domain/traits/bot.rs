use async_trait::async_trait;
use crate::application::errors::BotError;

/// Rows of inline buttons attached to a message
pub type Keyboard = Vec<Vec<KeyboardButton>>;

/// Bot trait - abstraction over the chat transport.
///
/// Texts are HTML-formatted; adapters fall back to plain text when the
/// platform rejects the markup.
#[async_trait]
pub trait Bot: Send + Sync {
    /// Start the bot and begin listening for messages
    async fn start(&self) -> Result<(), BotError>;

    /// Send a message to a chat, returns the new message id
    async fn send_message(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<i64, BotError>;

    /// Replace the text (and keyboard) of a message sent earlier
    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<(), BotError>;

    /// Answer a callback query
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<(), BotError>;

    /// Publish the command list shown by the client
    async fn set_commands(&self, _commands: &[(String, String)]) -> Result<(), BotError> {
        Ok(())
    }

    /// Get bot info
    fn bot_info(&self) -> BotInfo;
}

/// Keyboard button for inline keyboards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyboardButton {
    pub text: String,
    pub callback_data: Option<String>,
    pub url: Option<String>,
}

impl KeyboardButton {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: None,
            url: None,
        }
    }

    pub fn with_callback(mut self, data: impl Into<String>) -> Self {
        self.callback_data = Some(data.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Shorthand for the common text + callback button
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self::new(text).with_callback(data)
    }
}

/// Bot information
#[derive(Debug, Clone)]
pub struct BotInfo {
    pub id: String,
    pub name: String,
    pub username: String,
}
