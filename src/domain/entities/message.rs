use super::User;
use chrono::{DateTime, Utc};

/// Message content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Command { name: String, args: Vec<String> },
    /// Inline button press
    Callback { query_id: String, data: String },
    Empty,
}

impl Content {
    pub fn text(&self) -> Option<&str> {
        match self {
            Content::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_command(&self) -> bool {
        matches!(self, Content::Command { .. })
    }

    pub fn command_name(&self) -> Option<&str> {
        match self {
            Content::Command { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn callback_data(&self) -> Option<&str> {
        match self {
            Content::Callback { data, .. } => Some(data),
            _ => None,
        }
    }
}

/// An incoming update, already normalized by the adapter
#[derive(Debug, Clone)]
pub struct Message {
    pub chat_id: i64,
    /// Id of the message itself, or of the message a pressed button belongs to
    pub message_id: Option<i64>,
    pub sender: Option<User>,
    pub content: Content,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(chat_id: i64, content: Content) -> Self {
        Self {
            chat_id,
            message_id: None,
            sender: None,
            content,
            timestamp: Utc::now(),
        }
    }

    pub fn from_text(chat_id: i64, text: impl Into<String>) -> Self {
        Self::new(chat_id, Content::Text(text.into()))
    }

    pub fn from_command(chat_id: i64, name: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(chat_id, Content::Command { name: name.into(), args })
    }

    pub fn from_callback(chat_id: i64, query_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self::new(
            chat_id,
            Content::Callback {
                query_id: query_id.into(),
                data: data.into(),
            },
        )
    }

    pub fn with_sender(mut self, user: User) -> Self {
        self.sender = Some(user);
        self
    }

    pub fn with_sender_opt(mut self, user: Option<User>) -> Self {
        if let Some(u) = user {
            self.sender = Some(u);
        }
        self
    }

    pub fn with_message_id(mut self, message_id: i64) -> Self {
        self.message_id = Some(message_id);
        self
    }

    /// Sender id, falling back to the chat id for private chats
    pub fn user_id(&self) -> i64 {
        self.sender.as_ref().map(|u| u.id).unwrap_or(self.chat_id)
    }
}
