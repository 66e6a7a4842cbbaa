//! Message parser - Turns raw text and button presses into structured messages

use crate::domain::entities::{Content, Message, User};

/// Parses incoming messages into structured Message objects
#[derive(Debug, Clone)]
pub struct MessageParser {
    command_prefix: String,
    bot_username: Option<String>,
}

impl MessageParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: prefix.into(),
            bot_username: None,
        }
    }

    /// Commands addressed as `/cmd@<username>` are accepted for this bot only
    pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
        self.bot_username = Some(username.into());
        self
    }

    /// Parse a text message
    pub fn parse(&self, chat_id: i64, text: impl Into<String>, sender: Option<User>) -> Message {
        let text = text.into();

        if text.starts_with(&self.command_prefix) {
            if let Some(content) = self.parse_command(&text) {
                return Message::new(chat_id, content).with_sender_opt(sender);
            }
        }

        Message::new(chat_id, Content::Text(text)).with_sender_opt(sender)
    }

    /// Parse a command message, `None` when it targets another bot
    fn parse_command(&self, text: &str) -> Option<Content> {
        let cmd_text = text.trim_start_matches(self.command_prefix.as_str());

        let mut parts = cmd_text.split_whitespace();
        let head = parts.next().unwrap_or("");
        let args = parts.map(|s| s.to_string()).collect();

        let name = match head.split_once('@') {
            Some((name, target)) => {
                let addressed_here = self
                    .bot_username
                    .as_deref()
                    .map(|own| own.eq_ignore_ascii_case(target))
                    .unwrap_or(true);
                if !addressed_here {
                    return None;
                }
                name
            }
            None => head,
        };

        Some(Content::Command {
            name: name.to_lowercase(),
            args,
        })
    }

    /// Parse a callback query (inline button press)
    pub fn parse_callback(&self, chat_id: i64, query_id: impl Into<String>, data: impl Into<String>, user: User) -> Message {
        Message::from_callback(chat_id, query_id, data).with_sender(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_with_args() {
        let parser = MessageParser::new("/");
        let msg = parser.parse(1, "/profile @neo", None);
        assert_eq!(
            msg.content,
            Content::Command {
                name: "profile".to_string(),
                args: vec!["@neo".to_string()]
            }
        );
    }

    #[test]
    fn respects_addressed_username() {
        let parser = MessageParser::new("/").with_bot_username("wiralis_bot");
        assert_eq!(parser.parse(1, "/core@Wiralis_Bot", None).content.command_name(), Some("core"));
        assert!(matches!(parser.parse(1, "/core@other_bot", None).content, Content::Text(_)));
    }

    #[test]
    fn plain_text_stays_text() {
        let parser = MessageParser::new("/");
        assert_eq!(parser.parse(1, "hello", None).content.text(), Some("hello"));
    }
}
