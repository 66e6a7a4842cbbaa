//! Console adapter for development/testing

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::application::errors::BotError;
use crate::application::messaging::MessageParser;
use crate::domain::entities::{Message, User};
use crate::domain::traits::{Bot, BotInfo, Keyboard};

/// Chat id every console conversation runs in
pub const CONSOLE_CHAT: i64 = 1;

/// Console bot adapter for local development.
///
/// Lines starting with `!` simulate a button press with that callback data.
pub struct ConsoleAdapter {
    info: BotInfo,
    parser: MessageParser,
    user: User,
    next_message_id: AtomicI64,
    next_query_id: AtomicI64,
}

impl ConsoleAdapter {
    pub fn new(name: impl Into<String>, prefix: &str, user_id: i64) -> Self {
        Self {
            info: BotInfo {
                id: "console".to_string(),
                name: name.into(),
                username: "console".to_string(),
            },
            parser: MessageParser::new(prefix),
            user: User::new(user_id).with_username("console"),
            next_message_id: AtomicI64::new(1),
            next_query_id: AtomicI64::new(1),
        }
    }

    /// Turn one typed line into a message
    pub fn parse_line(&self, line: &str) -> Option<Message> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if let Some(data) = line.strip_prefix('!') {
            let query = self.next_query_id.fetch_add(1, Ordering::Relaxed);
            return Some(self.parser.parse_callback(
                CONSOLE_CHAT,
                format!("console-{}", query),
                data.trim(),
                self.user.clone(),
            ));
        }
        Some(self.parser.parse(CONSOLE_CHAT, line, Some(self.user.clone())))
    }

    /// Read stdin until EOF, handing every parsed line to `on_message`
    pub async fn read_loop<F, Fut>(&self, mut on_message: F) -> Result<(), BotError>
    where
        F: FnMut(Message) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| BotError::Transport(e.to_string()))?
        {
            if let Some(message) = self.parse_line(&line) {
                on_message(message).await;
            }
        }
        Ok(())
    }

    fn print(&self, header: &str, text: &str, keyboard: Option<&Keyboard>) {
        println!("[{}] {}", header, text);
        for row in keyboard.into_iter().flatten() {
            let row_text: Vec<String> = row
                .iter()
                .map(|b| match &b.callback_data {
                    Some(data) => format!("{} (!{})", b.text, data),
                    None => b.text.clone(),
                })
                .collect();
            println!("  [Buttons] {}", row_text.join(" | "));
        }
    }
}

#[async_trait]
impl Bot for ConsoleAdapter {
    async fn start(&self) -> Result<(), BotError> {
        tracing::info!("Starting console bot (dev mode)");
        Ok(())
    }

    async fn send_message(&self, _chat_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<i64, BotError> {
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        self.print(&format!("BOT #{}", id), text, keyboard);
        Ok(id)
    }

    async fn edit_message(&self, _chat_id: i64, message_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<(), BotError> {
        self.print(&format!("EDIT #{}", message_id), text, keyboard);
        Ok(())
    }

    async fn answer_callback(&self, _callback_id: &str, text: Option<&str>) -> Result<(), BotError> {
        if let Some(text) = text {
            println!("[TOAST] {}", text);
        }
        Ok(())
    }

    fn bot_info(&self) -> BotInfo {
        self.info.clone()
    }
}
