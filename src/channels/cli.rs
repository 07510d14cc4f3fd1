//! `CliChannel` — reads lines from stdin, writes replies to stdout.
//!
//! A minimal, always-available channel used for local interactive use and
//! as the reference implementation for the [`Channel`] contract. Every line
//! is treated as a message from a single fixed chat (`"local"`) and sender
//! (`"owner"`).

use std::io::Write as _;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::model::{IncomingMessage, OutgoingMessage};

use super::traits::Channel;

pub const CHAT_ID: &str = "local";
pub const SENDER_ID: &str = "owner";

pub struct CliChannel;

impl CliChannel {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn listen(&self, tx: mpsc::Sender<IncomingMessage>) -> Result<(), String> {
        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();
        let mut seq: u64 = 0;
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            seq += 1;
            let msg = IncomingMessage {
                channel: self.name().to_string(),
                chat_id: CHAT_ID.to_string(),
                sender_id: SENDER_ID.to_string(),
                message_id: format!("cli-{seq}"),
                content: line,
                media: None,
                is_group: false,
                arrived_at: SystemTime::now(),
            };
            if tx.send(msg).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn send(&self, _chat_id: &str, message: &OutgoingMessage) -> Result<(), String> {
        let mut stdout = std::io::stdout();
        writeln!(stdout, "{}", message.content).map_err(|e| e.to_string())?;
        stdout.flush().map_err(|e| e.to_string())
    }

    async fn health_check(&self) -> bool {
        true
    }
}
