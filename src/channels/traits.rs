//! Core channel abstraction (spec §6 "Channel contract").
//!
//! A **channel** is any transport layer over which [`IncomingMessage`]s flow
//! in and [`OutgoingMessage`]s flow out (CLI stdin/stdout, a webhook, a chat
//! platform client, …).
//!
//! # Implementing a Channel
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use tokio::sync::mpsc;
//! use crate::channels::traits::Channel;
//! use crate::model::{IncomingMessage, OutgoingMessage};
//!
//! struct MyChannel;
//!
//! #[async_trait]
//! impl Channel for MyChannel {
//!     fn name(&self) -> &str { "my-channel" }
//!     async fn listen(&self, tx: mpsc::Sender<IncomingMessage>) -> Result<(), String> { Ok(()) }
//!     async fn send(&self, chat_id: &str, message: &OutgoingMessage) -> Result<(), String> { Ok(()) }
//!     async fn health_check(&self) -> bool { true }
//! }
//! ```

use async_trait::async_trait;

use crate::model::{IncomingMessage, OutgoingMessage};

/// Transport abstraction for sending and receiving messages (spec §6).
///
/// Implementations must be `Send + Sync` so they can be stored in a shared
/// [`ChannelManager`](super::manager::ChannelManager) behind an `Arc`.
#[async_trait]
pub trait Channel: Send + Sync {
    /// A unique identifier for this channel type (e.g. `"cli"`, `"telegram"`).
    fn name(&self) -> &str;

    /// Begin listening for inbound messages, forwarding them on `tx`.
    ///
    /// This is the `Messages() → stream of IncomingMessage` side of the
    /// contract; it should run until the channel disconnects or `tx` is
    /// dropped.
    async fn listen(&self, tx: tokio::sync::mpsc::Sender<IncomingMessage>) -> Result<(), String>;

    /// Send a reply to `chat_id`.
    async fn send(&self, chat_id: &str, message: &OutgoingMessage) -> Result<(), String>;

    /// Best-effort typing indicator. Default no-op; channels without the
    /// concept never need to override it.
    async fn send_typing(&self, _chat_id: &str) -> Result<(), String> {
        Ok(())
    }

    /// Best-effort read-receipt. Default no-op.
    async fn mark_read(&self, _chat_id: &str, _message_ids: &[String]) -> Result<(), String> {
        Ok(())
    }

    /// Fetch the raw bytes and MIME type for `msg`'s attached media, if any.
    /// Default: unsupported. Failures here fall back to the original message
    /// content (spec §4.6) — never fatal.
    async fn download_media(&self, _msg: &IncomingMessage) -> Result<(Vec<u8>, String), String> {
        Err(format!("{} does not support media downloads", self.name()))
    }

    /// Perform a lightweight health check. Returns `true` when operational.
    async fn health_check(&self) -> bool;

    /// Maximum length, in bytes, of a single outgoing message this channel
    /// accepts. [`crate::sender::Sender`] splits longer replies into chunks
    /// that respect this limit (spec §4.1 step 14). Default is a
    /// conservative value that suits most chat platforms.
    fn max_message_length(&self) -> usize {
        4000
    }
}
