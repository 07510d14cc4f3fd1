//! Channel abstraction layer (spec §6 "Channel contract").
//!
//! A **channel** is any transport layer that delivers [`model::IncomingMessage`](crate::model::IncomingMessage)s
//! between the assistant and an external peer (CLI, a chat platform, a webhook, …).
//! Concrete chat-platform transports (WhatsApp, Discord, Telegram, …) are
//! external collaborators exposing this contract, not part of this crate;
//! the bundled [`CliChannel`] exists to drive the assistant interactively
//! and as a worked example for anyone implementing a new transport.
//!
//! # Architecture
//!
//! ```text
//!   Chat platform API / webhook / stdin
//!         │
//!         ▼
//!   ┌─────────────┐
//!   │  Channel    │  (impl: CliChannel, …)
//!   └──────┬──────┘
//!          │ mpsc::Sender<IncomingMessage>
//!          ▼
//!   ┌─────────────────┐
//!   │  ChannelManager │  aggregates all channels into one receiver
//!   └──────┬──────────┘
//!          │ mpsc::Receiver<IncomingMessage>
//!          ▼
//!       Assistant pipeline
//! ```
//!
//! # Registering a new channel
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use crate::channels::{ChannelManager, CliChannel};
//!
//! let mgr = ChannelManager::new();
//! mgr.register(Arc::new(CliChannel::new())).await.unwrap();
//! let (rx, _handles) = mgr.start_all(64).await;
//! // poll rx in the assistant pipeline
//! ```

pub mod cli;
pub mod manager;
pub mod traits;

pub use cli::CliChannel;
pub use manager::ChannelManager;
pub use traits::Channel;
