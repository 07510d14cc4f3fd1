//! Memory subsystem (spec §6 "Memory store" contract).
//!
//! # Architecture
//! ```text
//! Memory (trait)
//!   └── FileMemoryStore        ← JSON fact index + keyword-overlap recall
//!         └── DailyMemory      ← daily-log markdown files, MEMORY.md
//! ```
//!
//! # Agent tools
//! - [`tools::MemoryStoreTool`]  — `memory_store`
//! - [`tools::MemoryRecallTool`] — `memory_recall`
//! - [`tools::MemoryForgetTool`] — `memory_forget`

pub mod daily;
pub mod store;
pub mod tools;
pub mod traits;

use std::sync::Arc;

use crate::tools::ToolRegistry;

pub use daily::DailyMemory;
pub use store::FileMemoryStore;
pub use tools::{MemoryForgetTool, MemoryRecallTool, MemoryStoreTool};
pub use traits::{Memory, MemoryCategory, MemoryEntry};

/// Register the three memory agent tools into `registry`.
pub fn register_memory_tools(registry: &mut ToolRegistry, memory: Arc<dyn Memory>) {
    registry.register(Arc::new(MemoryStoreTool::new(memory.clone())));
    registry.register(Arc::new(MemoryRecallTool::new(memory.clone())));
    registry.register(Arc::new(MemoryForgetTool::new(memory)));
}
