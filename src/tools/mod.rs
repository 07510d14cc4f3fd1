pub mod executor;
pub mod file_ops;
pub mod guard;
pub mod patch;
pub mod process;
pub mod registry;
pub mod schema;
pub mod shell;
pub mod traits;
pub mod web;

use std::sync::Arc;

pub use executor::ToolExecutor;
pub use file_ops::{FileListTool, FileReadTool, FileWriteTool};
pub use guard::{AuditEntry, CallerContext, GuardError, ToolGuard};
pub use patch::PatchTool;
pub use process::ProcessTool;
pub use registry::ToolRegistry;
pub use schema::{generate_tool_schema_text, generate_tool_summary};
pub use shell::ShellTool;
pub use traits::{Tool, ToolInfo, ToolResult};
pub use web::{SearchResult, WebFetchTool, WebRequestTool, WebSearchTool};

/// Register all built-in tools into `registry`.
///
/// Permission gating for every one of these lives in [`ToolGuard`], invoked
/// by the tool executor before `Tool::execute` runs; handlers here are bare
/// I/O implementations.
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register(Arc::new(ShellTool::new()));
    registry.register(Arc::new(FileReadTool::new()));
    registry.register(Arc::new(FileWriteTool::new()));
    registry.register(Arc::new(FileListTool::new()));
    registry.register(Arc::new(PatchTool::new()));
    registry.register(Arc::new(ProcessTool::new()));
    registry.register(Arc::new(WebFetchTool::new()));
    registry.register(Arc::new(WebRequestTool::new()));
    registry.register(Arc::new(WebSearchTool::new()));
}
