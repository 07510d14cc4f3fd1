pub mod loader;
pub mod schema;

pub use loader::{ConfigError, ConfigLoader, default_config_path};
pub use schema::{
    AccessConfig, CompactionStrategy, Config, HeartbeatConfig, MemoryStoreConfig, QueueConfig,
    SecurityConfig, ToolGuardConfig, WorkspaceConfigEntry,
};
