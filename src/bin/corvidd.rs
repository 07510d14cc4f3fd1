//! `corvidd` — runs the assistant daemon against the CLI channel.
//!
//! Wires config, access control, workspaces, the event bus, guards, prompt
//! composition, the tool-backed agent loop, and a concrete LLM provider into
//! a single [`Assistant`] and drives it from a simple dispatch loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use corvid::access::AccessManager;
use corvid::agent::runner::{AgentRunner, RunnerConfig};
use corvid::agent::workspace::WorkspaceManager;
use corvid::assistant::{Assistant, AssistantDeps};
use corvid::channels::{ChannelManager, CliChannel};
use corvid::config::{Config, ConfigLoader, default_config_path};
use corvid::event_bus::{AppEvent, EventBus, TokioBroadcastBus};
use corvid::compaction::Compactor;
use corvid::guard::{InputGuard, OutputGuard};
use corvid::llm::{LLMProvider, OpenAiProvider, ReliableProvider};
use corvid::media::MediaEnricher;
use corvid::memory::{self, FileMemoryStore};
use corvid::model::{AccessLevel, ToolDefinition, ToolFlags};
use corvid::prompt::{PromptComposer, SkillPromptSource};
use corvid::queue::MessageQueue;
use corvid::sender::Sender;
use corvid::skills::{SkillComposer, SkillRegistry};
use corvid::tools::{
    FileListTool, FileReadTool, FileWriteTool, PatchTool, ProcessTool, ShellTool, Tool, ToolExecutor, ToolGuard,
    WebFetchTool, WebRequestTool, WebSearchTool,
};

/// Multi-channel personal AI-assistant daemon.
#[derive(Parser, Debug)]
#[command(name = "corvidd", version, about)]
struct Args {
    /// Path to the YAML config file. Defaults to the platform config dir.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level filter (e.g. "info", "corvid=debug,warn").
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(&args.log);

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not determine default config path, using ./corvid.yaml");
            PathBuf::from("corvid.yaml")
        }),
    };

    let loader = match ConfigLoader::load_or_default_watched(config_path.clone()) {
        Ok(loader) => loader,
        Err(e) => {
            tracing::warn!(error = %e, path = %config_path.display(), "falling back to an unwatched default config");
            ConfigLoader::load_or_default(config_path)
        }
    };
    let config = loader.get().as_ref().clone();

    let bus: Arc<dyn EventBus> = Arc::new(TokioBroadcastBus::new());

    let access = build_access_manager(&config);
    let workspaces = Arc::new(WorkspaceManager::new(
        &config.workspaces,
        state_dir().map(|d| d.join("sessions")),
        Duration::from_secs(6 * 3600),
    ));
    let queue = MessageQueue::with_limits(
        Duration::from_millis(config.queue.debounce_ms),
        config.queue.max_pending,
        Duration::from_secs(2),
    );

    let channels = Arc::new(ChannelManager::new());
    if let Err(e) = channels.register(Arc::new(CliChannel::new())).await {
        tracing::warn!(error = %e, "failed to register cli channel");
    }

    let provider: Arc<dyn LLMProvider> = match std::env::var("OPENAI_API_KEY") {
        Ok(key) => Arc::new(ReliableProvider::new(Arc::new(OpenAiProvider::new(key)))),
        Err(_) => {
            tracing::warn!("OPENAI_API_KEY is not set; LLM calls will fail until it is provided");
            Arc::new(ReliableProvider::new(Arc::new(OpenAiProvider::new(""))))
        }
    };

    let media = Arc::new(MediaEnricher::new(channels.clone(), provider.clone()));
    let input_guard = Arc::new(InputGuard::new(
        Duration::from_secs(60),
        config.security.rate_limit_per_minute as usize,
        config.security.max_input_length,
        true,
    ));
    let output_guard = Arc::new(OutputGuard::new());

    let memory_dir = expand_tilde(&config.memory.path);
    let memory_store: Arc<dyn memory::Memory> = match FileMemoryStore::open(memory_dir.clone()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, path = %memory_dir.display(), "failed to open memory store");
            std::process::exit(1);
        }
    };
    let mut skill_registry = SkillRegistry::new();
    if let Some(dir) = state_dir().map(|d| d.join("skills")) {
        let loaded = corvid::skills::load_skills_dir(&dir, &mut skill_registry);
        tracing::info!(count = loaded, path = %dir.display(), "loaded skills");
    }
    let skill_registry = Arc::new(skill_registry);
    let skill_composer: Arc<dyn SkillPromptSource> = Arc::new(SkillComposer::new(skill_registry.clone()));
    let composer = Arc::new(PromptComposer::new(Some(memory_store.clone()), Some(skill_composer)));

    let tool_guard = Arc::new(ToolGuard::new(config.security.tool_guard.clone(), bus.clone()));
    let mut executor = ToolExecutor::new(tool_guard, bus.clone(), config.security.tool_guard.max_concurrent_tools);
    register_builtin_tools(&mut executor);
    executor.register_skill_tools(skill_registry.all_tools());

    let mut registry = corvid::tools::ToolRegistry::new();
    memory::register_memory_tools(&mut registry, memory_store.clone());
    for (name, tool) in registry.iter() {
        let _ = name;
        executor.register(definition_for(tool.as_ref(), AccessLevel::User, ToolFlags::default()), tool.clone());
    }
    let tool_executor = Arc::new(executor);

    let runner = Arc::new(AgentRunner::new(
        provider.clone(),
        tool_executor.clone(),
        bus.clone(),
        config.default_model.clone(),
        RunnerConfig::default(),
    ));

    let sender = Arc::new(Sender::new(channels.clone()));

    let compactor = Arc::new(Compactor::new(
        provider.clone(),
        Some(memory_store.clone()),
        &config.memory,
        config.default_model.clone(),
    ));

    let assistant = Assistant::new(AssistantDeps {
        config: config.clone(),
        access,
        workspaces,
        queue,
        bus: bus.clone(),
        media,
        input_guard,
        output_guard,
        composer,
        runner,
        tool_executor,
        sender,
        channels: channels.clone(),
        compactor,
    });

    if config.heartbeat.enabled {
        spawn_heartbeat(bus.clone(), Duration::from_secs(config.heartbeat.interval_secs));
    }

    let (mut rx, _listen_handles) = channels.start_all(128).await;
    tracing::info!(channels = ?channels.channel_names().await, "corvidd is listening");

    while let Some(msg) = rx.recv().await {
        let assistant = assistant.clone();
        tokio::spawn(async move {
            assistant.handle_message(msg).await;
        });
    }
}

fn init_tracing(filter: &str) {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn build_access_manager(config: &Config) -> Arc<AccessManager> {
    let manager = match state_dir() {
        Some(dir) => AccessManager::with_persistence(config.access.policy, dir.join("access.json")),
        None => AccessManager::new(config.access.policy),
    };
    manager.seed(
        &config.access.owners,
        &config.access.admins,
        &config.access.allowed_users,
        &config.access.allowed_groups,
        &config.access.blocked,
    );
    Arc::new(manager)
}

fn state_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "corvid").map(|dirs| dirs.data_dir().to_path_buf())
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new() {
            return home.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}

fn register_builtin_tools(executor: &mut ToolExecutor) {
    let tools: Vec<(Arc<dyn Tool>, AccessLevel, ToolFlags)> = vec![
        (Arc::new(FileReadTool::new()), AccessLevel::User, ToolFlags { auto_approve: true, ..Default::default() }),
        (Arc::new(FileWriteTool::new()), AccessLevel::User, ToolFlags { requires_confirmation: true, ..Default::default() }),
        (Arc::new(FileListTool::new()), AccessLevel::User, ToolFlags { auto_approve: true, ..Default::default() }),
        (Arc::new(PatchTool::new()), AccessLevel::User, ToolFlags { requires_confirmation: true, ..Default::default() }),
        (
            Arc::new(ShellTool::new()),
            AccessLevel::Admin,
            ToolFlags { destructive: true, requires_confirmation: true, ..Default::default() },
        ),
        (
            Arc::new(ProcessTool::new()),
            AccessLevel::Admin,
            ToolFlags { destructive: true, requires_confirmation: true, ..Default::default() },
        ),
        (Arc::new(WebFetchTool::new()), AccessLevel::User, ToolFlags { auto_approve: true, ..Default::default() }),
        (Arc::new(WebRequestTool::new()), AccessLevel::User, ToolFlags::default()),
        (Arc::new(WebSearchTool::new()), AccessLevel::User, ToolFlags { auto_approve: true, ..Default::default() }),
    ];
    for (tool, level, flags) in tools {
        let definition = definition_for(tool.as_ref(), level, flags);
        executor.register(definition, tool);
    }
}

fn definition_for(tool: &dyn Tool, required_level: AccessLevel, flags: ToolFlags) -> ToolDefinition {
    ToolDefinition {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters_schema: tool.parameters_schema(),
        required_level,
        flags,
    }
}

fn spawn_heartbeat(bus: Arc<dyn EventBus>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let _ = bus.publish(AppEvent::HeartbeatTick { timestamp: chrono::Utc::now().to_rfc3339() });
        }
    });
}
