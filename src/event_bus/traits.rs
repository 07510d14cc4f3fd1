use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// All events that flow through the application event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    AgentToolStart {
        session_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    AgentToolResult {
        session_id: String,
        tool_name: String,
        result: String,
        success: bool,
    },
    /// Emitted immediately after a run is registered, before the agent
    /// executes. Clients should capture `session_id` here to enable cancellation.
    AgentStarted {
        session_id: String,
    },
    AgentComplete {
        session_id: String,
        message: String,
    },
    /// A tool in `requires_confirmation` is blocked on caller approval
    /// (spec §4.10 permission-check step 6).
    ConfirmationRequested {
        request_id: String,
        session_id: String,
        tool_name: String,
        description: String,
    },
    ConfirmationResponse {
        request_id: String,
        approved: bool,
    },
    HeartbeatTick {
        timestamp: String,
    },
    /// Emitted when a heartbeat agent run returns meaningful content.
    /// Consumers (channel senders) should surface this to the user.
    HeartbeatAlert {
        content: String,
    },
    MemoryStored {
        kind: String,
        summary: String,
    },
    MemoryRecalled {
        query: String,
        count: usize,
    },
    SystemReady,
    SystemError {
        message: String,
    },
}

/// Selects which event variants a subscriber is interested in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    AgentToolStart,
    AgentToolResult,
    AgentStarted,
    AgentComplete,
    ConfirmationRequested,
    ConfirmationResponse,
    HeartbeatTick,
    HeartbeatAlert,
    MemoryStored,
    MemoryRecalled,
    SystemReady,
    SystemError,
    /// Matches every variant.
    All,
}

impl EventType {
    /// Returns true if this filter matches `event`.
    pub fn matches(&self, event: &AppEvent) -> bool {
        match self {
            Self::All => true,
            Self::AgentToolStart => matches!(event, AppEvent::AgentToolStart { .. }),
            Self::AgentToolResult => matches!(event, AppEvent::AgentToolResult { .. }),
            Self::AgentStarted => matches!(event, AppEvent::AgentStarted { .. }),
            Self::AgentComplete => matches!(event, AppEvent::AgentComplete { .. }),
            Self::ConfirmationRequested => matches!(event, AppEvent::ConfirmationRequested { .. }),
            Self::ConfirmationResponse => matches!(event, AppEvent::ConfirmationResponse { .. }),
            Self::HeartbeatTick => matches!(event, AppEvent::HeartbeatTick { .. }),
            Self::HeartbeatAlert => matches!(event, AppEvent::HeartbeatAlert { .. }),
            Self::MemoryStored => matches!(event, AppEvent::MemoryStored { .. }),
            Self::MemoryRecalled => matches!(event, AppEvent::MemoryRecalled { .. }),
            Self::SystemReady => matches!(event, AppEvent::SystemReady),
            Self::SystemError => matches!(event, AppEvent::SystemError { .. }),
        }
    }
}

/// A set of event types used for filtering subscriptions.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub event_types: Vec<EventType>,
}

impl EventFilter {
    pub fn new(event_types: Vec<EventType>) -> Self {
        Self { event_types }
    }

    pub fn matches(&self, event: &AppEvent) -> bool {
        self.event_types.iter().any(|t| t.matches(event))
    }
}

/// Central pub/sub bus for application events.
///
/// All returned `Receiver`s receive every published event; callers are
/// responsible for filtering if they subscribed via [`subscribe_filtered`].
pub trait EventBus: Send + Sync {
    /// Publish an event to all active subscribers.
    fn publish(&self, event: AppEvent) -> Result<(), String>;

    /// Subscribe to all events.
    fn subscribe(&self) -> broadcast::Receiver<AppEvent>;

    /// Subscribe to events, pre-scoped to the given filter.
    ///
    /// The returned receiver still carries all events; the filter is provided
    /// as documentation / future optimisation surface.  Consumers should call
    /// [`EventFilter::matches`] to discard unwanted events.
    fn subscribe_filtered(&self, filter: EventFilter) -> broadcast::Receiver<AppEvent>;
}
