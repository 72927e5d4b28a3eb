//! MCP connection lifecycle: a concrete [`crate::fsm::Fsm`] plus the method
//! sequencing rule that gates every request/notification against it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::McpError;
use crate::fsm::{Fsm, FsmBuilder, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Initialized,
    ShuttingDown,
    Shutdown,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "Uninitialized",
            Self::Initializing => "Initializing",
            Self::Initialized => "Initialized",
            Self::ShuttingDown => "ShuttingDown",
            Self::Shutdown => "Shutdown",
        };
        write!(f, "{s}")
    }
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    InitializeRequest,
    ClientInitialized,
    ShutdownRequest,
    ExitNotification,
    TransportErrorOccurred,
    McpRequest,
    McpNotification,
}

/// Map a method name to the lifecycle event it represents, where one exists.
/// `None` means the method is a generic MCP request/notification and the
/// caller must classify it itself (by id presence) into `McpRequest` or
/// `McpNotification`.
pub fn event_for_method(method: &str) -> Option<LifecycleEvent> {
    match method {
        "initialize" => Some(LifecycleEvent::InitializeRequest),
        "notifications/initialized" => Some(LifecycleEvent::ClientInitialized),
        "shutdown" => Some(LifecycleEvent::ShutdownRequest),
        "exit" => Some(LifecycleEvent::ExitNotification),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: std::collections::HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: std::collections::HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeRequest {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResponse {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InitializedNotification {}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ShutdownRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The concrete MCP lifecycle state machine, built once per connection and
/// shared with the pipeline and router via `Arc`.
pub struct LifecycleFsm {
    fsm: Fsm<LifecycleState, LifecycleEvent>,
}

impl LifecycleFsm {
    pub fn new() -> Arc<Self> {
        use LifecycleEvent::*;
        use LifecycleState::*;

        let fsm = FsmBuilder::new()
            .add_transition(Transition::new(vec![Uninitialized], InitializeRequest, Initializing))
            .unwrap()
            .add_transition(Transition::new(vec![Initializing], ClientInitialized, Initialized))
            .unwrap()
            .add_transition(Transition::new(vec![Initialized], McpRequest, Initialized))
            .unwrap()
            .add_transition(Transition::new(vec![Initialized], McpNotification, Initialized))
            .unwrap()
            .add_transition(Transition::new(vec![Initialized], ShutdownRequest, ShuttingDown))
            .unwrap()
            .add_transition(Transition::new(
                vec![Initialized, ShuttingDown],
                ExitNotification,
                Shutdown,
            ))
            .unwrap()
            .add_transition(Transition::new(
                vec![Uninitialized, Initializing, Initialized, ShuttingDown],
                TransportErrorOccurred,
                Shutdown,
            ))
            .unwrap()
            .build(Uninitialized)
            .expect("static lifecycle transition table must build");

        Arc::new(Self { fsm })
    }

    pub fn current_state(&self) -> LifecycleState {
        self.fsm.current_state()
    }

    /// Gate a method against the current lifecycle state, per the two-branch
    /// rule: named lifecycle methods (`initialize`, `shutdown`, `exit`,
    /// `notifications/initialized`) are checked for a matching transition;
    /// every other method is only permitted once the connection reaches
    /// `Initialized`.
    pub fn validate_method(&self, method: &str, is_notification: bool) -> Result<(), McpError> {
        let event = match event_for_method(method) {
            Some(event) => event,
            None => {
                if is_notification {
                    LifecycleEvent::McpNotification
                } else {
                    LifecycleEvent::McpRequest
                }
            }
        };

        if self.fsm.can_transition(&event) {
            Ok(())
        } else {
            Err(McpError::request_sequence(method, self.current_state()))
        }
    }

    /// Drive the underlying FSM for a method that has already been
    /// validated. Self-transitions within `Initialized` for generic
    /// request/notification traffic are benign no-ops from the caller's
    /// perspective (the pipeline doesn't treat `NoTransition` here as an
    /// error since `validate_method` already confirmed reachability).
    pub fn advance(&self, method: &str, is_notification: bool) -> LifecycleState {
        let event = match event_for_method(method) {
            Some(event) => event,
            None => {
                if is_notification {
                    LifecycleEvent::McpNotification
                } else {
                    LifecycleEvent::McpRequest
                }
            }
        };
        self.fsm
            .transition(event, serde_json::Value::Null)
            .unwrap_or_else(|_| self.current_state())
    }
}

impl InitializeRequest {
    /// MCP protocol versions are `YYYY-MM-DD` strings; this checks the shape
    /// and a sane year range, but does not pin the engine to any fixed list
    /// of versions — negotiating which versions a given server supports is a
    /// handler concern, not this module's.
    pub fn validate_protocol_version(&self) -> Result<(), McpError> {
        let parts: Vec<&str> = self.protocol_version.split('-').collect();
        if parts.len() != 3
            || parts[0].len() != 4
            || parts[1].len() != 2
            || parts[2].len() != 2
            || !self.protocol_version.chars().all(|c| c.is_ascii_digit() || c == '-')
        {
            return Err(McpError::protocol_unsupported(format!(
                "protocol version must be in YYYY-MM-DD format, got '{}'",
                self.protocol_version
            )));
        }

        let (Ok(year), Ok(month), Ok(day)) = (
            parts[0].parse::<u16>(),
            parts[1].parse::<u8>(),
            parts[2].parse::<u8>(),
        ) else {
            return Err(McpError::protocol_unsupported(
                "protocol version components must be numeric".to_string(),
            ));
        };

        if !(2020..=2099).contains(&year) || !(1..=12).contains(&month) || !(1..=31).contains(&day)
        {
            return Err(McpError::protocol_unsupported(format!(
                "protocol version '{}' is out of range",
                self.protocol_version
            )));
        }

        Ok(())
    }
}
