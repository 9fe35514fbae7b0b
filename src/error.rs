use std::fmt;
use std::io;

use serde::Serialize;
use thiserror::Error;

use crate::engine::EngineKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFailure {
    pub kind: EngineKind,
    pub cause: String,
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.cause)
    }
}

fn join_failures(tried: &[ProbeFailure]) -> String {
    tried
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum ToolboxError {
    #[error("no container engine available (tried: {})", join_failures(.tried))]
    NoEngineAvailable { tried: Vec<ProbeFailure> },
    #[error("{kind} is unavailable: {cause}")]
    EngineUnavailable { kind: EngineKind, cause: String },
    #[error("toolbox '{name}' not found")]
    ToolboxNotFound { name: String },
    #[error("name '{name}' is already used by a container not managed by opencode-toolbox ({kind})")]
    NameConflict { name: String, kind: EngineKind },
    #[error("image '{image}' not found ({kind}): {cause}")]
    ImageNotFound {
        image: String,
        kind: EngineKind,
        cause: String,
    },
    #[error("image '{image}' is still used by toolbox(es): {}", .users.join(", "))]
    ImageInUse { image: String, users: Vec<String> },
    #[error("toolbox '{name}' is busy: {reason}")]
    ToolboxBusy { name: String, reason: String },
    #[error("container {id} has {sessions} active exec session(s)")]
    ContainerBusy { id: String, sessions: usize },
    #[error("{kind} transport error: {cause}")]
    Transport { kind: EngineKind, cause: String },
    #[error("{kind} error: {cause}")]
    Engine { kind: EngineKind, cause: String },
    #[error("invalid toolbox name '{0}': must match [a-zA-Z0-9][a-zA-Z0-9_.-]*")]
    InvalidName(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ToolboxError>;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorDetails {
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
}

impl ToolboxError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ToolboxError::NoEngineAvailable { .. } => "no_engine_available",
            ToolboxError::EngineUnavailable { .. } => "engine_unavailable",
            ToolboxError::ToolboxNotFound { .. } => "toolbox_not_found",
            ToolboxError::NameConflict { .. } => "name_conflict",
            ToolboxError::ImageNotFound { .. } => "image_not_found",
            ToolboxError::ImageInUse { .. } => "image_in_use",
            ToolboxError::ToolboxBusy { .. } => "toolbox_busy",
            ToolboxError::ContainerBusy { .. } => "container_busy",
            ToolboxError::Transport { .. } => "engine_transport",
            ToolboxError::Engine { .. } => "engine_error",
            ToolboxError::InvalidName(_) => "invalid_name",
            ToolboxError::InvalidInput(_) => "invalid_input",
            ToolboxError::Config(_) => "config_error",
            ToolboxError::Io(_) => "io_error",
            ToolboxError::Yaml(_) => "yaml_error",
            ToolboxError::Json(_) => "json_error",
        }
    }

    pub fn hint(&self) -> Option<String> {
        match self {
            ToolboxError::NoEngineAvailable { .. } => Some(
                "Install Podman or Docker, make sure its service is running, and retry.".to_string(),
            ),
            ToolboxError::EngineUnavailable { kind, .. } => Some(format!(
                "Start the {kind} service (or pick another engine with --engine) and retry."
            )),
            ToolboxError::ToolboxNotFound { name } => Some(format!(
                "Create it first with `opencode-toolbox create {name}`."
            )),
            ToolboxError::NameConflict { name, kind } => Some(format!(
                "Remove or rename the existing container with `{} rm {name}`, or choose another toolbox name.",
                kind.binary()
            )),
            ToolboxError::ImageInUse { .. } => Some(
                "Remove the toolboxes using it first, or pass --force.".to_string(),
            ),
            ToolboxError::ToolboxBusy { .. } | ToolboxError::ContainerBusy { .. } => Some(
                "Leave the open sessions and retry, or pass --force.".to_string(),
            ),
            _ => None,
        }
    }

    pub fn engine_kind(&self) -> Option<EngineKind> {
        match self {
            ToolboxError::EngineUnavailable { kind, .. }
            | ToolboxError::NameConflict { kind, .. }
            | ToolboxError::ImageNotFound { kind, .. }
            | ToolboxError::Transport { kind, .. }
            | ToolboxError::Engine { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn details(&self) -> ErrorDetails {
        ErrorDetails {
            error_code: self.error_code().to_string(),
            hint: self.hint(),
            engine: self.engine_kind().map(|kind| kind.to_string()),
        }
    }
}
