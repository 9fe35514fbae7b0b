//! Container engine abstraction.
//!
//! [`Engine`] is the uniform verb set the lifecycle layer talks to. The only
//! production implementation is [`cli::CliEngine`], which drives the `docker`
//! or `podman` binary; the two engine kinds differ only in their
//! [`cli::Dialect`]. [`selector::EngineSelector`] picks one at startup.

pub mod classify;
pub mod cli;
pub mod docker;
pub mod podman;
pub mod runner;
pub mod selector;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;
use std::io::IsTerminal;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::cancel::CancelFlag;
use crate::error::{Result, ToolboxError};
use crate::toolbox::{ContainerInfo, ToolboxRecord, ToolboxSpec};

pub use cli::CliEngine;
pub use docker::Docker;
pub use podman::Podman;
pub use runner::{CommandOutput, CommandRunner, SystemRunner};
pub use selector::EngineSelector;

pub type ContainerId = String;
pub type ExitCode = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Docker,
    Podman,
}

impl EngineKind {
    pub fn binary(self) -> &'static str {
        match self {
            EngineKind::Docker => "docker",
            EngineKind::Podman => "podman",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnginePreference {
    #[default]
    Auto,
    Only(EngineKind),
}

impl EnginePreference {
    /// Rootless-friendly Podman goes first when auto-detecting.
    pub const AUTO_ORDER: [EngineKind; 2] = [EngineKind::Podman, EngineKind::Docker];

    pub fn candidates(self) -> Vec<EngineKind> {
        match self {
            EnginePreference::Auto => Self::AUTO_ORDER.to_vec(),
            EnginePreference::Only(kind) => vec![kind],
        }
    }
}

impl FromStr for EnginePreference {
    type Err = ToolboxError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(EnginePreference::Auto),
            "docker" => Ok(EnginePreference::Only(EngineKind::Docker)),
            "podman" => Ok(EnginePreference::Only(EngineKind::Podman)),
            other => Err(ToolboxError::Config(format!(
                "unknown engine '{other}'; expected auto, docker or podman"
            ))),
        }
    }
}

impl fmt::Display for EnginePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnginePreference::Auto => f.write_str("auto"),
            EnginePreference::Only(kind) => kind.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineEndpoints {
    pub docker_host: Option<String>,
    pub podman_url: Option<String>,
}

impl EngineEndpoints {
    pub fn for_kind(&self, kind: EngineKind) -> Option<&str> {
        match kind {
            EngineKind::Docker => self.docker_host.as_deref(),
            EngineKind::Podman => self.podman_url.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub endpoints: EngineEndpoints,
    pub probe_timeout: Duration,
    /// Command the toolbox container runs as PID 1's child to stay alive.
    pub keepalive: Vec<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            endpoints: EngineEndpoints::default(),
            probe_timeout: Duration::from_millis(2000),
            keepalive: vec!["sleep".to_string(), "infinity".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtyConfig {
    pub interactive: bool,
    pub tty: bool,
}

impl TtyConfig {
    pub fn detect() -> Self {
        let interactive = std::io::stdin().is_terminal();
        Self {
            interactive,
            tty: interactive && std::io::stdout().is_terminal(),
        }
    }

    pub fn none() -> Self {
        Self {
            interactive: false,
            tty: false,
        }
    }
}

pub trait Engine {
    fn kind(&self) -> EngineKind;

    fn endpoint(&self) -> Option<&str>;

    /// Creates (without starting) a container carrying the managed labels.
    fn create_container(&self, spec: &ToolboxSpec) -> Result<ContainerId>;

    /// Starting an already running container is not an error.
    fn start_container(&self, id: &str) -> Result<()>;

    fn unpause_container(&self, id: &str) -> Result<()>;

    /// Blocks until the remote command exits or `cancel` is raised. On
    /// cancellation the container keeps running.
    fn exec_interactive(
        &self,
        id: &str,
        command: &[String],
        tty: TtyConfig,
        cancel: &CancelFlag,
    ) -> Result<ExitCode>;

    /// Re-queries the engine on every call.
    fn list_managed(&self) -> Result<Vec<ToolboxRecord>>;

    fn inspect(&self, name_or_id: &str) -> Result<Option<ContainerInfo>>;

    fn stop_and_remove(&self, id: &str, force: bool) -> Result<()>;

    fn remove_image(&self, image: &str, force: bool) -> Result<()>;
}
