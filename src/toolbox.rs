//! Toolbox intent (`ToolboxSpec`) and its observed projection in the engine
//! (`ToolboxRecord`).

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Result, ToolboxError};

pub const LABEL_MANAGED: &str = "toolbox.managed";
pub const LABEL_NAME: &str = "toolbox.name";
pub const LABEL_IMAGE: &str = "toolbox.image";

pub fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ToolboxError::InvalidName(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Mount {
    /// Parses `HOST:CONTAINER[:ro|:rw]`. A leading `~/` on the host side is
    /// expanded against the home directory.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split(':').collect();
        let (host, container, read_only) = match parts.as_slice() {
            [host, container] => (*host, *container, false),
            [host, container, "ro"] => (*host, *container, true),
            [host, container, "rw"] => (*host, *container, false),
            _ => {
                return Err(ToolboxError::InvalidInput(format!(
                    "mount '{raw}' must look like HOST:CONTAINER[:ro]"
                )))
            }
        };
        if host.is_empty() || container.is_empty() {
            return Err(ToolboxError::InvalidInput(format!(
                "mount '{raw}' has an empty side"
            )));
        }
        if !container.starts_with('/') {
            return Err(ToolboxError::InvalidInput(format!(
                "mount '{raw}': container path must be absolute"
            )));
        }
        Ok(Self {
            host: PathBuf::from(expand_home(host)),
            container: container.to_string(),
            read_only,
        })
    }

    pub fn to_volume_arg(&self) -> String {
        let mut arg = format!("{}:{}", self.host.display(), self.container);
        if self.read_only {
            arg.push_str(":ro");
        }
        arg
    }
}

pub fn expand_home(input: &str) -> String {
    if input == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.to_string_lossy().to_string();
        }
    }
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped).to_string_lossy().to_string();
        }
    }
    input.to_string()
}

pub fn parse_env_pair(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(ToolboxError::InvalidInput(format!(
            "environment entry '{raw}' must look like KEY=VALUE"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolboxSpec {
    pub name: String,
    pub image: String,
    pub mounts: Vec<Mount>,
    pub env: BTreeMap<String, String>,
    pub workdir: Option<String>,
}

impl ToolboxSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            mounts: Vec::new(),
            env: BTreeMap::new(),
            workdir: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        if self.image.trim().is_empty() {
            return Err(ToolboxError::InvalidInput(format!(
                "toolbox '{}' has no image",
                self.name
            )));
        }
        if let Some(workdir) = &self.workdir {
            if !workdir.starts_with('/') {
                return Err(ToolboxError::InvalidInput(format!(
                    "workdir '{workdir}' must be an absolute container path"
                )));
            }
        }
        Ok(())
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_MANAGED.to_string(), "true".to_string()),
            (LABEL_NAME.to_string(), self.name.clone()),
            (LABEL_IMAGE.to_string(), self.image.clone()),
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolboxState {
    Created,
    Running,
    Paused,
    Stopped,
    RemovePending,
    Unknown,
}

impl ToolboxState {
    pub fn from_engine_status(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "created" | "configured" | "initialized" => ToolboxState::Created,
            "running" => ToolboxState::Running,
            "paused" => ToolboxState::Paused,
            "exited" | "stopped" => ToolboxState::Stopped,
            "removing" => ToolboxState::RemovePending,
            _ => ToolboxState::Unknown,
        }
    }
}

impl fmt::Display for ToolboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ToolboxState::Created => "created",
            ToolboxState::Running => "running",
            ToolboxState::Paused => "paused",
            ToolboxState::Stopped => "stopped",
            ToolboxState::RemovePending => "removing",
            ToolboxState::Unknown => "unknown",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolboxRecord {
    pub name: String,
    pub id: String,
    pub state: ToolboxState,
    pub image: String,
    pub created: DateTime<Utc>,
}

/// What `inspect` reports about a container, managed or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub managed: bool,
    pub state: ToolboxState,
    pub image: String,
    pub created: DateTime<Utc>,
    pub exec_sessions: usize,
}

impl ContainerInfo {
    pub fn into_record(self) -> ToolboxRecord {
        ToolboxRecord {
            name: self.name,
            id: self.id,
            state: self.state,
            image: self.image,
            created: self.created,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_pattern() {
        for ok in ["dev", "a", "Dev_1.2-x", "9lives"] {
            assert!(validate_name(ok).is_ok(), "{ok} should be valid");
        }
        for bad in ["", "-dev", ".dev", "_dev", "dev box", "dev/x", "dév"] {
            let err = validate_name(bad).expect_err(bad);
            assert_eq!(err.error_code(), "invalid_name");
        }
    }

    #[test]
    fn mount_parsing() {
        let mount = Mount::parse("/srv/code:/code:ro").unwrap();
        assert_eq!(mount.host, PathBuf::from("/srv/code"));
        assert_eq!(mount.container, "/code");
        assert!(mount.read_only);
        assert_eq!(mount.to_volume_arg(), "/srv/code:/code:ro");

        let mount = Mount::parse("/srv/code:/code").unwrap();
        assert!(!mount.read_only);
        assert_eq!(mount.to_volume_arg(), "/srv/code:/code");

        assert!(Mount::parse("/srv/code").is_err());
        assert!(Mount::parse("/srv/code:relative").is_err());
        assert!(Mount::parse("/a:/b:zz").is_err());
        assert!(Mount::parse(":/b").is_err());
    }

    #[test]
    fn mount_expands_home() {
        let mount = Mount::parse("~/src:/src").unwrap();
        assert!(!mount.host.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn env_pairs() {
        assert_eq!(
            parse_env_pair("EDITOR=vim").unwrap(),
            ("EDITOR".to_string(), "vim".to_string())
        );
        assert_eq!(
            parse_env_pair("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert_eq!(
            parse_env_pair("A=b=c").unwrap(),
            ("A".to_string(), "b=c".to_string())
        );
        assert!(parse_env_pair("=x").is_err());
        assert!(parse_env_pair("NOVALUE").is_err());
    }

    #[test]
    fn spec_validation() {
        assert!(ToolboxSpec::new("dev", "alpine:3.19").validate().is_ok());
        assert!(ToolboxSpec::new("dev", " ").validate().is_err());
        let mut spec = ToolboxSpec::new("dev", "alpine:3.19");
        spec.workdir = Some("src".to_string());
        assert!(spec.validate().is_err());
    }

    #[test]
    fn spec_labels_mark_container_as_managed() {
        let labels = ToolboxSpec::new("dev", "alpine:3.19").labels();
        assert_eq!(labels[LABEL_MANAGED], "true");
        assert_eq!(labels[LABEL_NAME], "dev");
        assert_eq!(labels[LABEL_IMAGE], "alpine:3.19");
    }

    #[test]
    fn engine_status_mapping() {
        assert_eq!(ToolboxState::from_engine_status("running"), ToolboxState::Running);
        assert_eq!(ToolboxState::from_engine_status("Exited"), ToolboxState::Stopped);
        assert_eq!(ToolboxState::from_engine_status("stopped"), ToolboxState::Stopped);
        assert_eq!(ToolboxState::from_engine_status("configured"), ToolboxState::Created);
        assert_eq!(ToolboxState::from_engine_status("removing"), ToolboxState::RemovePending);
        assert_eq!(ToolboxState::from_engine_status("paused"), ToolboxState::Paused);
        assert_eq!(ToolboxState::from_engine_status("restarting"), ToolboxState::Unknown);
        assert_eq!(ToolboxState::Paused.to_string(), "paused");
    }
}
