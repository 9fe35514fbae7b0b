use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{EngineEndpoints, EngineOptions, EnginePreference};
use crate::error::{Result, ToolboxError};
use crate::toolbox::{parse_env_pair, validate_name, Mount, ToolboxSpec};

pub const CONFIG_ENV: &str = "OPENCODE_TOOLBOX_CONFIG";
pub const ENGINE_ENV: &str = "OPENCODE_TOOLBOX_ENGINE";
pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub version: u32,
    pub engine: EngineConfig,
    pub defaults: Defaults,
    pub toolboxes: BTreeMap<String, ToolboxOverrides>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub preference: String,
    pub docker_host: String,
    pub podman_url: String,
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Defaults {
    pub image: String,
    pub mounts: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub workdir: String,
    pub shell: String,
    pub keepalive: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolboxOverrides {
    pub image: Option<String>,
    pub mounts: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub workdir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            engine: EngineConfig::default(),
            defaults: Defaults::default(),
            toolboxes: BTreeMap::new(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preference: "auto".to_string(),
            docker_host: String::new(),
            podman_url: String::new(),
            probe_timeout_ms: 2000,
        }
    }
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            image: "registry.fedoraproject.org/fedora-toolbox:40".to_string(),
            mounts: Vec::new(),
            env: BTreeMap::new(),
            workdir: String::new(),
            shell: "/bin/sh".to_string(),
            keepalive: vec!["sleep".to_string(), "infinity".to_string()],
        }
    }
}

/// Where the configuration was looked up, and whether the user asked for
/// that location explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLocation {
    pub path: PathBuf,
    pub explicit: bool,
}

/// Command-line additions layered over the configured spec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOverrides {
    pub image: Option<String>,
    pub mounts: Vec<String>,
    pub env: Vec<String>,
    pub workdir: Option<String>,
}

pub fn default_config_dir() -> PathBuf {
    let mut base = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.push("opencode-toolbox");
    base
}

pub fn resolve_config_path(override_path: Option<&Path>) -> ConfigLocation {
    locate_config(override_path, env::var(CONFIG_ENV).ok())
}

fn locate_config(override_path: Option<&Path>, env_path: Option<String>) -> ConfigLocation {
    if let Some(path) = override_path {
        return ConfigLocation {
            path: path.to_path_buf(),
            explicit: true,
        };
    }
    if let Some(path) = env_path.filter(|value| !value.trim().is_empty()) {
        return ConfigLocation {
            path: PathBuf::from(path),
            explicit: true,
        };
    }
    ConfigLocation {
        path: default_config_dir().join("config.yaml"),
        explicit: false,
    }
}

pub fn load(location: &ConfigLocation) -> Result<Config> {
    if !location.path.exists() {
        if location.explicit {
            return Err(ToolboxError::Config(format!(
                "config file {} does not exist",
                location.path.display()
            )));
        }
        debug!(path = %location.path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }
    let content = fs::read_to_string(&location.path)?;
    debug!(path = %location.path.display(), "loaded config");
    read_config_from_str(&content)
}

pub fn read_config_from_str(content: &str) -> Result<Config> {
    if content.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = serde_yaml::from_str(content)?;
    if cfg.version != CONFIG_VERSION {
        return Err(ToolboxError::Config(format!(
            "unsupported config version {}",
            cfg.version
        )));
    }
    validate_config(&cfg)?;
    Ok(cfg)
}

fn validate_mounts(field: &str, mounts: &[String]) -> Result<()> {
    for raw in mounts {
        Mount::parse(raw).map_err(|err| ToolboxError::Config(format!("{field}: {err}")))?;
    }
    Ok(())
}

fn validate_env(field: &str, vars: &BTreeMap<String, String>) -> Result<()> {
    for key in vars.keys() {
        if key.is_empty() || key.contains('=') {
            return Err(ToolboxError::Config(format!(
                "{field} has an invalid variable name '{key}'"
            )));
        }
    }
    Ok(())
}

fn validate_workdir(field: &str, workdir: &str) -> Result<()> {
    if !workdir.is_empty() && !workdir.starts_with('/') {
        return Err(ToolboxError::Config(format!(
            "{field} must be an absolute container path"
        )));
    }
    Ok(())
}

pub fn validate_config(cfg: &Config) -> Result<()> {
    cfg.engine.preference.parse::<EnginePreference>()?;
    if cfg.engine.probe_timeout_ms == 0 {
        return Err(ToolboxError::Config(
            "engine.probe_timeout_ms must be greater than 0".to_string(),
        ));
    }
    if cfg.defaults.image.trim().is_empty() {
        return Err(ToolboxError::Config(
            "defaults.image must be non-empty".to_string(),
        ));
    }
    if cfg.defaults.shell.trim().is_empty() {
        return Err(ToolboxError::Config(
            "defaults.shell must be non-empty".to_string(),
        ));
    }
    if cfg
        .defaults
        .keepalive
        .first()
        .map_or(true, |program| program.trim().is_empty())
    {
        return Err(ToolboxError::Config(
            "defaults.keepalive must name a command".to_string(),
        ));
    }
    validate_mounts("defaults.mounts", &cfg.defaults.mounts)?;
    validate_env("defaults.env", &cfg.defaults.env)?;
    validate_workdir("defaults.workdir", &cfg.defaults.workdir)?;

    for (name, toolbox) in &cfg.toolboxes {
        validate_name(name)
            .map_err(|_| ToolboxError::Config(format!("toolboxes.{name}: invalid toolbox name")))?;
        if let Some(image) = &toolbox.image {
            if image.trim().is_empty() {
                return Err(ToolboxError::Config(format!(
                    "toolboxes.{name}.image must be non-empty when set"
                )));
            }
        }
        validate_mounts(&format!("toolboxes.{name}.mounts"), &toolbox.mounts)?;
        validate_env(&format!("toolboxes.{name}.env"), &toolbox.env)?;
        if let Some(workdir) = &toolbox.workdir {
            validate_workdir(&format!("toolboxes.{name}.workdir"), workdir)?;
        }
    }
    Ok(())
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl Config {
    /// `--engine` beats `OPENCODE_TOOLBOX_ENGINE`, which beats the file.
    pub fn effective_preference(
        &self,
        cli: Option<&str>,
        env_value: Option<&str>,
    ) -> Result<EnginePreference> {
        let raw = cli
            .and_then(non_empty)
            .or_else(|| env_value.and_then(non_empty))
            .unwrap_or_else(|| self.engine.preference.clone());
        raw.parse()
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            endpoints: EngineEndpoints {
                docker_host: non_empty(&self.engine.docker_host),
                podman_url: non_empty(&self.engine.podman_url),
            },
            probe_timeout: Duration::from_millis(self.engine.probe_timeout_ms),
            keepalive: self.defaults.keepalive.clone(),
        }
    }

    pub fn shell(&self) -> &str {
        &self.defaults.shell
    }

    /// Defaults, then the toolbox's own section, then the command line.
    /// Mounts accumulate; env keys and scalar fields are overridden.
    pub fn resolve_spec(&self, name: &str, overrides: &CreateOverrides) -> Result<ToolboxSpec> {
        validate_name(name)?;
        let section = self.toolboxes.get(name).cloned().unwrap_or_default();

        let image = overrides
            .image
            .clone()
            .or(section.image)
            .unwrap_or_else(|| self.defaults.image.clone());
        let mut spec = ToolboxSpec::new(name, image);

        for raw in self
            .defaults
            .mounts
            .iter()
            .chain(&section.mounts)
            .chain(&overrides.mounts)
        {
            spec.mounts.push(Mount::parse(raw)?);
        }

        spec.env = self.defaults.env.clone();
        spec.env.extend(section.env);
        for raw in &overrides.env {
            let (key, value) = parse_env_pair(raw)?;
            spec.env.insert(key, value);
        }

        spec.workdir = overrides
            .workdir
            .clone()
            .or(section.workdir)
            .or_else(|| Some(self.defaults.workdir.clone()))
            .and_then(|workdir| non_empty(&workdir));

        spec.validate()?;
        Ok(spec)
    }
}
