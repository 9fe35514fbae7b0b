//! In-memory engine for exercising the registry and lifecycle layers.

use std::cell::RefCell;
use std::collections::BTreeSet;

use chrono::{DateTime, Duration, TimeZone, Utc};

use super::{ContainerId, Engine, EngineKind, ExitCode, TtyConfig};
use crate::cancel::CancelFlag;
use crate::error::{Result, ToolboxError};
use crate::toolbox::{ContainerInfo, ToolboxRecord, ToolboxSpec, ToolboxState};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub managed: bool,
    pub state: ToolboxState,
    pub created: DateTime<Utc>,
    pub exec_sessions: usize,
}

impl FakeContainer {
    fn info(&self) -> ContainerInfo {
        ContainerInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            managed: self.managed,
            state: self.state,
            image: self.image.clone(),
            created: self.created,
            exec_sessions: self.exec_sessions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub id: String,
    pub command: Vec<String>,
    pub state_at_exec: ToolboxState,
}

#[derive(Debug, Default)]
struct FakeState {
    containers: Vec<FakeContainer>,
    images: BTreeSet<String>,
    next_id: u32,
    ticks: i64,
    create_calls: usize,
    start_calls: usize,
    unpause_calls: usize,
    list_calls: usize,
    inspect_calls: usize,
    execs: Vec<ExecCall>,
    exit_code: ExitCode,
}

pub struct FakeEngine {
    kind: EngineKind,
    state: RefCell<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            kind: EngineKind::Podman,
            state: RefCell::new(FakeState::default()),
        }
    }

    pub fn with_images(images: &[&str]) -> Self {
        let engine = Self::new();
        engine
            .state
            .borrow_mut()
            .images
            .extend(images.iter().map(ToString::to_string));
        engine
    }

    fn tick(state: &mut FakeState) -> DateTime<Utc> {
        state.ticks += 1;
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::seconds(state.ticks)
    }

    pub fn add_foreign(&self, name: &str, image: &str) {
        let mut state = self.state.borrow_mut();
        let created = Self::tick(&mut state);
        state.next_id += 1;
        let id = format!("foreign{:04}", state.next_id);
        state.containers.push(FakeContainer {
            id,
            name: name.to_string(),
            image: image.to_string(),
            managed: false,
            state: ToolboxState::Running,
            created,
            exec_sessions: 0,
        });
    }

    pub fn set_state(&self, name: &str, new_state: ToolboxState) {
        let mut state = self.state.borrow_mut();
        if let Some(container) = state.containers.iter_mut().find(|c| c.name == name) {
            container.state = new_state;
        }
    }

    pub fn set_exec_sessions(&self, name: &str, sessions: usize) {
        let mut state = self.state.borrow_mut();
        if let Some(container) = state.containers.iter_mut().find(|c| c.name == name) {
            container.exec_sessions = sessions;
        }
    }

    /// Simulates another process removing the container behind our back.
    pub fn drop_container(&self, name: &str) {
        self.state.borrow_mut().containers.retain(|c| c.name != name);
    }

    pub fn set_exit_code(&self, code: ExitCode) {
        self.state.borrow_mut().exit_code = code;
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.state.borrow().images.contains(image)
    }

    pub fn container_count(&self) -> usize {
        self.state.borrow().containers.len()
    }

    pub fn create_calls(&self) -> usize {
        self.state.borrow().create_calls
    }

    pub fn start_calls(&self) -> usize {
        self.state.borrow().start_calls
    }

    pub fn unpause_calls(&self) -> usize {
        self.state.borrow().unpause_calls
    }

    pub fn list_calls(&self) -> usize {
        self.state.borrow().list_calls
    }

    pub fn inspect_calls(&self) -> usize {
        self.state.borrow().inspect_calls
    }

    pub fn execs(&self) -> Vec<ExecCall> {
        self.state.borrow().execs.clone()
    }

    fn not_found(id: &str) -> ToolboxError {
        ToolboxError::ToolboxNotFound {
            name: id.to_string(),
        }
    }
}

impl Engine for FakeEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn endpoint(&self) -> Option<&str> {
        None
    }

    fn create_container(&self, spec: &ToolboxSpec) -> Result<ContainerId> {
        let mut state = self.state.borrow_mut();
        state.create_calls += 1;
        if !state.images.contains(&spec.image) {
            return Err(ToolboxError::ImageNotFound {
                image: spec.image.clone(),
                kind: self.kind,
                cause: "image not known".to_string(),
            });
        }
        if state.containers.iter().any(|c| c.name == spec.name) {
            return Err(ToolboxError::NameConflict {
                name: spec.name.clone(),
                kind: self.kind,
            });
        }
        let created = Self::tick(&mut state);
        state.next_id += 1;
        let id = format!("c{:04}", state.next_id);
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            managed: true,
            state: ToolboxState::Created,
            created,
            exec_sessions: 0,
        });
        Ok(id)
    }

    fn start_container(&self, id: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.start_calls += 1;
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Self::not_found(id))?;
        if container.state == ToolboxState::Paused {
            return Err(ToolboxError::Engine {
                kind: self.kind,
                cause: "cannot start a paused container, try unpause instead".to_string(),
            });
        }
        container.state = ToolboxState::Running;
        Ok(())
    }

    fn unpause_container(&self, id: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.unpause_calls += 1;
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Self::not_found(id))?;
        if container.state != ToolboxState::Paused {
            return Err(ToolboxError::Engine {
                kind: self.kind,
                cause: format!("container {id} is not paused"),
            });
        }
        container.state = ToolboxState::Running;
        Ok(())
    }

    fn exec_interactive(
        &self,
        id: &str,
        command: &[String],
        _tty: TtyConfig,
        _cancel: &CancelFlag,
    ) -> Result<ExitCode> {
        let mut state = self.state.borrow_mut();
        let container_state = state
            .containers
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.state)
            .ok_or_else(|| Self::not_found(id))?;
        if container_state != ToolboxState::Running {
            return Err(ToolboxError::Engine {
                kind: self.kind,
                cause: format!("container {id} is not running"),
            });
        }
        state.execs.push(ExecCall {
            id: id.to_string(),
            command: command.to_vec(),
            state_at_exec: container_state,
        });
        Ok(state.exit_code)
    }

    fn list_managed(&self) -> Result<Vec<ToolboxRecord>> {
        let mut state = self.state.borrow_mut();
        state.list_calls += 1;
        Ok(state
            .containers
            .iter()
            .filter(|c| c.managed)
            .map(|c| c.info().into_record())
            .collect())
    }

    fn inspect(&self, name_or_id: &str) -> Result<Option<ContainerInfo>> {
        let mut state = self.state.borrow_mut();
        state.inspect_calls += 1;
        // Same resolution order as the real engines: id, name, unique id prefix.
        let exact = state
            .containers
            .iter()
            .find(|c| c.id == name_or_id)
            .or_else(|| state.containers.iter().find(|c| c.name == name_or_id));
        if let Some(container) = exact {
            return Ok(Some(container.info()));
        }
        let mut by_prefix = state
            .containers
            .iter()
            .filter(|c| c.id.starts_with(name_or_id));
        Ok(match (by_prefix.next(), by_prefix.next()) {
            (Some(container), None) => Some(container.info()),
            _ => None,
        })
    }

    fn stop_and_remove(&self, id: &str, force: bool) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let index = state
            .containers
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| Self::not_found(id))?;
        let sessions = state.containers[index].exec_sessions;
        if sessions > 0 && !force {
            return Err(ToolboxError::ContainerBusy {
                id: id.to_string(),
                sessions,
            });
        }
        state.containers.remove(index);
        Ok(())
    }

    fn remove_image(&self, image: &str, force: bool) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let users: Vec<String> = state
            .containers
            .iter()
            .filter(|c| c.managed && c.image == image)
            .map(|c| c.name.clone())
            .collect();
        if !users.is_empty() && !force {
            return Err(ToolboxError::ImageInUse {
                image: image.to_string(),
                users,
            });
        }
        if !state.images.remove(image) {
            return Err(ToolboxError::ImageNotFound {
                image: image.to_string(),
                kind: self.kind,
                cause: "image not known".to_string(),
            });
        }
        Ok(())
    }
}
