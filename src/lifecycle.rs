//! Toolbox lifecycle: `Absent -> Created -> Running -> Stopped -> Absent`.
//!
//! Every operation is keyed by toolbox name. Destructive operations consult
//! the engine immediately before acting instead of trusting the registry
//! cache, because other processes may be working on the same toolbox.

use std::rc::Rc;

use serde::Serialize;
use tracing::{info, warn};

use crate::cancel::CancelFlag;
use crate::engine::{Engine, EngineKind, ExitCode, TtyConfig};
use crate::error::{Result, ToolboxError};
use crate::registry::{Lookup, ToolboxRegistry};
use crate::toolbox::{validate_name, ToolboxRecord, ToolboxSpec, ToolboxState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
    Resumed,
    Recreated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateReport {
    #[serde(flatten)]
    pub record: ToolboxRecord,
    pub outcome: CreateOutcome,
}

/// Engine errors speak in container ids; callers get toolbox names.
fn for_toolbox(name: &str) -> impl Fn(ToolboxError) -> ToolboxError + '_ {
    move |err| match err {
        ToolboxError::ToolboxNotFound { .. } => ToolboxError::ToolboxNotFound {
            name: name.to_string(),
        },
        ToolboxError::ContainerBusy { sessions, .. } => ToolboxError::ToolboxBusy {
            name: name.to_string(),
            reason: format!("{sessions} active exec session(s)"),
        },
        other => other,
    }
}

pub struct LifecycleManager {
    engine: Rc<dyn Engine>,
    registry: ToolboxRegistry,
    shell: String,
}

impl LifecycleManager {
    pub fn new(engine: Rc<dyn Engine>, shell: impl Into<String>) -> Self {
        Self {
            engine,
            registry: ToolboxRegistry::new(),
            shell: shell.into(),
        }
    }

    pub fn engine_kind(&self) -> EngineKind {
        self.engine.kind()
    }

    pub fn registry(&self) -> &ToolboxRegistry {
        &self.registry
    }

    pub fn create(&mut self, spec: &ToolboxSpec, recreate: bool) -> Result<CreateReport> {
        spec.validate()?;
        let name = spec.name.as_str();
        let engine = Rc::clone(&self.engine);

        let outcome = match self.registry.lookup_fresh(engine.as_ref(), name)? {
            Lookup::Foreign { id } => {
                warn!(name, id = %id, "name held by an unmanaged container");
                return Err(ToolboxError::NameConflict {
                    name: name.to_string(),
                    kind: engine.kind(),
                });
            }
            Lookup::Managed(record) if record.state == ToolboxState::RemovePending => {
                return Err(ToolboxError::ToolboxBusy {
                    name: name.to_string(),
                    reason: "a removal is in progress".to_string(),
                });
            }
            Lookup::Managed(record) if recreate => {
                info!(name, id = %record.id, "removing existing toolbox for recreate");
                engine
                    .stop_and_remove(&record.id, false)
                    .map_err(for_toolbox(name))?;
                self.registry.invalidate(name);
                self.provision(spec)?;
                CreateOutcome::Recreated
            }
            Lookup::Managed(record) => {
                if record.image != spec.image {
                    warn!(
                        name,
                        existing = %record.image,
                        requested = %spec.image,
                        "toolbox exists with a different image; pass --recreate to replace it"
                    );
                }
                match record.state {
                    ToolboxState::Running => CreateOutcome::AlreadyExists,
                    ToolboxState::Created => {
                        engine.start_container(&record.id).map_err(for_toolbox(name))?;
                        CreateOutcome::AlreadyExists
                    }
                    ToolboxState::Paused => {
                        info!(name, "unpausing toolbox");
                        engine.unpause_container(&record.id).map_err(for_toolbox(name))?;
                        CreateOutcome::Resumed
                    }
                    _ => {
                        info!(name, state = %record.state, "resuming stopped toolbox");
                        engine.start_container(&record.id).map_err(for_toolbox(name))?;
                        CreateOutcome::Resumed
                    }
                }
            }
            Lookup::Absent => {
                self.provision(spec)?;
                CreateOutcome::Created
            }
        };

        self.registry.invalidate(name);
        let record = self.current(name)?;
        info!(name, id = %record.id, ?outcome, "toolbox ready");
        Ok(CreateReport { record, outcome })
    }

    fn provision(&mut self, spec: &ToolboxSpec) -> Result<()> {
        let id = self.engine.create_container(spec)?;
        self.engine
            .start_container(&id)
            .map_err(for_toolbox(&spec.name))?;
        Ok(())
    }

    fn current(&mut self, name: &str) -> Result<ToolboxRecord> {
        match self.registry.lookup_fresh(self.engine.as_ref(), name)? {
            Lookup::Managed(record) => Ok(record),
            Lookup::Foreign { .. } | Lookup::Absent => Err(ToolboxError::ToolboxNotFound {
                name: name.to_string(),
            }),
        }
    }

    fn ensure_running(&mut self, name: &str) -> Result<ToolboxRecord> {
        let record = self.registry.resolve(self.engine.as_ref(), name)?;
        match record.state {
            ToolboxState::Running => Ok(record),
            ToolboxState::RemovePending => Err(ToolboxError::ToolboxNotFound {
                name: name.to_string(),
            }),
            ToolboxState::Paused => {
                info!(name, "unpausing toolbox before attach");
                self.engine
                    .unpause_container(&record.id)
                    .map_err(for_toolbox(name))?;
                self.registry.invalidate(name);
                self.current(name)
            }
            state => {
                info!(name, %state, "starting toolbox before attach");
                self.engine
                    .start_container(&record.id)
                    .map_err(for_toolbox(name))?;
                self.registry.invalidate(name);
                self.current(name)
            }
        }
    }

    pub fn enter(&mut self, name: &str, tty: TtyConfig, cancel: &CancelFlag) -> Result<ExitCode> {
        validate_name(name)?;
        let command = vec![self.shell.clone(), "-l".to_string()];
        self.attach(name, &command, tty, cancel)
    }

    pub fn run(
        &mut self,
        name: &str,
        command: &[String],
        tty: TtyConfig,
        cancel: &CancelFlag,
    ) -> Result<ExitCode> {
        validate_name(name)?;
        if command.is_empty() {
            return Err(ToolboxError::InvalidInput(
                "run needs a command to execute".to_string(),
            ));
        }
        self.attach(name, command, tty, cancel)
    }

    fn attach(
        &mut self,
        name: &str,
        command: &[String],
        tty: TtyConfig,
        cancel: &CancelFlag,
    ) -> Result<ExitCode> {
        let record = self.ensure_running(name)?;
        let code = self
            .engine
            .exec_interactive(&record.id, command, tty, cancel)
            .map_err(for_toolbox(name))?;
        info!(name, code, "session ended");
        Ok(code)
    }

    pub fn list(&mut self) -> Result<Vec<ToolboxRecord>> {
        self.registry.refresh(self.engine.as_ref())
    }

    pub fn remove(&mut self, name: &str, force: bool) -> Result<()> {
        validate_name(name)?;
        let record = match self.registry.lookup_fresh(self.engine.as_ref(), name)? {
            Lookup::Managed(record) => record,
            Lookup::Foreign { .. } | Lookup::Absent => {
                return Err(ToolboxError::ToolboxNotFound {
                    name: name.to_string(),
                })
            }
        };
        let result = self
            .engine
            .stop_and_remove(&record.id, force)
            .map_err(for_toolbox(name));
        self.registry.invalidate(name);
        result?;
        info!(name, id = %record.id, force, "toolbox removed");
        Ok(())
    }

    pub fn remove_image(&mut self, image: &str, force: bool) -> Result<()> {
        if image.trim().is_empty() {
            return Err(ToolboxError::InvalidInput("image reference is empty".to_string()));
        }
        if !force {
            let users: Vec<String> = self
                .registry
                .refresh(self.engine.as_ref())?
                .into_iter()
                .filter(|record| record.image == image)
                .map(|record| record.name)
                .collect();
            if !users.is_empty() {
                return Err(ToolboxError::ImageInUse {
                    image: image.to_string(),
                    users,
                });
            }
        }
        self.engine.remove_image(image, force)?;
        info!(image, force, "image removed");
        Ok(())
    }
}
