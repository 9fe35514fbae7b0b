use std::cell::OnceCell;
use std::rc::Rc;

use tracing::{debug, info, warn};

use super::cli::{CliEngine, Dialect};
use super::docker::Docker;
use super::podman::Podman;
use super::runner::CommandRunner;
use super::{Engine, EngineKind, EngineOptions, EnginePreference};
use crate::error::{ProbeFailure, Result, ToolboxError};

/// Picks the engine for this process. The first successful selection is kept
/// for the lifetime of the selector; failures are not cached.
pub struct EngineSelector<R> {
    runner: Rc<R>,
    options: EngineOptions,
    selected: OnceCell<Rc<dyn Engine>>,
}

impl<R: CommandRunner + 'static> EngineSelector<R> {
    pub fn new(runner: R, options: EngineOptions) -> Self {
        Self {
            runner: Rc::new(runner),
            options,
            selected: OnceCell::new(),
        }
    }

    pub fn select(&self, preference: EnginePreference) -> Result<Rc<dyn Engine>> {
        if let Some(engine) = self.selected.get() {
            debug!(engine = %engine.kind(), %preference, "reusing selected engine");
            return Ok(Rc::clone(engine));
        }

        let mut tried = Vec::new();
        for kind in preference.candidates() {
            match self.probe(kind) {
                Ok(engine) => {
                    let engine = Rc::clone(self.selected.get_or_init(|| engine));
                    return Ok(engine);
                }
                Err(cause) => {
                    warn!(engine = %kind, %cause, "engine probe failed");
                    tried.push(ProbeFailure { kind, cause });
                }
            }
        }

        match preference {
            EnginePreference::Only(kind) => {
                let cause = tried
                    .pop()
                    .map(|failure| failure.cause)
                    .unwrap_or_else(|| "not probed".to_string());
                Err(ToolboxError::EngineUnavailable { kind, cause })
            }
            EnginePreference::Auto => Err(ToolboxError::NoEngineAvailable { tried }),
        }
    }

    fn probe(&self, kind: EngineKind) -> std::result::Result<Rc<dyn Engine>, String> {
        match kind {
            EngineKind::Docker => self.bind::<Docker>(),
            EngineKind::Podman => self.bind::<Podman>(),
        }
    }

    fn bind<D: Dialect + 'static>(&self) -> std::result::Result<Rc<dyn Engine>, String> {
        let binary = D::KIND.binary();
        let program = self
            .runner
            .locate(binary)
            .ok_or_else(|| format!("{binary} not found on PATH"))?;
        let endpoint = self
            .options
            .endpoints
            .for_kind(D::KIND)
            .map(ToString::to_string);
        let engine = CliEngine::<D, R>::new(
            program,
            endpoint,
            self.options.keepalive.clone(),
            Rc::clone(&self.runner),
        );
        let version = engine.liveness(self.options.probe_timeout)?;
        info!(
            engine = %D::KIND,
            program = %engine.program().display(),
            endpoint = engine.endpoint().unwrap_or("default"),
            %version,
            "engine selected"
        );
        Ok(Rc::new(engine))
    }
}
