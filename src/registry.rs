//! Process-local view of the toolboxes the engine knows about.
//!
//! The engine is the only durable store; this cache is advisory and is
//! bypassed (`lookup_fresh`, `refresh`) whenever a decision mutates state.

use std::collections::HashMap;

use tracing::debug;

use crate::engine::Engine;
use crate::error::{Result, ToolboxError};
use crate::toolbox::ToolboxRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Managed(ToolboxRecord),
    /// The name belongs to a container this tool did not create.
    Foreign { id: String },
    Absent,
}

#[derive(Debug, Default)]
pub struct ToolboxRegistry {
    cache: HashMap<String, ToolboxRecord>,
}

impl ToolboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self, name: &str) -> Option<&ToolboxRecord> {
        self.cache.get(name)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn resolve(&mut self, engine: &dyn Engine, name: &str) -> Result<ToolboxRecord> {
        if let Some(record) = self.cache.get(name) {
            debug!(name, state = %record.state, "registry hit");
            return Ok(record.clone());
        }
        match self.lookup_fresh(engine, name)? {
            Lookup::Managed(record) => Ok(record),
            Lookup::Foreign { .. } | Lookup::Absent => Err(ToolboxError::ToolboxNotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Engines resolve an inspect argument as an id prefix too; anything
    /// whose name is not exactly `name` counts as absent.
    pub fn lookup_fresh(&mut self, engine: &dyn Engine, name: &str) -> Result<Lookup> {
        let lookup = match engine.inspect(name)? {
            Some(info) if info.name != name => {
                debug!(name, matched = %info.name, id = %info.id, "inspect matched another container by id prefix");
                Lookup::Absent
            }
            Some(info) if info.managed => Lookup::Managed(info.into_record()),
            Some(info) => Lookup::Foreign { id: info.id },
            None => Lookup::Absent,
        };
        match &lookup {
            Lookup::Managed(record) => {
                self.cache.insert(name.to_string(), record.clone());
            }
            Lookup::Foreign { .. } | Lookup::Absent => {
                self.cache.remove(name);
            }
        }
        Ok(lookup)
    }

    /// Full re-list. Replaces the cache and returns records oldest first.
    pub fn refresh(&mut self, engine: &dyn Engine) -> Result<Vec<ToolboxRecord>> {
        let mut records = engine.list_managed()?;
        records.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
        self.cache = records
            .iter()
            .map(|record| (record.name.clone(), record.clone()))
            .collect();
        debug!(count = records.len(), "registry refreshed");
        Ok(records)
    }

    pub fn invalidate(&mut self, name: &str) {
        if self.cache.remove(name).is_some() {
            debug!(name, "registry entry invalidated");
        }
    }
}
