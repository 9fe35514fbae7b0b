//! Disposable development containers ("toolboxes") on Docker or Podman.
//!
//! The binary in `main.rs` is a thin clap front end over
//! [`lifecycle::LifecycleManager`]; everything below it is usable as a library.

pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod toolbox;

pub use cancel::CancelFlag;
pub use config::{Config, CreateOverrides};
pub use engine::{Engine, EngineKind, EnginePreference, EngineSelector, SystemRunner, TtyConfig};
pub use error::{ErrorDetails, Result, ToolboxError};
pub use lifecycle::{CreateOutcome, CreateReport, LifecycleManager};
pub use registry::ToolboxRegistry;
pub use toolbox::{ToolboxRecord, ToolboxSpec, ToolboxState};
