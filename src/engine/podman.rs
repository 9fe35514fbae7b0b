use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::cli::{Dialect, PsEntry};
use super::EngineKind;
use crate::toolbox::ToolboxSpec;

pub struct Podman;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PodmanPsRow {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    image: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
    /// Unix seconds.
    #[serde(default)]
    created: i64,
}

impl Dialect for Podman {
    const KIND: EngineKind = EngineKind::Podman;

    fn endpoint_args(endpoint: &str) -> Vec<String> {
        vec!["--url".to_string(), endpoint.to_string()]
    }

    fn liveness_args() -> Vec<String> {
        vec![
            "info".to_string(),
            "--format".to_string(),
            "{{.Version.Version}}".to_string(),
        ]
    }

    fn ps_format() -> &'static str {
        "json"
    }

    fn parse_ps(stdout: &str) -> Result<Vec<PsEntry>, String> {
        let trimmed = stdout.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Vec::new());
        }
        let rows: Vec<PodmanPsRow> = serde_json::from_str(trimmed)
            .map_err(|err| format!("unexpected podman ps output: {err}"))?;
        rows.into_iter()
            .map(|row| {
                let created = DateTime::<Utc>::from_timestamp(row.created, 0)
                    .ok_or_else(|| format!("bad Created timestamp {}", row.created))?;
                Ok(PsEntry {
                    id: row.id,
                    names: row.names,
                    image: row.image,
                    state: row.state,
                    labels: row.labels.unwrap_or_default(),
                    created,
                })
            })
            .collect()
    }

    /// Bind mounts of home directories would otherwise need relabelling on
    /// SELinux hosts.
    fn extra_create_args(_spec: &ToolboxSpec) -> Vec<String> {
        vec!["--security-opt".to_string(), "label=disable".to_string()]
    }
}
