use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::cli::{Dialect, PsEntry};
use super::EngineKind;

pub struct Docker;

#[derive(Debug, Deserialize)]
struct DockerPsRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Labels", default)]
    labels: String,
    #[serde(rename = "CreatedAt", default)]
    created_at: String,
}

/// `docker ps` renders labels as `k=v,k=v`.
fn parse_label_string(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// `docker ps` renders creation time as `2024-03-01 10:20:30 +0100 CET`.
fn parse_created_at(raw: &str) -> Result<DateTime<Utc>, String> {
    let stamp: Vec<&str> = raw.split_whitespace().take(3).collect();
    let stamp = stamp.join(" ");
    DateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S %z")
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| format!("bad CreatedAt '{raw}': {err}"))
}

impl Dialect for Docker {
    const KIND: EngineKind = EngineKind::Docker;

    fn endpoint_args(endpoint: &str) -> Vec<String> {
        vec!["-H".to_string(), endpoint.to_string()]
    }

    fn liveness_args() -> Vec<String> {
        vec![
            "version".to_string(),
            "--format".to_string(),
            "{{.Server.Version}}".to_string(),
        ]
    }

    fn ps_format() -> &'static str {
        "{{json .}}"
    }

    fn parse_ps(stdout: &str) -> Result<Vec<PsEntry>, String> {
        let mut entries = Vec::new();
        for line in stdout.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let row: DockerPsRow = serde_json::from_str(line)
                .map_err(|err| format!("unexpected docker ps output: {err}"))?;
            entries.push(PsEntry {
                id: row.id,
                names: row
                    .names
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(ToString::to_string)
                    .collect(),
                image: row.image,
                state: row.state,
                labels: parse_label_string(&row.labels),
                created: parse_created_at(&row.created_at)?,
            });
        }
        Ok(entries)
    }
}
