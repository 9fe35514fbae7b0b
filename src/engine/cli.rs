use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::classify::{classify, Failure};
use super::runner::{AttachOutcome, CommandOutput, CommandRunner, ProbeOutcome, CANCELLED_EXIT_CODE};
use super::{ContainerId, Engine, EngineKind, ExitCode, TtyConfig};
use crate::cancel::CancelFlag;
use crate::error::{Result, ToolboxError};
use crate::toolbox::{
    ContainerInfo, ToolboxRecord, ToolboxSpec, ToolboxState, LABEL_IMAGE, LABEL_MANAGED,
    LABEL_NAME,
};

/// One row of `ps` output, normalized across engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsEntry {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub state: String,
    pub labels: BTreeMap<String, String>,
    pub created: DateTime<Utc>,
}

impl PsEntry {
    fn is_managed(&self) -> bool {
        self.labels.get(LABEL_MANAGED).map(String::as_str) == Some("true")
    }

    fn into_record(self) -> ToolboxRecord {
        let name = self
            .labels
            .get(LABEL_NAME)
            .cloned()
            .or_else(|| self.names.first().cloned())
            .unwrap_or_else(|| self.id.clone());
        let image = self
            .labels
            .get(LABEL_IMAGE)
            .cloned()
            .unwrap_or(self.image);
        ToolboxRecord {
            name: name.trim_start_matches('/').to_string(),
            id: self.id,
            state: ToolboxState::from_engine_status(&self.state),
            image,
            created: self.created,
        }
    }
}

/// What distinguishes one engine CLI from another.
pub trait Dialect {
    const KIND: EngineKind;

    fn endpoint_args(endpoint: &str) -> Vec<String>;

    fn liveness_args() -> Vec<String>;

    /// `--format` value for `ps` that [`Dialect::parse_ps`] understands.
    fn ps_format() -> &'static str;

    fn parse_ps(stdout: &str) -> std::result::Result<Vec<PsEntry>, String>;

    fn extra_create_args(_spec: &ToolboxSpec) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct InspectState {
    status: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct InspectConfig {
    image: String,
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    #[serde(default)]
    name: String,
    created: String,
    #[serde(default)]
    state: InspectState,
    #[serde(default)]
    config: InspectConfig,
    #[serde(default, rename = "ExecIDs")]
    exec_ids: Option<Vec<String>>,
}

/// Both engines emit `container inspect` as a JSON array of the same shape
/// for the fields used here.
pub fn parse_inspect(stdout: &str) -> std::result::Result<Option<ContainerInfo>, String> {
    let entries: Vec<InspectEntry> =
        serde_json::from_str(stdout.trim()).map_err(|err| format!("unexpected inspect output: {err}"))?;
    let Some(entry) = entries.into_iter().next() else {
        return Ok(None);
    };
    let created = DateTime::parse_from_rfc3339(&entry.created)
        .map_err(|err| format!("bad creation time '{}': {err}", entry.created))?
        .with_timezone(&Utc);
    let labels = entry.config.labels.unwrap_or_default();
    let managed = labels.get(LABEL_MANAGED).map(String::as_str) == Some("true");
    let name = labels
        .get(LABEL_NAME)
        .filter(|_| managed)
        .cloned()
        .unwrap_or_else(|| entry.name.trim_start_matches('/').to_string());
    let image = labels
        .get(LABEL_IMAGE)
        .filter(|_| managed)
        .cloned()
        .unwrap_or(entry.config.image);
    Ok(Some(ContainerInfo {
        id: entry.id,
        name,
        managed,
        state: ToolboxState::from_engine_status(&entry.state.status),
        image,
        created,
        exec_sessions: entry.exec_ids.map(|ids| ids.len()).unwrap_or(0),
    }))
}

struct Failed {
    failure: Failure,
    message: String,
}

fn render_command(program: &Path, args: &[String]) -> String {
    fn shell_quote(part: &str) -> String {
        if part.is_empty() {
            return "\"\"".to_string();
        }
        if part.chars().any(|c| c.is_whitespace()) {
            return format!("\"{}\"", part.replace('"', "\\\""));
        }
        part.to_string()
    }
    let binary = program
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| program.display().to_string());
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(binary);
    parts.extend(args.iter().map(|arg| shell_quote(arg)));
    parts.join(" ")
}

fn to_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(ToString::to_string).collect()
}

pub struct CliEngine<D, R> {
    program: PathBuf,
    endpoint: Option<String>,
    keepalive: Vec<String>,
    runner: Rc<R>,
    _dialect: PhantomData<D>,
}

impl<D: Dialect, R: CommandRunner> CliEngine<D, R> {
    pub fn new(
        program: PathBuf,
        endpoint: Option<String>,
        keepalive: Vec<String>,
        runner: Rc<R>,
    ) -> Self {
        Self {
            program,
            endpoint,
            keepalive,
            runner,
            _dialect: PhantomData,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn args(&self, rest: Vec<String>) -> Vec<String> {
        let mut args = match &self.endpoint {
            Some(endpoint) => D::endpoint_args(endpoint),
            None => Vec::new(),
        };
        args.extend(rest);
        args
    }

    /// Liveness query bounded by `timeout`. Returns the reported server
    /// version, or a human-readable cause.
    pub fn liveness(&self, timeout: Duration) -> std::result::Result<String, String> {
        let args = self.args(D::liveness_args());
        let command = render_command(&self.program, &args);
        debug!(engine = %D::KIND, %command, "probing engine");
        match self.runner.probe(&self.program, &args, timeout) {
            Err(err) => Err(format!("failed to run `{command}`: {err}")),
            Ok(ProbeOutcome::TimedOut) => Err(format!(
                "liveness probe timed out after {} ms",
                timeout.as_millis()
            )),
            Ok(ProbeOutcome::Responded(output)) if output.success() => {
                Ok(output.stdout_text().trim().to_string())
            }
            Ok(ProbeOutcome::Responded(output)) => {
                let stderr = output.stderr_text();
                let first_line = stderr.lines().next().unwrap_or("").trim();
                if first_line.is_empty() {
                    Err(format!("`{command}` exited with status {}", output.status_code))
                } else {
                    Err(first_line.to_string())
                }
            }
        }
    }

    fn call(&self, rest: Vec<String>) -> std::result::Result<CommandOutput, Failed> {
        let args = self.args(rest);
        let command = render_command(&self.program, &args);
        debug!(engine = %D::KIND, %command, "running engine command");
        let output = self.runner.run(&self.program, &args).map_err(|err| Failed {
            failure: Failure::DaemonUnreachable,
            message: format!("failed to run `{command}`: {err}"),
        })?;
        if output.success() {
            return Ok(output);
        }
        let stderr = output.stderr_text();
        let mut message = format!(
            "command failed with status {} while running `{}`",
            output.status_code, command
        );
        if !stderr.is_empty() {
            message = format!("{message}: {stderr}");
        }
        Err(Failed {
            failure: classify(&stderr),
            message,
        })
    }

    /// Read-only calls get one retry on transport failures.
    fn query(&self, rest: Vec<String>) -> std::result::Result<CommandOutput, Failed> {
        match self.call(rest.clone()) {
            Err(failed) if failed.failure.is_transport() => {
                warn!(engine = %D::KIND, error = %failed.message, "transport failure, retrying once");
                self.call(rest)
            }
            other => other,
        }
    }

    fn to_error(&self, failed: Failed) -> ToolboxError {
        if failed.failure.is_transport() {
            ToolboxError::Transport {
                kind: D::KIND,
                cause: failed.message,
            }
        } else {
            ToolboxError::Engine {
                kind: D::KIND,
                cause: failed.message,
            }
        }
    }

    fn parse_error(&self, cause: String) -> ToolboxError {
        ToolboxError::Engine {
            kind: D::KIND,
            cause,
        }
    }

    pub fn create_args(&self, spec: &ToolboxSpec) -> Vec<String> {
        let mut args = to_args(&["create", "--name", &spec.name, "--hostname", &spec.name, "--init"]);
        for (key, value) in spec.labels() {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }
        for mount in &spec.mounts {
            args.push("--volume".to_string());
            args.push(mount.to_volume_arg());
        }
        for (key, value) in &spec.env {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        if let Some(workdir) = &spec.workdir {
            args.push("--workdir".to_string());
            args.push(workdir.clone());
        }
        args.extend(D::extra_create_args(spec));
        let mut keepalive = self.keepalive.iter();
        if let Some(entrypoint) = keepalive.next() {
            args.push("--entrypoint".to_string());
            args.push(entrypoint.clone());
        }
        args.push(spec.image.clone());
        args.extend(keepalive.cloned());
        args
    }

    fn ps(&self, filters: &[String]) -> std::result::Result<Vec<PsEntry>, Failed> {
        let mut rest = to_args(&["ps", "--all", "--no-trunc"]);
        for filter in filters {
            rest.push("--filter".to_string());
            rest.push(filter.clone());
        }
        rest.push("--format".to_string());
        rest.push(D::ps_format().to_string());
        let output = self.query(rest)?;
        D::parse_ps(&output.stdout_text()).map_err(|message| Failed {
            failure: Failure::Other,
            message,
        })
    }

    fn managed_filter() -> String {
        format!("label={LABEL_MANAGED}=true")
    }
}

impl<D: Dialect, R: CommandRunner> Engine for CliEngine<D, R> {
    fn kind(&self) -> EngineKind {
        D::KIND
    }

    fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    fn create_container(&self, spec: &ToolboxSpec) -> Result<ContainerId> {
        let output = self.call(self.create_args(spec)).map_err(|failed| match failed.failure {
            Failure::NoSuchImage => ToolboxError::ImageNotFound {
                image: spec.image.clone(),
                kind: D::KIND,
                cause: failed.message,
            },
            Failure::NameInUse => ToolboxError::NameConflict {
                name: spec.name.clone(),
                kind: D::KIND,
            },
            _ => self.to_error(failed),
        })?;
        let stdout = output.stdout_text();
        let id = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .ok_or_else(|| self.parse_error("create did not report a container id".to_string()))?;
        info!(engine = %D::KIND, name = %spec.name, id, "container created");
        Ok(id.to_string())
    }

    fn start_container(&self, id: &str) -> Result<()> {
        self.call(to_args(&["start", id]))
            .map_err(|failed| match failed.failure {
                Failure::NoSuchContainer => ToolboxError::ToolboxNotFound {
                    name: id.to_string(),
                },
                _ => self.to_error(failed),
            })?;
        debug!(engine = %D::KIND, id, "container started");
        Ok(())
    }

    fn unpause_container(&self, id: &str) -> Result<()> {
        self.call(to_args(&["unpause", id]))
            .map_err(|failed| match failed.failure {
                Failure::NoSuchContainer => ToolboxError::ToolboxNotFound {
                    name: id.to_string(),
                },
                _ => self.to_error(failed),
            })?;
        debug!(engine = %D::KIND, id, "container unpaused");
        Ok(())
    }

    fn exec_interactive(
        &self,
        id: &str,
        command: &[String],
        tty: TtyConfig,
        cancel: &CancelFlag,
    ) -> Result<ExitCode> {
        let mut rest = vec!["exec".to_string()];
        if tty.interactive {
            rest.push("--interactive".to_string());
        }
        if tty.tty {
            rest.push("--tty".to_string());
        }
        rest.push(id.to_string());
        rest.extend(command.iter().cloned());
        let args = self.args(rest);
        let rendered = render_command(&self.program, &args);
        debug!(engine = %D::KIND, command = %rendered, "attaching");
        let outcome = self
            .runner
            .attach(&self.program, &args, cancel)
            .map_err(|err| ToolboxError::Transport {
                kind: D::KIND,
                cause: format!("failed to run `{rendered}`: {err}"),
            })?;
        match outcome {
            AttachOutcome::Exited(code) => Ok(code),
            AttachOutcome::Cancelled => {
                info!(engine = %D::KIND, id, "session detached, container left running");
                Ok(CANCELLED_EXIT_CODE)
            }
        }
    }

    fn list_managed(&self) -> Result<Vec<ToolboxRecord>> {
        let entries = self
            .ps(&[Self::managed_filter()])
            .map_err(|failed| self.to_error(failed))?;
        Ok(entries
            .into_iter()
            .filter(PsEntry::is_managed)
            .map(PsEntry::into_record)
            .collect())
    }

    fn inspect(&self, name_or_id: &str) -> Result<Option<ContainerInfo>> {
        match self.query(to_args(&["container", "inspect", name_or_id])) {
            Ok(output) => parse_inspect(&output.stdout_text()).map_err(|cause| self.parse_error(cause)),
            Err(failed) if failed.failure == Failure::NoSuchContainer => Ok(None),
            Err(failed) => Err(self.to_error(failed)),
        }
    }

    fn stop_and_remove(&self, id: &str, force: bool) -> Result<()> {
        let not_found = || ToolboxError::ToolboxNotFound {
            name: id.to_string(),
        };
        if force {
            self.call(to_args(&["rm", "--force", id]))
                .map_err(|failed| match failed.failure {
                    Failure::NoSuchContainer => not_found(),
                    _ => self.to_error(failed),
                })?;
            info!(engine = %D::KIND, id, "container force-removed");
            return Ok(());
        }

        let info = self.inspect(id)?.ok_or_else(not_found)?;
        if info.exec_sessions > 0 {
            return Err(ToolboxError::ContainerBusy {
                id: id.to_string(),
                sessions: info.exec_sessions,
            });
        }
        if !matches!(info.state, ToolboxState::Stopped | ToolboxState::Created) {
            match self.call(to_args(&["stop", id])) {
                Ok(_) => debug!(engine = %D::KIND, id, "container stopped"),
                Err(failed) if failed.failure == Failure::NotRunning => {}
                Err(failed) if failed.failure == Failure::NoSuchContainer => return Err(not_found()),
                Err(failed) => return Err(self.to_error(failed)),
            }
        }
        self.call(to_args(&["rm", id]))
            .map_err(|failed| match failed.failure {
                Failure::NoSuchContainer => not_found(),
                _ => self.to_error(failed),
            })?;
        info!(engine = %D::KIND, id, "container removed");
        Ok(())
    }

    fn remove_image(&self, image: &str, force: bool) -> Result<()> {
        if !force {
            let mut users: Vec<String> = self
                .list_managed()?
                .into_iter()
                .filter(|record| record.image == image)
                .map(|record| record.name)
                .collect();
            let ancestors = match self.ps(&[Self::managed_filter(), format!("ancestor={image}")]) {
                Ok(entries) => entries,
                Err(failed) if failed.failure == Failure::NoSuchImage => Vec::new(),
                Err(failed) => return Err(self.to_error(failed)),
            };
            for entry in ancestors.into_iter().filter(PsEntry::is_managed) {
                let name = entry.into_record().name;
                if !users.contains(&name) {
                    users.push(name);
                }
            }
            if !users.is_empty() {
                return Err(ToolboxError::ImageInUse {
                    image: image.to_string(),
                    users,
                });
            }
        }

        let mut rest = vec!["rmi".to_string()];
        if force {
            rest.push("--force".to_string());
        }
        rest.push(image.to_string());
        self.call(rest).map_err(|failed| match failed.failure {
            Failure::NoSuchImage => ToolboxError::ImageNotFound {
                image: image.to_string(),
                kind: D::KIND,
                cause: failed.message,
            },
            Failure::ImageInUse => ToolboxError::ImageInUse {
                image: image.to_string(),
                users: vec!["containers outside opencode-toolbox".to_string()],
            },
            _ => self.to_error(failed),
        })?;
        info!(engine = %D::KIND, image, "image removed");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{fail, ok, MockRunner};
    use super::*;
    use crate::engine::docker::Docker;
    use crate::toolbox::Mount;

    const INSPECT_RUNNING: &str = r#"[{
        "Id": "4f1c0ffee",
        "Name": "/dev",
        "Created": "2024-03-01T10:20:30.123456789Z",
        "State": {"Status": "running"},
        "Config": {
            "Image": "alpine:3.19",
            "Labels": {"toolbox.managed": "true", "toolbox.name": "dev", "toolbox.image": "alpine:3.19"}
        },
        "ExecIDs": ["e1"]
    }]"#;

    fn engine(runner: &Rc<MockRunner>) -> CliEngine<Docker, MockRunner> {
        CliEngine::new(
            PathBuf::from("/usr/bin/docker"),
            None,
            vec!["sleep".to_string(), "infinity".to_string()],
            Rc::clone(runner),
        )
    }

    #[test]
    fn inspect_parses_managed_container() {
        let info = parse_inspect(INSPECT_RUNNING).unwrap().unwrap();
        assert_eq!(info.id, "4f1c0ffee");
        assert_eq!(info.name, "dev");
        assert!(info.managed);
        assert_eq!(info.state, ToolboxState::Running);
        assert_eq!(info.image, "alpine:3.19");
        assert_eq!(info.exec_sessions, 1);
        assert_eq!(info.created.to_rfc3339(), "2024-03-01T10:20:30.123456789+00:00");
    }

    #[test]
    fn inspect_parses_foreign_container_with_null_fields() {
        let json = r#"[{"Id":"abc","Name":"/web","Created":"2024-03-01T10:20:30+01:00",
            "State":{"Status":"exited"},"Config":{"Image":"nginx","Labels":null},"ExecIDs":null}]"#;
        let info = parse_inspect(json).unwrap().unwrap();
        assert!(!info.managed);
        assert_eq!(info.name, "web");
        assert_eq!(info.image, "nginx");
        assert_eq!(info.state, ToolboxState::Stopped);
        assert_eq!(info.exec_sessions, 0);
        assert!(parse_inspect("[]").unwrap().is_none());
        assert!(parse_inspect("not json").is_err());
    }

    #[test]
    fn create_args_carry_labels_mounts_env_and_keepalive() {
        let runner = Rc::new(MockRunner::default());
        let mut spec = ToolboxSpec::new("dev", "alpine:3.19");
        spec.mounts.push(Mount::parse("/srv/src:/src:ro").unwrap());
        spec.env.insert("EDITOR".to_string(), "vim".to_string());
        spec.workdir = Some("/src".to_string());
        let args = engine(&runner).create_args(&spec);
        let joined = args.join(" ");
        assert!(joined.starts_with("create --name dev --hostname dev --init"));
        assert!(joined.contains("--label toolbox.managed=true"));
        assert!(joined.contains("--label toolbox.name=dev"));
        assert!(joined.contains("--label toolbox.image=alpine:3.19"));
        assert!(joined.contains("--volume /srv/src:/src:ro"));
        assert!(joined.contains("--env EDITOR=vim"));
        assert!(joined.contains("--workdir /src"));
        assert!(joined.ends_with("--entrypoint sleep alpine:3.19 infinity"));
    }

    #[test]
    fn create_returns_reported_id() {
        let runner = Rc::new(MockRunner::default());
        runner.push_output(ok("4f1c0ffee\n"));
        let id = engine(&runner)
            .create_container(&ToolboxSpec::new("dev", "alpine:3.19"))
            .unwrap();
        assert_eq!(id, "4f1c0ffee");
    }

    #[test]
    fn create_classifies_missing_image_and_name_conflict() {
        let runner = Rc::new(MockRunner::default());
        runner.push_output(fail(
            125,
            "Unable to find image 'nope:1' locally\ndocker: Error response from daemon: manifest unknown.",
        ));
        runner.push_output(fail(
            125,
            "docker: Error response from daemon: Conflict. The container name \"/dev\" is already in use by container \"abc\".",
        ));
        let engine = engine(&runner);

        let err = engine
            .create_container(&ToolboxSpec::new("dev", "nope:1"))
            .unwrap_err();
        assert!(matches!(err, ToolboxError::ImageNotFound { ref image, .. } if image == "nope:1"));

        let err = engine
            .create_container(&ToolboxSpec::new("dev", "alpine:3.19"))
            .unwrap_err();
        assert!(matches!(err, ToolboxError::NameConflict { ref name, kind: EngineKind::Docker } if name == "dev"));
    }

    #[test]
    fn endpoint_args_lead_every_command() {
        let runner = Rc::new(MockRunner::default());
        let engine: CliEngine<Docker, MockRunner> = CliEngine::new(
            PathBuf::from("/usr/bin/docker"),
            Some("tcp://10.0.0.5:2375".to_string()),
            vec!["sleep".to_string(), "infinity".to_string()],
            Rc::clone(&runner),
        );
        engine.start_container("abc").unwrap();
        assert_eq!(runner.call_args()[0], vec!["-H", "tcp://10.0.0.5:2375", "start", "abc"]);
        assert_eq!(engine.endpoint(), Some("tcp://10.0.0.5:2375"));
    }

    #[test]
    fn read_only_calls_retry_transport_failures_once() {
        let runner = Rc::new(MockRunner::default());
        runner.push_output(fail(1, "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?"));
        runner.push_output(ok(""));
        let records = engine(&runner).list_managed().unwrap();
        assert!(records.is_empty());
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn second_transport_failure_surfaces() {
        let runner = Rc::new(MockRunner::default());
        let down = "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?";
        runner.push_output(fail(1, down));
        runner.push_output(fail(1, down));
        let err = engine(&runner).inspect("dev").unwrap_err();
        assert_eq!(err.error_code(), "engine_transport");
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn mutating_calls_never_retry() {
        let runner = Rc::new(MockRunner::default());
        runner.push_output(fail(1, "Cannot connect to the Docker daemon. Is the docker daemon running?"));
        let err = engine(&runner).start_container("abc").unwrap_err();
        assert!(matches!(err, ToolboxError::Transport { kind: EngineKind::Docker, .. }));
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn unclassified_failure_is_generic_engine_error() {
        let runner = Rc::new(MockRunner::default());
        runner.push_output(fail(2, "something odd happened"));
        let err = engine(&runner).start_container("abc").unwrap_err();
        assert_eq!(err.error_code(), "engine_error");
        assert!(err.to_string().contains("something odd happened"));
    }

    #[test]
    fn inspect_missing_container_is_none() {
        let runner = Rc::new(MockRunner::default());
        runner.push_output(fail(1, "Error: No such container: ghost"));
        assert!(engine(&runner).inspect("ghost").unwrap().is_none());
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn stop_and_remove_refuses_busy_container() {
        let runner = Rc::new(MockRunner::default());
        runner.push_output(ok(INSPECT_RUNNING));
        let err = engine(&runner).stop_and_remove("dev", false).unwrap_err();
        assert!(matches!(err, ToolboxError::ContainerBusy { sessions: 1, .. }));
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn stop_and_remove_stops_before_removing() {
        let runner = Rc::new(MockRunner::default());
        runner.push_output(ok(&INSPECT_RUNNING.replace(r#"["e1"]"#, "[]")));
        engine(&runner).stop_and_remove("4f1c0ffee", false).unwrap();
        let args = runner.call_args();
        assert_eq!(args.len(), 3);
        assert_eq!(args[1], vec!["stop", "4f1c0ffee"]);
        assert_eq!(args[2], vec!["rm", "4f1c0ffee"]);
    }

    #[test]
    fn forced_remove_skips_busy_check() {
        let runner = Rc::new(MockRunner::default());
        engine(&runner).stop_and_remove("4f1c0ffee", true).unwrap();
        assert_eq!(runner.call_args(), vec![vec!["rm", "--force", "4f1c0ffee"]]);
    }

    #[test]
    fn exec_propagates_exit_code_and_cancellation() {
        let runner = Rc::new(MockRunner::default());
        let engine = engine(&runner);
        let command = vec!["make".to_string(), "test".to_string()];
        let tty = TtyConfig {
            interactive: true,
            tty: true,
        };

        runner.set_attach(AttachOutcome::Exited(3));
        let code = engine
            .exec_interactive("abc", &command, tty, &CancelFlag::new())
            .unwrap();
        assert_eq!(code, 3);
        assert_eq!(
            runner.call_args()[0],
            vec!["exec", "--interactive", "--tty", "abc", "make", "test"]
        );

        runner.set_attach(AttachOutcome::Cancelled);
        let code = engine
            .exec_interactive("abc", &command, TtyConfig::none(), &CancelFlag::new())
            .unwrap();
        assert_eq!(code, CANCELLED_EXIT_CODE);
        assert_eq!(runner.call_args()[1], vec!["exec", "abc", "make", "test"]);
    }

    #[test]
    fn remove_image_refuses_when_managed_container_uses_it() {
        let runner = Rc::new(MockRunner::default());
        runner.push_output(ok(
            r#"{"ID":"abc","Names":"dev","Image":"alpine:3.19","Labels":"toolbox.managed=true,toolbox.name=dev,toolbox.image=alpine:3.19","State":"exited","CreatedAt":"2024-03-01 10:20:30 +0000 UTC"}"#,
        ));
        let err = engine(&runner).remove_image("alpine:3.19", false).unwrap_err();
        match err {
            ToolboxError::ImageInUse { image, users } => {
                assert_eq!(image, "alpine:3.19");
                assert_eq!(users, vec!["dev".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(runner.call_args().iter().all(|args| args[0] != "rmi"));
    }

    #[test]
    fn remove_image_maps_engine_failures() {
        let runner = Rc::new(MockRunner::default());
        runner.push_output(fail(1, "Error response from daemon: No such image: alpine:9"));
        let err = engine(&runner).remove_image("alpine:9", true).unwrap_err();
        assert_eq!(err.error_code(), "image_not_found");
        assert_eq!(runner.call_args(), vec![vec!["rmi", "--force", "alpine:9"]]);
    }

    #[test]
    fn render_command_quotes_whitespace() {
        let rendered = render_command(
            Path::new("/usr/bin/docker"),
            &["exec".to_string(), "dev".to_string(), "echo hi".to_string()],
        );
        assert_eq!(rendered, "docker exec dev \"echo hi\"");
    }
}
