use std::io;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::cancel::CancelFlag;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Conventional status for a session torn down by an interrupt.
pub const CANCELLED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Responded(CommandOutput),
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Exited(i32),
    Cancelled,
}

/// Everything that spawns an engine CLI goes through this trait.
pub trait CommandRunner {
    fn locate(&self, program: &str) -> Option<PathBuf>;

    fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput, io::Error>;

    fn probe(
        &self,
        program: &Path,
        args: &[String],
        timeout: Duration,
    ) -> Result<ProbeOutcome, io::Error>;

    /// Runs with inherited stdio until the child exits or `cancel` is raised.
    fn attach(
        &self,
        program: &Path,
        args: &[String],
        cancel: &CancelFlag,
    ) -> Result<AttachOutcome, io::Error>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

fn status_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    if status.success() {
        0
    } else {
        1
    }
}

fn drain(child: &mut Child) -> (Vec<u8>, Vec<u8>) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    if let Some(mut pipe) = child.stdout.take() {
        let _ = pipe.read_to_end(&mut stdout);
    }
    if let Some(mut pipe) = child.stderr.take() {
        let _ = pipe.read_to_end(&mut stderr);
    }
    (stdout, stderr)
}

impl CommandRunner for SystemRunner {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }

    fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput, io::Error> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()?;
        Ok(CommandOutput {
            status_code: status_code(output.status),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn probe(
        &self,
        program: &Path,
        args: &[String],
        timeout: Duration,
    ) -> Result<ProbeOutcome, io::Error> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                let (stdout, stderr) = drain(&mut child);
                return Ok(ProbeOutcome::Responded(CommandOutput {
                    status_code: status_code(status),
                    stdout,
                    stderr,
                }));
            }
            if Instant::now() >= deadline {
                debug!(program = %program.display(), "probe deadline reached, killing child");
                let _ = child.kill();
                let _ = child.wait();
                return Ok(ProbeOutcome::TimedOut);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn attach(
        &self,
        program: &Path,
        args: &[String],
        cancel: &CancelFlag,
    ) -> Result<AttachOutcome, io::Error> {
        let mut child = Command::new(program).args(args).spawn()?;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(AttachOutcome::Exited(status_code(status)));
            }
            if cancel.is_cancelled() {
                // Only the local client goes away; the container is untouched.
                info!(program = %program.display(), "interrupt received, detaching session");
                let _ = child.kill();
                let _ = child.wait();
                return Ok(AttachOutcome::Cancelled);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}
