//! Invocations of the container runtime binary

use std::fmt;
use std::io;
use std::process::Stdio;
use std::time::Duration;

#[cfg(unix)]
use std::os::fd::OwnedFd;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::debug;

use crate::error::InvokeError;

const READ_CHUNK: usize = 8 * 1024;

/// How stdout and stderr of an invocation are captured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Keep stdout and stderr apart
    Separate,
    /// Write stdout and stderr into one pipe, so the bytes keep their order
    Combined,
}

/// One call of the runtime binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub output: OutputMode,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            output: OutputMode::Separate,
        }
    }

    /// Capture stderr together with stdout
    pub fn combined(mut self) -> Self {
        self.output = OutputMode::Combined;
        self
    }

    /// Runtime subcommand (`pull`, `run`, `exec`, ...)
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

/// Quote an argument for display in logs
fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Captured result of a finished invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, or -1 when the process was killed by a signal
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Launches runtime invocations.
///
/// Implementations must kill the process when `invocation.timeout` elapses
/// and report it as [`InvokeError::TimedOut`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: Invocation) -> Result<ProcessOutput, InvokeError>;

    /// Hand `steps` to a process that outlives this one and return at once.
    ///
    /// Each step is bounded by its own timeout and runs only when the step
    /// before it failed. Outcomes are not reported back.
    fn detach(&self, steps: Vec<Invocation>) -> Result<(), InvokeError>;
}

/// Runs invocations as child processes of this process
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: Invocation) -> Result<ProcessOutput, InvokeError> {
        let program = which::which(&invocation.program).map_err(|e| InvokeError::Launch {
            program: invocation.program.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, e),
        })?;

        let mut cmd = Command::new(&program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        let shared_pipe = match invocation.output {
            OutputMode::Combined => {
                let (reader, writer) = io::pipe()?;
                cmd.stdout(writer.try_clone()?).stderr(writer);
                Some(reader)
            }
            OutputMode::Separate => None,
        };

        let child = cmd.spawn().map_err(|source| InvokeError::Launch {
            program: invocation.program.clone(),
            source,
        })?;
        // Close our copies of the write ends, or the pipe never reaches EOF
        drop(cmd);

        let mode = invocation.output;
        let collect = async move {
            #[cfg(unix)]
            if let Some(reader) = shared_pipe {
                return collect_shared(child, reader).await;
            }
            collect_output(child, mode).await
        };

        // Dropping the child on timeout kills it
        match timeout(invocation.timeout, collect).await {
            Ok(result) => result,
            Err(_) => {
                debug!(
                    command = %invocation,
                    timeout_secs = invocation.timeout.as_secs(),
                    "Invocation timed out"
                );
                Err(InvokeError::TimedOut(invocation.timeout))
            }
        }
    }

    fn detach(&self, steps: Vec<Invocation>) -> Result<(), InvokeError> {
        if steps.is_empty() {
            return Ok(());
        }

        let script = fallback_script(&steps);
        debug!(script = %script, "Detaching command chain");

        // sh backgrounds the chain and exits right away; the chain is
        // reparented and keeps running after this process is gone
        let status = std::process::Command::new(DETACH_SHELL)
            .arg("-c")
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|source| InvokeError::Launch {
                program: DETACH_SHELL.to_string(),
                source,
            })?;

        if !status.success() {
            debug!(exit_code = ?status.code(), "Detaching shell exited with failure");
        }

        Ok(())
    }
}

const DETACH_SHELL: &str = "sh";

/// `(timeout <s> step1 || timeout <s> step2 ...) >/dev/null 2>&1 &`
fn fallback_script(steps: &[Invocation]) -> String {
    let chain = steps
        .iter()
        .map(|step| format!("timeout {} {}", step.timeout.as_secs().max(1), step))
        .collect::<Vec<_>>()
        .join(" || ");
    format!("({}) >/dev/null 2>&1 &", chain)
}

/// Read the pipe shared by stdout and stderr to EOF, then reap the child
#[cfg(unix)]
async fn collect_shared(mut child: Child, reader: io::PipeReader) -> Result<ProcessOutput, InvokeError> {
    let mut pipe = tokio::net::unix::pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;

    let mut out = Vec::new();
    pipe.read_to_end(&mut out).await?;

    let status = child.wait().await?;

    Ok(ProcessOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: out,
        stderr: Vec::new(),
    })
}

/// Read both pipes to EOF, then reap the child
async fn collect_output(mut child: Child, mode: OutputMode) -> Result<ProcessOutput, InvokeError> {
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout was not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stderr was not captured"))?;

    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut out_chunk = [0u8; READ_CHUNK];
    let mut err_chunk = [0u8; READ_CHUNK];
    let mut out_open = true;
    let mut err_open = true;

    while out_open || err_open {
        tokio::select! {
            read = stdout.read(&mut out_chunk), if out_open => match read? {
                0 => out_open = false,
                n => out.extend_from_slice(&out_chunk[..n]),
            },
            read = stderr.read(&mut err_chunk), if err_open => match read? {
                0 => err_open = false,
                n => match mode {
                    OutputMode::Combined => out.extend_from_slice(&err_chunk[..n]),
                    OutputMode::Separate => err.extend_from_slice(&err_chunk[..n]),
                },
            },
        }
    }

    let status = child.wait().await?;

    Ok(ProcessOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: out,
        stderr: err,
    })
}
