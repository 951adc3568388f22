//! Container session: one container's lifecycle
//!
//! A session owns exactly one container. It is started once, executes any
//! number of commands, and is released with [`ContainerSession::cleanup`],
//! which hands teardown to a detached process and never fails. Dropping a
//! session releases it too, but [`with_session`] is the primary way to
//! guarantee release.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::EnvironmentConfig;
use crate::error::{EnvironmentError, InvokeError, Result};
use crate::models::{ExecOutput, SessionInfo};

use super::commands;
use super::image::ImageResolver;
use super::runner::{CommandRunner, Invocation, ProcessRunner};

/// Prefix of generated container names
pub const CONTAINER_NAME_PREFIX: &str = "sweenv";

/// Ceiling for a graceful `stop` before falling back to `rm -f`
const STOP_TIMEOUT: Duration = Duration::from_secs(60);

const REMOVE_TIMEOUT: Duration = Duration::from_secs(60);

/// An environment backed by one running container
pub struct ContainerSession {
    config: EnvironmentConfig,
    runner: Arc<dyn CommandRunner>,

    /// Name passed to `run`
    container_name: String,

    /// Runtime container ID (once started)
    container_id: Option<String>,

    /// Image reference passed to `run`
    image: Option<String>,

    started_at: Option<DateTime<Utc>>,

    /// Set once the termination sequence has been issued
    released: AtomicBool,
}

impl ContainerSession {
    /// Create an unstarted session using the process runner
    pub fn new(config: EnvironmentConfig) -> Self {
        Self::with_runner(config, Arc::new(ProcessRunner))
    }

    /// Create an unstarted session using `runner` for every runtime call
    pub fn with_runner(config: EnvironmentConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        let container_name = format!("{}-{}", CONTAINER_NAME_PREFIX, &suffix[..8]);

        Self {
            config,
            runner,
            container_name,
            container_id: None,
            image: None,
            started_at: None,
            released: AtomicBool::new(false),
        }
    }

    /// Create and start a session
    pub async fn start(config: EnvironmentConfig) -> Result<Self> {
        Self::start_with_runner(config, Arc::new(ProcessRunner)).await
    }

    /// Create and start a session using `runner`
    pub async fn start_with_runner(
        config: EnvironmentConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let mut session = Self::with_runner(config, runner);
        session.start_container().await?;
        Ok(session)
    }

    /// Resolve the image and start the container.
    ///
    /// A session holds at most one container; calling this again after a
    /// successful start does nothing.
    pub async fn start_container(&mut self) -> Result<()> {
        if let Some(container_id) = &self.container_id {
            debug!(container_id = %container_id, "Container already started");
            return Ok(());
        }

        self.config.validate()?;

        let image = ImageResolver::new(&self.config, self.runner.as_ref())
            .resolve_and_pull()
            .await;

        let invocation = Invocation::new(
            &self.config.executable,
            commands::run_args(
                &self.container_name,
                &self.config.cwd,
                &self.config.run_args,
                &image,
                &self.config.container_timeout,
            ),
            // run may pull as well
            self.config.pull_timeout(),
        );
        debug!(command = %invocation, "Starting container");

        let output = match self.runner.run(invocation).await {
            Ok(output) => output,
            Err(InvokeError::TimedOut(timeout)) => {
                error!(
                    container_name = %self.container_name,
                    timeout_secs = timeout.as_secs(),
                    "Container start timed out"
                );
                self.discard_partial_start();
                return Err(EnvironmentError::StartTimedOut(timeout));
            }
            Err(e @ InvokeError::Io(_)) => {
                // The process was spawned, so the container may exist
                self.discard_partial_start();
                return Err(from_invoke(e));
            }
            Err(e) => return Err(from_invoke(e)),
        };

        if !output.success() {
            let stderr = output.stderr_lossy().trim().to_string();
            error!(
                container_name = %self.container_name,
                exit_code = output.exit_code,
                stderr = %stderr,
                "Container start failed"
            );
            self.discard_partial_start();
            return Err(EnvironmentError::StartFailed { image, stderr });
        }

        let container_id = output.stdout_lossy().trim().to_string();
        if container_id.is_empty() {
            self.discard_partial_start();
            return Err(EnvironmentError::StartFailed {
                image,
                stderr: "runtime returned no container id".to_string(),
            });
        }

        info!(
            container_name = %self.container_name,
            container_id = %container_id,
            image = %image,
            "Container started"
        );

        self.container_id = Some(container_id);
        self.image = Some(image);
        self.started_at = Some(Utc::now());

        Ok(())
    }

    /// Execute a shell command in the container.
    ///
    /// `cwd` and `timeout` default to the configured values. A non-zero exit
    /// code is returned as data; only timeouts and launch failures are errors.
    pub async fn execute(
        &self,
        command: &str,
        cwd: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput> {
        let container_id = self
            .container_id
            .as_deref()
            .ok_or(EnvironmentError::NotStarted)?;

        if self.released.load(Ordering::SeqCst) {
            return Err(EnvironmentError::Released(container_id.to_string()));
        }

        let cwd = cwd.filter(|dir| !dir.is_empty()).unwrap_or(&self.config.cwd);
        let timeout = timeout.unwrap_or_else(|| self.config.command_timeout());

        // Host values are read at call time
        let env = commands::exec_env(&self.config.forward_env, &self.config.env, |name| {
            std::env::var_os(name).map(|value| value.to_string_lossy().into_owned())
        });

        let invocation = Invocation::new(
            &self.config.executable,
            commands::exec_args(container_id, cwd, &env, command),
            timeout,
        )
        .combined();

        debug!(
            container_id = %container_id,
            cwd = %cwd,
            timeout_secs = timeout.as_secs(),
            "Executing command"
        );

        let start_time = Instant::now();
        let output = self.runner.run(invocation).await.map_err(|e| match e {
            InvokeError::TimedOut(_) => EnvironmentError::ExecTimedOut { timeout },
            other => from_invoke(other),
        })?;

        let result = ExecOutput {
            output: output.stdout_lossy(),
            returncode: output.exit_code,
        };

        debug!(
            container_id = %container_id,
            returncode = result.returncode,
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Command completed"
        );

        Ok(result)
    }

    /// Stop and remove the container without waiting for it.
    ///
    /// `stop` is bounded by 60s and followed by `rm -f` if it fails. Both run
    /// in a detached process, so they complete even when this process exits
    /// right away. Does nothing when no container was started or cleanup was
    /// already issued.
    pub fn cleanup(&self) {
        let Some(container_id) = self.container_id.clone() else {
            return;
        };

        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(container_id = %container_id, "Releasing container");

        let executable = &self.config.executable;
        let steps = vec![
            Invocation::new(executable, commands::stop_args(&container_id), STOP_TIMEOUT),
            Invocation::new(executable, commands::remove_args(&container_id), REMOVE_TIMEOUT),
        ];
        if let Err(e) = self.runner.detach(steps) {
            debug!(container_id = %container_id, error = %e, "Could not launch container teardown");
        }
    }

    /// Remove whatever a failed `run` may have left behind under our name
    fn discard_partial_start(&self) {
        let steps = vec![Invocation::new(
            &self.config.executable,
            commands::remove_args(&self.container_name),
            REMOVE_TIMEOUT,
        )];
        if let Err(e) = self.runner.detach(steps) {
            debug!(
                container_name = %self.container_name,
                error = %e,
                "Could not remove partial container"
            );
        }
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// Whether cleanup has been issued
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            container_name: self.container_name.clone(),
            container_id: self.container_id.clone(),
            image: self.image.clone(),
            started_at: self.started_at,
        }
    }

    /// Configuration as template variables
    pub fn template_vars(&self) -> serde_json::Value {
        self.config.template_vars()
    }
}

impl Drop for ContainerSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl std::fmt::Debug for ContainerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerSession")
            .field("container_name", &self.container_name)
            .field("container_id", &self.container_id)
            .field("image", &self.image)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

/// Start a session, run `f` with it, and release the container afterwards.
///
/// ```no_run
/// use futures::FutureExt;
/// use sweenv::{with_session, EnvironmentConfig};
///
/// # async fn demo() -> sweenv::Result<()> {
/// let output = with_session(EnvironmentConfig::new("python:3.11"), |env| {
///     async move { env.execute("python --version", None, None).await }.boxed()
/// })
/// .await??;
/// println!("{}", output.output);
/// # Ok(())
/// # }
/// ```
pub async fn with_session<T, F>(config: EnvironmentConfig, f: F) -> Result<T>
where
    F: for<'a> FnOnce(&'a ContainerSession) -> BoxFuture<'a, T>,
{
    with_session_using(config, Arc::new(ProcessRunner), f).await
}

/// [`with_session`] with a custom runner
pub async fn with_session_using<T, F>(
    config: EnvironmentConfig,
    runner: Arc<dyn CommandRunner>,
    f: F,
) -> Result<T>
where
    F: for<'a> FnOnce(&'a ContainerSession) -> BoxFuture<'a, T>,
{
    let session = ContainerSession::start_with_runner(config, runner).await?;
    let value = f(&session).await;
    session.cleanup();
    Ok(value)
}

fn from_invoke(err: InvokeError) -> EnvironmentError {
    match err {
        InvokeError::TimedOut(timeout) => EnvironmentError::ExecTimedOut { timeout },
        InvokeError::Launch { program, source } => EnvironmentError::Launch { program, source },
        InvokeError::Io(e) => EnvironmentError::Io(e),
    }
}
