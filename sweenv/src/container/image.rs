//! Image resolution with local mirror fallback
//!
//! The mirror registry is tried first when configured. If it does not have
//! the image, the original reference is pulled instead. Pull failures are
//! never fatal: `run` pulls implicitly, so a failed pull only gets logged.

use tracing::{debug, info, warn};

use crate::config::EnvironmentConfig;
use crate::error::InvokeError;

use super::commands;
use super::runner::{CommandRunner, Invocation};

/// Registry prefix stripped before an image is looked up on the mirror
pub const PUBLIC_REGISTRY_PREFIX: &str = "docker.io/";

/// Reference of `image` on `registry`, or `image` itself without a registry
pub fn mirror_reference(registry: Option<&str>, image: &str) -> String {
    match registry {
        Some(registry) => {
            let name = image.strip_prefix(PUBLIC_REGISTRY_PREFIX).unwrap_or(image);
            format!("{}/{}", registry.trim_end_matches('/'), name)
        }
        None => image.to_string(),
    }
}

/// Picks the image reference handed to `run`
pub struct ImageResolver<'a> {
    config: &'a EnvironmentConfig,
    runner: &'a dyn CommandRunner,
}

impl<'a> ImageResolver<'a> {
    pub fn new(config: &'a EnvironmentConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner }
    }

    /// Reference of `image` on the configured mirror
    pub fn mirror_reference(&self, image: &str) -> String {
        mirror_reference(self.config.mirror_registry(), image)
    }

    /// Try to pull an image. Returns true if successful.
    pub async fn pull(&self, image: &str) -> bool {
        let invocation = Invocation::new(
            &self.config.executable,
            commands::pull_args(image),
            self.config.pull_timeout(),
        );
        debug!(command = %invocation, "Pulling image");

        match self.runner.run(invocation).await {
            Ok(output) if output.success() => {
                info!(image = %image, "Successfully pulled image");
                true
            }
            Ok(output) => {
                debug!(
                    image = %image,
                    exit_code = output.exit_code,
                    stderr = %output.stderr_lossy().trim(),
                    "Failed to pull image"
                );
                false
            }
            Err(InvokeError::TimedOut(timeout)) => {
                debug!(
                    image = %image,
                    timeout_secs = timeout.as_secs(),
                    "Timeout while pulling image"
                );
                false
            }
            Err(e) => {
                warn!(image = %image, error = %e, "Could not run image pull");
                false
            }
        }
    }

    /// Pull the image, preferring the mirror, and return the reference to run
    pub async fn resolve_and_pull(&self) -> String {
        let image = &self.config.image;

        if self.config.prefer_local_registry {
            if let Some(registry) = self.config.mirror_registry() {
                let local_image = mirror_reference(Some(registry), image);
                info!(image = %local_image, "Attempting to pull from local registry");

                if self.pull(&local_image).await {
                    info!(image = %local_image, "Using image from local registry");
                    return local_image;
                }

                info!(
                    image = %image,
                    "Image not found in local registry, falling back to original reference"
                );
            }
        }

        if !self.pull(image).await {
            warn!(image = %image, "Failed to pull image, run will attempt to pull it");
        }

        image.clone()
    }
}
