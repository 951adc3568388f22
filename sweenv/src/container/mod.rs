//! Container module for sweenv
//!
//! Everything that talks to the docker/podman CLI:
//! - building runtime invocations
//! - resolving the image against a local mirror
//! - starting, executing in and releasing one container

pub mod commands;
mod image;
mod runner;
mod session;

pub use image::{mirror_reference, ImageResolver, PUBLIC_REGISTRY_PREFIX};
pub use runner::{CommandRunner, Invocation, OutputMode, ProcessOutput, ProcessRunner};
pub use session::{with_session, with_session_using, ContainerSession, CONTAINER_NAME_PREFIX};
