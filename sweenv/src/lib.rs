//! sweenv library
//!
//! Container-backed sandbox environments for agents: provision one container
//! from an image, run shell commands in it, and release it afterwards.
//!
//! ```no_run
//! use futures::FutureExt;
//! use sweenv::{with_session, EnvironmentConfig};
//!
//! # async fn demo() -> sweenv::Result<()> {
//! let config = EnvironmentConfig::new("python:3.11");
//! let result = with_session(config, |env| {
//!     async move { env.execute("echo hello", None, None).await }.boxed()
//! })
//! .await??;
//! assert_eq!(result.output, "hello\n");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod container;
pub mod error;
pub mod logging;
pub mod models;

pub use config::{EnvironmentConfig, HostDefaults};
pub use container::{with_session, with_session_using, ContainerSession};
pub use error::{EnvironmentError, Result};
pub use models::ExecOutput;
