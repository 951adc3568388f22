//! Configuration module for sweenv
//!
//! An [`EnvironmentConfig`] can be built in code or loaded from:
//! - built-in defaults, with host defaults resolved once from the environment
//! - a YAML/TOML/JSON config file
//! - environment variables (with `SWEENV__` prefix)
//!
//! Keys are case-insensitive except the names under `env`, which are taken
//! exactly as written in the file or after `SWEENV__ENV__`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::EnvironmentError;

/// Host variable naming the runtime binary
pub const EXECUTABLE_VAR: &str = "SWEENV_DOCKER_EXECUTABLE";

/// Host variable naming the mirror registry; an empty value disables it
pub const LOCAL_REGISTRY_VAR: &str = "SWEENV_LOCAL_REGISTRY";

const DEFAULT_CWD: &str = "/";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EXECUTABLE: &str = "docker";
const DEFAULT_CONTAINER_TIMEOUT: &str = "2h";
const DEFAULT_PULL_TIMEOUT_SECS: u64 = 600;
const DEFAULT_LOCAL_REGISTRY: &str = "localhost:5000";

const ENV_PREFIX: &str = "SWEENV";
const ENV_SEPARATOR: &str = "__";

/// Overrides of single `env` entries, e.g. `SWEENV__ENV__PAGER=cat`
const ENV_ENTRY_PREFIX: &str = "SWEENV__ENV__";

/// Searched when no config file is given
const DEFAULT_CONFIG_STEM: &str = "config/sweenv";
const CONFIG_EXTENSIONS: [&str; 4] = ["yaml", "yml", "toml", "json"];

/// Configuration of one container-backed environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Image reference requested from the runtime
    pub image: String,

    /// Working directory in which commands run
    #[serde(default = "default_cwd")]
    pub cwd: String,

    /// Variables set on every executed command
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Host variables copied into every executed command, when set on the host.
    /// Entries in `env` win over forwarded values with the same name.
    #[serde(default)]
    pub forward_env: Vec<String>,

    /// Per-command timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Path or name of the docker/podman executable
    #[serde(default = "default_executable")]
    pub executable: String,

    /// Extra arguments for `run`
    #[serde(default = "default_run_args")]
    pub run_args: Vec<String>,

    /// Lifetime bound of the container, in `sleep` syntax (`2h`, `90m`, `3s`)
    #[serde(default = "default_container_timeout")]
    pub container_timeout: String,

    /// Timeout in seconds for `pull` and `run`
    #[serde(default = "default_pull_timeout")]
    pub pull_timeout: u64,

    /// Mirror registry tried before the image's own registry
    #[serde(default = "default_local_registry")]
    pub local_registry: Option<String>,

    /// Try the mirror registry first
    #[serde(default = "default_true")]
    pub prefer_local_registry: bool,
}

/// Process-level defaults taken from the hosting environment.
///
/// Resolved once by the caller and handed to
/// [`EnvironmentConfig::with_host_defaults`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDefaults {
    pub executable: String,
    pub local_registry: Option<String>,
}

impl Default for HostDefaults {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            local_registry: default_local_registry(),
        }
    }
}

impl HostDefaults {
    /// Read the defaults from the current process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the defaults through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let executable = lookup(EXECUTABLE_VAR)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(defaults.executable);

        let local_registry = match lookup(LOCAL_REGISTRY_VAR) {
            Some(value) if value.trim().is_empty() => None,
            Some(value) => Some(value),
            None => defaults.local_registry,
        };

        Self {
            executable,
            local_registry,
        }
    }
}

// Default value functions
fn default_cwd() -> String {
    DEFAULT_CWD.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_executable() -> String {
    DEFAULT_EXECUTABLE.to_string()
}

fn default_run_args() -> Vec<String> {
    vec!["--rm".to_string()]
}

fn default_container_timeout() -> String {
    DEFAULT_CONTAINER_TIMEOUT.to_string()
}

fn default_pull_timeout() -> u64 {
    DEFAULT_PULL_TIMEOUT_SECS
}

fn default_local_registry() -> Option<String> {
    Some(DEFAULT_LOCAL_REGISTRY.to_string())
}

fn default_true() -> bool {
    true
}

impl EnvironmentConfig {
    /// Config for `image` with built-in defaults (the host environment is not read)
    pub fn new(image: impl Into<String>) -> Self {
        Self::with_host_defaults(image, &HostDefaults::default())
    }

    /// Config for `image` with the given host defaults
    pub fn with_host_defaults(image: impl Into<String>, host: &HostDefaults) -> Self {
        Self {
            image: image.into(),
            cwd: default_cwd(),
            env: BTreeMap::new(),
            forward_env: Vec::new(),
            timeout: default_timeout(),
            executable: host.executable.clone(),
            run_args: default_run_args(),
            container_timeout: default_container_timeout(),
            pull_timeout: default_pull_timeout(),
            local_registry: host.local_registry.clone(),
            prefer_local_registry: true,
        }
    }

    /// Load configuration from file and environment variables.
    ///
    /// Without an explicit `path`, `config/sweenv.{yaml,yml,toml,json}` is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Try to load .env file if present
        let _ = dotenvy::dotenv();

        Self::load_from(path, std::env::vars().collect())
    }

    /// Like [`EnvironmentConfig::load`], with `vars` standing in for the
    /// process environment. No `.env` file is read.
    pub fn load_from(path: Option<&Path>, vars: config::Map<String, String>) -> Result<Self> {
        let host = HostDefaults::from_lookup(|name| vars.get(name).cloned());
        let file = config_file(path);

        let builder = config::Config::builder()
            .set_default("cwd", DEFAULT_CWD)?
            .set_default("timeout", DEFAULT_TIMEOUT_SECS as i64)?
            .set_default("executable", host.executable.clone())?
            .set_default("run_args", vec!["--rm"])?
            .set_default("container_timeout", DEFAULT_CONTAINER_TIMEOUT)?
            .set_default("pull_timeout", DEFAULT_PULL_TIMEOUT_SECS as i64)?
            .set_default("prefer_local_registry", true)?
            // Empty means no mirror; normalized to None below
            .set_default("local_registry", host.local_registry.unwrap_or_default())?;

        let builder = match &file {
            Some(file) => builder.add_source(config::File::from(file.as_path()).required(true)),
            None => builder,
        };

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("forward_env")
                    .with_list_parse_key("run_args")
                    .source(Some(vars.clone())),
            )
            .build()
            .context("Failed to build configuration")?;

        let mut env_config: EnvironmentConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // The config crate lowercases every key, including variable names
        env_config.env = configured_env(file.as_deref(), &vars)?;

        if env_config.mirror_registry().is_none() {
            env_config.local_registry = None;
        }

        env_config.validate()?;

        Ok(env_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), EnvironmentError> {
        let invalid = |msg: String| Err(EnvironmentError::InvalidConfig(msg));

        if self.image.trim().is_empty() {
            return invalid("image cannot be empty".to_string());
        }

        if self.cwd.trim().is_empty() {
            return invalid("cwd cannot be empty".to_string());
        }

        if self.executable.trim().is_empty() {
            return invalid("executable cannot be empty".to_string());
        }

        if self.timeout == 0 {
            return invalid("timeout cannot be 0".to_string());
        }

        if self.pull_timeout == 0 {
            return invalid("pull_timeout cannot be 0".to_string());
        }

        if self.container_timeout.trim().is_empty()
            || self.container_timeout.contains(char::is_whitespace)
        {
            return invalid(format!(
                "container_timeout must be a single sleep duration, got '{}'",
                self.container_timeout
            ));
        }

        for name in self.forward_env.iter().chain(self.env.keys()) {
            if name.is_empty() || name.contains('=') {
                return invalid(format!("invalid environment variable name '{}'", name));
            }
        }

        Ok(())
    }

    /// Effective per-command timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Effective pull/run timeout
    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout)
    }

    /// Mirror registry, if one is configured and non-empty
    pub fn mirror_registry(&self) -> Option<&str> {
        self.local_registry
            .as_deref()
            .map(str::trim)
            .filter(|registry| !registry.is_empty())
    }

    /// Configuration as a JSON object, for callers that render templates
    pub fn template_vars(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// The explicit path, or the first default config file that exists
fn config_file(path: Option<&Path>) -> Option<PathBuf> {
    match path {
        Some(path) => Some(path.to_path_buf()),
        None => CONFIG_EXTENSIONS
            .iter()
            .map(|ext| PathBuf::from(format!("{}.{}", DEFAULT_CONFIG_STEM, ext)))
            .find(|candidate| candidate.is_file()),
    }
}

/// `env` entries with their names as written: the file's `env` table first,
/// then `SWEENV__ENV__<NAME>` variables on top
fn configured_env(
    file: Option<&Path>,
    vars: &config::Map<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut env = match file {
        Some(path) => file_env_table(path)?,
        None => BTreeMap::new(),
    };

    for (key, value) in vars {
        if let Some(name) = key.strip_prefix(ENV_ENTRY_PREFIX) {
            if !name.is_empty() {
                env.insert(name.to_string(), value.clone());
            }
        }
    }

    Ok(env)
}

fn file_env_table(path: &Path) -> Result<BTreeMap<String, String>> {
    use serde_json::Value;

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let document: Value = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&text).context("Failed to parse TOML config")?,
        Some("json") => serde_json::from_str(&text).context("Failed to parse JSON config")?,
        _ => serde_yaml::from_str(&text).context("Failed to parse YAML config")?,
    };

    let Some(table) = document.get("env").and_then(Value::as_object) else {
        return Ok(BTreeMap::new());
    };

    Ok(table
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(name, value)| {
            let value = match value {
                Value::String(value) => value.clone(),
                other => other.to_string(),
            };
            (name.clone(), value)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = EnvironmentConfig::new("python:3.11");
        assert_eq!(config.image, "python:3.11");
        assert_eq!(config.cwd, "/");
        assert!(config.env.is_empty());
        assert!(config.forward_env.is_empty());
        assert_eq!(config.timeout, 30);
        assert_eq!(config.executable, "docker");
        assert_eq!(config.run_args, vec!["--rm".to_string()]);
        assert_eq!(config.container_timeout, "2h");
        assert_eq!(config.pull_timeout, 600);
        assert_eq!(config.local_registry.as_deref(), Some("localhost:5000"));
        assert!(config.prefer_local_registry);
        assert_eq!(config.command_timeout(), Duration::from_secs(30));
        assert_eq!(config.pull_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_host_defaults_from_lookup() {
        let host = HostDefaults::from_lookup(|name| match name {
            EXECUTABLE_VAR => Some("podman".to_string()),
            LOCAL_REGISTRY_VAR => Some("custom-registry:8080".to_string()),
            _ => None,
        });
        let config = EnvironmentConfig::with_host_defaults("python:3.11", &host);
        assert_eq!(config.executable, "podman");
        assert_eq!(config.local_registry.as_deref(), Some("custom-registry:8080"));
    }

    #[test]
    fn test_empty_registry_variable_disables_mirror() {
        let host = HostDefaults::from_lookup(|name| {
            (name == LOCAL_REGISTRY_VAR).then(String::new)
        });
        assert_eq!(host.executable, "docker");
        assert_eq!(host.local_registry, None);

        let config = EnvironmentConfig::with_host_defaults("python:3.11", &host);
        assert_eq!(config.mirror_registry(), None);
    }

    #[test]
    fn test_unset_variables_keep_builtin_defaults() {
        let host = HostDefaults::from_lookup(|_| None);
        assert_eq!(host, HostDefaults::default());
    }

    #[test]
    fn test_blank_registry_is_not_a_mirror() {
        let config = EnvironmentConfig {
            local_registry: Some("  ".to_string()),
            ..EnvironmentConfig::new("python:3.11")
        };
        assert_eq!(config.mirror_registry(), None);
    }

    #[test]
    fn test_validation() {
        assert!(EnvironmentConfig::new("python:3.11").validate().is_ok());

        let config = EnvironmentConfig::new("");
        assert!(config.validate().is_err());

        let config = EnvironmentConfig {
            timeout: 0,
            ..EnvironmentConfig::new("python:3.11")
        };
        assert!(config.validate().is_err());

        let config = EnvironmentConfig {
            container_timeout: "2 h".to_string(),
            ..EnvironmentConfig::new("python:3.11")
        };
        assert!(config.validate().is_err());

        let config = EnvironmentConfig {
            forward_env: vec!["A=B".to_string()],
            ..EnvironmentConfig::new("python:3.11")
        };
        assert!(matches!(
            config.validate(),
            Err(EnvironmentError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let config: EnvironmentConfig = serde_json::from_str(
            r#"{"image": "python:3.11", "local_registry": null, "env": {"A": "1"}}"#,
        )
        .unwrap();
        assert_eq!(config.local_registry, None);
        assert_eq!(config.env.get("A").map(String::as_str), Some("1"));
        assert_eq!(config.timeout, 30);
        assert_eq!(config.run_args, vec!["--rm".to_string()]);
    }

    fn write_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn vars(pairs: &[(&str, &str)]) -> config::Map<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            ".yaml",
            "image: python:3.11\ncwd: /tmp\ntimeout: 5\nforward_env:\n  - HOME\nprefer_local_registry: false\n",
        );

        let config = EnvironmentConfig::load_from(Some(file.path()), vars(&[])).unwrap();
        assert_eq!(config.image, "python:3.11");
        assert_eq!(config.cwd, "/tmp");
        assert_eq!(config.timeout, 5);
        assert_eq!(config.forward_env, vec!["HOME".to_string()]);
        assert!(!config.prefer_local_registry);
        assert_eq!(config.container_timeout, "2h");
        assert_eq!(config.executable, "docker");
        assert_eq!(config.local_registry.as_deref(), Some("localhost:5000"));
    }

    #[test]
    fn test_load_keeps_env_names_as_written() {
        let file = write_config(
            ".yaml",
            "image: python:3.11\nenv:\n  PAGER: cat\n  MY_Var: x\n  COUNT: 3\nforward_env:\n  - Mixed_Case\n",
        );

        let config = EnvironmentConfig::load_from(Some(file.path()), vars(&[])).unwrap();
        assert_eq!(
            config.env,
            BTreeMap::from([
                ("COUNT".to_string(), "3".to_string()),
                ("MY_Var".to_string(), "x".to_string()),
                ("PAGER".to_string(), "cat".to_string()),
            ])
        );
        assert_eq!(config.forward_env, vec!["Mixed_Case".to_string()]);
    }

    #[test]
    fn test_load_keeps_env_names_from_toml() {
        let file = write_config(".toml", "image = \"python:3.11\"\n\n[env]\nPIP_PROGRESS_BAR = \"off\"\n");

        let config = EnvironmentConfig::load_from(Some(file.path()), vars(&[])).unwrap();
        assert_eq!(config.env.get("PIP_PROGRESS_BAR").map(String::as_str), Some("off"));
        assert!(!config.env.contains_key("pip_progress_bar"));
    }

    #[test]
    fn test_load_applies_variable_overrides() {
        let file = write_config(".yaml", "image: python:3.11\nenv:\n  PAGER: cat\n");

        let config = EnvironmentConfig::load_from(
            Some(file.path()),
            vars(&[
                ("SWEENV__TIMEOUT", "7"),
                ("SWEENV__CWD", "/testbed"),
                ("SWEENV__FORWARD_ENV", "HOME,PATH"),
                ("SWEENV__ENV__PAGER", "less"),
                ("SWEENV__ENV__LC_ALL", "C.UTF-8"),
                ("SWEENV_DOCKER_EXECUTABLE", "podman"),
            ]),
        )
        .unwrap();

        assert_eq!(config.timeout, 7);
        assert_eq!(config.cwd, "/testbed");
        assert_eq!(config.forward_env, vec!["HOME".to_string(), "PATH".to_string()]);
        assert_eq!(config.executable, "podman");
        assert_eq!(
            config.env,
            BTreeMap::from([
                ("LC_ALL".to_string(), "C.UTF-8".to_string()),
                ("PAGER".to_string(), "less".to_string()),
            ])
        );
    }

    #[test]
    fn test_load_empty_registry_disables_mirror() {
        let file = write_config(".yaml", "image: python:3.11\nlocal_registry: \"\"\n");
        let config = EnvironmentConfig::load_from(Some(file.path()), vars(&[])).unwrap();
        assert_eq!(config.local_registry, None);

        let file = write_config(".yaml", "image: python:3.11\n");
        let config =
            EnvironmentConfig::load_from(Some(file.path()), vars(&[(LOCAL_REGISTRY_VAR, "")]))
                .unwrap();
        assert_eq!(config.local_registry, None);

        let config = EnvironmentConfig::load_from(
            Some(file.path()),
            vars(&[(LOCAL_REGISTRY_VAR, "mirror.internal:5000")]),
        )
        .unwrap();
        assert_eq!(config.local_registry.as_deref(), Some("mirror.internal:5000"));
    }

    #[test]
    fn test_load_requires_image() {
        let file = write_config(".yaml", "cwd: /tmp\n");
        assert!(EnvironmentConfig::load_from(Some(file.path()), vars(&[])).is_err());
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let file = write_config(".yaml", "image: python:3.11\ntimeout: 0\n");
        assert!(EnvironmentConfig::load_from(Some(file.path()), vars(&[])).is_err());
    }

    #[test]
    fn test_template_vars() {
        let vars = EnvironmentConfig::new("python:3.11").template_vars();
        assert_eq!(vars["image"], "python:3.11");
        assert_eq!(vars["timeout"], 30);
        assert_eq!(vars["prefer_local_registry"], true);
    }
}
