//! Argument vectors for runtime subcommands

use std::collections::BTreeMap;

/// Shell used to run commands inside the container
pub const SHELL: &str = "bash";

pub fn pull_args(image: &str) -> Vec<String> {
    vec!["pull".to_string(), image.to_string()]
}

/// `run -d --name <name> -w <cwd> <extra...> <image> sleep <idle_timeout>`
pub fn run_args(
    container_name: &str,
    cwd: &str,
    extra_args: &[String],
    image: &str,
    idle_timeout: &str,
) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        container_name.to_string(),
        "-w".to_string(),
        cwd.to_string(),
    ];
    args.extend(extra_args.iter().cloned());
    args.push(image.to_string());
    args.push("sleep".to_string());
    args.push(idle_timeout.to_string());
    args
}

/// Environment pairs for one exec, in flag order.
///
/// Forwarded host variables come first and configured variables after them.
/// The runtime keeps the last `-e` for a name, so configured values win.
/// Forwarded names missing on the host are skipped.
pub fn exec_env<F>(
    forward_env: &[String],
    env: &BTreeMap<String, String>,
    host_lookup: F,
) -> Vec<(String, String)>
where
    F: Fn(&str) -> Option<String>,
{
    let forwarded = forward_env
        .iter()
        .filter_map(|name| host_lookup(name).map(|value| (name.clone(), value)));
    let configured = env
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()));
    forwarded.chain(configured).collect()
}

/// `exec -w <cwd> [-e K=V]... <id> bash -lc <command>`
pub fn exec_args(
    container_id: &str,
    cwd: &str,
    env: &[(String, String)],
    command: &str,
) -> Vec<String> {
    let mut args = vec!["exec".to_string(), "-w".to_string(), cwd.to_string()];

    for (key, value) in env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push(container_id.to_string());
    args.push(SHELL.to_string());
    args.push("-lc".to_string());
    args.push(command.to_string());
    args
}

pub fn stop_args(container_id: &str) -> Vec<String> {
    vec!["stop".to_string(), container_id.to_string()]
}

/// `rm -f <id>`; also accepts a container name
pub fn remove_args(container: &str) -> Vec<String> {
    vec!["rm".to_string(), "-f".to_string(), container.to_string()]
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_run_args_layout() {
        let args = run_args(
            "sweenv-0123abcd",
            "/testbed",
            &strings(&["--rm", "--network", "none"]),
            "python:3.11",
            "2h",
        );
        assert_eq!(
            args,
            strings(&[
                "run", "-d", "--name", "sweenv-0123abcd", "-w", "/testbed", "--rm",
                "--network", "none", "python:3.11", "sleep", "2h",
            ])
        );
    }

    #[test]
    fn test_exec_args_layout() {
        let env = vec![("A".to_string(), "1".to_string())];
        let args = exec_args("abc123", "/tmp", &env, "echo $A && ls");
        assert_eq!(
            args,
            strings(&["exec", "-w", "/tmp", "-e", "A=1", "abc123", "bash", "-lc", "echo $A && ls"])
        );
    }

    #[test]
    fn test_configured_env_is_emitted_after_forwarded() {
        let forward = strings(&["CONFLICT_VAR", "HOST_VAR"]);
        let env = BTreeMap::from([("CONFLICT_VAR".to_string(), "from_config".to_string())]);

        let pairs = exec_env(&forward, &env, |name| match name {
            "CONFLICT_VAR" => Some("from_host".to_string()),
            "HOST_VAR" => Some("host_value".to_string()),
            _ => None,
        });

        assert_eq!(
            pairs,
            vec![
                ("CONFLICT_VAR".to_string(), "from_host".to_string()),
                ("HOST_VAR".to_string(), "host_value".to_string()),
                ("CONFLICT_VAR".to_string(), "from_config".to_string()),
            ]
        );

        // Last definition wins in the runtime, so the configured value is effective
        let effective: BTreeMap<_, _> = pairs.into_iter().collect();
        assert_eq!(effective["CONFLICT_VAR"], "from_config");
    }

    #[test]
    fn test_missing_host_variables_are_skipped() {
        let forward = strings(&["NONEXISTENT_VAR", "PRESENT"]);
        let pairs = exec_env(&forward, &BTreeMap::new(), |name| {
            (name == "PRESENT").then(|| "yes".to_string())
        });
        assert_eq!(pairs, vec![("PRESENT".to_string(), "yes".to_string())]);
    }

    #[test]
    fn test_forwarded_values_are_taken_as_given() {
        let forward = strings(&["EMPTY"]);
        let pairs = exec_env(&forward, &BTreeMap::new(), |_| Some(String::new()));
        assert_eq!(pairs, vec![("EMPTY".to_string(), String::new())]);
        assert_eq!(exec_args("id", "/", &pairs, "true")[4], "EMPTY=");
    }

    #[test]
    fn test_teardown_args() {
        assert_eq!(stop_args("abc"), strings(&["stop", "abc"]));
        assert_eq!(remove_args("abc"), strings(&["rm", "-f", "abc"]));
        assert_eq!(pull_args("python:3.11"), strings(&["pull", "python:3.11"]));
    }
}
