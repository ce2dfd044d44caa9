use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::taskwarrior::{DEFAULT_SCOPE_ATTRIBUTE, DEFAULT_TASK_BINARY};
use crate::store::TaskwarriorOptions;

pub const TASK_COMMAND_ENV: &str = "TASKSYNC_TASK_CMD";
pub const HOME_ENV: &str = "TASKSYNC_HOME";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid task command {0:?}")]
    Command(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TasksyncConfig {
    /// Command used to run Taskwarrior, split like a shell would,
    /// e.g. `task` or `/opt/task/bin/task rc.gc=off`.
    pub task_command: Option<String>,
    /// Alternate taskrc passed as `rc:<path>`.
    pub taskrc: Option<String>,
    /// Overrides `rc.data.location`.
    pub data_location: Option<String>,
    /// Name of the UDA that holds a record's document path.
    pub scope_attribute: Option<String>,
}

/// Values given on the command line; they win over every config layer.
#[derive(Debug, Clone, Default)]
pub struct StoreOverrides {
    pub task_command: Option<String>,
    pub taskrc: Option<PathBuf>,
    pub data_location: Option<PathBuf>,
    pub scope_attribute: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolved<T> {
    pub value: T,
    pub source: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    pub task_command: Resolved<Vec<String>>,
    pub taskrc: Option<Resolved<PathBuf>>,
    pub data_location: Option<Resolved<PathBuf>>,
    pub scope_attribute: Resolved<String>,
}

impl ResolvedConfig {
    pub fn store_options(&self) -> TaskwarriorOptions {
        TaskwarriorOptions {
            command: self.task_command.value.clone(),
            taskrc: self.taskrc.as_ref().map(|r| r.value.clone()),
            data_location: self.data_location.as_ref().map(|r| r.value.clone()),
            scope_attribute: self.scope_attribute.value.clone(),
        }
    }
}

pub fn config_filename_candidates() -> [&'static str; 2] {
    [".tasksync.toml", ".tasksyncrc"]
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(".tasksync.toml")
}

pub fn resolve_user_home_dir() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    if let Ok(profile) = std::env::var("USERPROFILE") {
        let trimmed = profile.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    None
}

pub fn resolve_tasksync_home_dir() -> Option<PathBuf> {
    if let Ok(value) = std::env::var(HOME_ENV) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    resolve_user_home_dir().map(|home| home.join(".tasksync"))
}

pub fn global_config_path() -> Option<PathBuf> {
    resolve_tasksync_home_dir().map(|home| home.join("config.toml"))
}

/// Nearest ancestor of `start` (itself included) holding a config file.
pub fn find_config_root(start: &Path) -> Option<PathBuf> {
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    for candidate in start.ancestors() {
        for name in config_filename_candidates() {
            if candidate.join(name).is_file() {
                return Some(candidate.to_path_buf());
            }
        }
    }
    None
}

/// Project config in `root`, if any. Unreadable or malformed files are
/// skipped; use [`read_config`] to see the error.
pub fn load_config(root: &Path) -> Option<TasksyncConfig> {
    read_config(root).ok().flatten()
}

pub fn load_global_config() -> Option<TasksyncConfig> {
    read_global_config().ok().flatten()
}

/// Project config in `root`; `Ok(None)` when no config file exists.
pub fn read_config(root: &Path) -> Result<Option<TasksyncConfig>, ConfigError> {
    for name in config_filename_candidates() {
        let path = root.join(name);
        if path.is_file() {
            return read_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

pub fn read_global_config() -> Result<Option<TasksyncConfig>, ConfigError> {
    match global_config_path() {
        Some(path) if path.is_file() => read_config_file(&path).map(Some),
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<TasksyncConfig, ConfigError> {
    let text = fs::read_to_string(path)?;
    toml::from_str::<TasksyncConfig>(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_config(root: &Path, config: &TasksyncConfig) -> Result<PathBuf, ConfigError> {
    let path = config_path(root);
    let body = toml::to_string_pretty(config)?;
    fs::write(&path, body)?;
    Ok(path)
}

/// Resolve store settings for documents under `root`.
///
/// Each value comes from the first layer that sets it: command-line
/// overrides, the environment (task command only), the project config in
/// `root`, the global config, then built-in defaults. A config file that
/// exists but cannot be read or parsed is an error. The task command falls
/// back to `task` on `PATH` before the default binary path.
pub fn resolve_config(
    root: &Path,
    overrides: &StoreOverrides,
) -> Result<ResolvedConfig, ConfigError> {
    let project = read_config(root)?.unwrap_or_default();
    let global = read_global_config()?.unwrap_or_default();

    let task_command = resolve_task_command(overrides, &project, &global)?;

    let taskrc = pick_path(
        overrides.taskrc.clone(),
        project.taskrc.as_deref(),
        global.taskrc.as_deref(),
        root,
    );
    let data_location = pick_path(
        overrides.data_location.clone(),
        project.data_location.as_deref(),
        global.data_location.as_deref(),
        root,
    );

    let scope_attribute = if let Some(value) = non_empty(overrides.scope_attribute.as_deref()) {
        Resolved { value, source: "flag" }
    } else if let Some(value) = non_empty(project.scope_attribute.as_deref()) {
        Resolved {
            value,
            source: "project",
        }
    } else if let Some(value) = non_empty(global.scope_attribute.as_deref()) {
        Resolved {
            value,
            source: "global",
        }
    } else {
        Resolved {
            value: DEFAULT_SCOPE_ATTRIBUTE.to_string(),
            source: "default",
        }
    };

    Ok(ResolvedConfig {
        task_command,
        taskrc,
        data_location,
        scope_attribute,
    })
}

fn resolve_task_command(
    overrides: &StoreOverrides,
    project: &TasksyncConfig,
    global: &TasksyncConfig,
) -> Result<Resolved<Vec<String>>, ConfigError> {
    let env_value = std::env::var(TASK_COMMAND_ENV).ok();
    let layers = [
        (overrides.task_command.as_deref(), "flag"),
        (env_value.as_deref(), "env"),
        (project.task_command.as_deref(), "project"),
        (global.task_command.as_deref(), "global"),
    ];
    for (value, source) in layers {
        if let Some(raw) = non_empty(value) {
            return Ok(Resolved {
                value: split_command(&raw)?,
                source,
            });
        }
    }
    if let Ok(path) = which::which("task") {
        return Ok(Resolved {
            value: vec![path.to_string_lossy().to_string()],
            source: "path",
        });
    }
    Ok(Resolved {
        value: vec![DEFAULT_TASK_BINARY.to_string()],
        source: "default",
    })
}

pub fn split_command(raw: &str) -> Result<Vec<String>, ConfigError> {
    let parts = shell_words::split(raw).map_err(|_| ConfigError::Command(raw.to_string()))?;
    if parts.is_empty() {
        return Err(ConfigError::Command(raw.to_string()));
    }
    Ok(parts)
}

fn pick_path(
    flag: Option<PathBuf>,
    project: Option<&str>,
    global: Option<&str>,
    root: &Path,
) -> Option<Resolved<PathBuf>> {
    if let Some(value) = flag {
        return Some(Resolved {
            value,
            source: "flag",
        });
    }
    if let Some(value) = non_empty(project) {
        let path = PathBuf::from(value);
        let value = if path.is_relative() {
            root.join(path)
        } else {
            path
        };
        return Some(Resolved {
            value,
            source: "project",
        });
    }
    non_empty(global).map(|value| Resolved {
        value: PathBuf::from(value),
        source: "global",
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use tempfile::TempDir;

    fn with_env_lock<T>(f: impl FnOnce() -> T) -> T {
        let _guard = crate::test_env::lock();
        f()
    }

    struct EnvGuard {
        tasksync_home: Option<OsString>,
        task_cmd: Option<OsString>,
    }

    impl EnvGuard {
        fn capture() -> Self {
            Self {
                tasksync_home: std::env::var_os(HOME_ENV),
                task_cmd: std::env::var_os(TASK_COMMAND_ENV),
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match self.tasksync_home.as_ref() {
                Some(value) => std::env::set_var(HOME_ENV, value),
                None => std::env::remove_var(HOME_ENV),
            }
            match self.task_cmd.as_ref() {
                Some(value) => std::env::set_var(TASK_COMMAND_ENV, value),
                None => std::env::remove_var(TASK_COMMAND_ENV),
            }
        }
    }

    #[test]
    fn write_and_read_config() {
        let temp = TempDir::new().expect("tempdir");
        let config = TasksyncConfig {
            task_command: Some("task rc.gc=off".to_string()),
            taskrc: None,
            data_location: Some("tasks".to_string()),
            scope_attribute: Some("notepath".to_string()),
        };
        write_config(temp.path(), &config).expect("write config");
        let loaded = load_config(temp.path()).expect("load config");
        assert_eq!(loaded, config);
    }

    #[test]
    fn find_config_root_walks_ancestors() {
        let temp = TempDir::new().expect("tempdir");
        let nested = temp.path().join("notes").join("daily");
        fs::create_dir_all(&nested).expect("nested");
        assert_eq!(find_config_root(&nested), None);
        fs::write(temp.path().join(".tasksyncrc"), "").expect("rc");
        let root = find_config_root(&nested).expect("root");
        assert_eq!(
            root,
            temp.path().canonicalize().expect("canonical")
        );
    }

    #[test]
    fn resolve_rejects_malformed_project_config() {
        with_env_lock(|| {
            let _env = EnvGuard::capture();
            let repo = TempDir::new().expect("repo tempdir");
            let home = TempDir::new().expect("home tempdir");
            std::env::set_var(HOME_ENV, home.path());
            fs::write(
                repo.path().join(".tasksync.toml"),
                "data_location = \"/srv/tasks\"\nscope_attribute = notepath\n",
            )
            .expect("project config");

            let err = resolve_config(repo.path(), &StoreOverrides::default())
                .expect_err("malformed config");
            match err {
                ConfigError::Parse { path, .. } => {
                    assert_eq!(path, repo.path().join(".tasksync.toml"))
                }
                other => panic!("unexpected error: {other}"),
            }
            assert_eq!(load_config(repo.path()), None);
        });
    }

    #[test]
    fn resolve_rejects_malformed_global_config() {
        with_env_lock(|| {
            let _env = EnvGuard::capture();
            let repo = TempDir::new().expect("repo tempdir");
            let home = TempDir::new().expect("home tempdir");
            std::env::set_var(HOME_ENV, home.path());
            fs::write(home.path().join("config.toml"), "taskrc = [").expect("global config");

            let err = resolve_config(repo.path(), &StoreOverrides::default())
                .expect_err("malformed config");
            assert!(matches!(err, ConfigError::Parse { .. }));
        });
    }

    #[test]
    fn split_command_uses_shell_rules() {
        assert_eq!(
            split_command("'/opt/my tools/task' rc.gc=off").expect("split"),
            vec!["/opt/my tools/task", "rc.gc=off"]
        );
        assert!(matches!(split_command("   "), Err(ConfigError::Command(_))));
        assert!(matches!(split_command("task 'open"), Err(ConfigError::Command(_))));
    }

    #[test]
    fn resolve_prefers_flag_then_env_then_project_then_global() {
        with_env_lock(|| {
            let _env = EnvGuard::capture();
            let repo = TempDir::new().expect("repo tempdir");
            let home = TempDir::new().expect("home tempdir");
            std::env::set_var(HOME_ENV, home.path());
            std::env::remove_var(TASK_COMMAND_ENV);

            fs::write(
                home.path().join("config.toml"),
                "task_command = \"global-task\"\nscope_attribute = \"globalpath\"\ntaskrc = \"/etc/taskrc\"\n",
            )
            .expect("global config");
            let resolved = resolve_config(repo.path(), &StoreOverrides::default()).expect("resolve");
            assert_eq!(resolved.task_command.value, vec!["global-task"]);
            assert_eq!(resolved.task_command.source, "global");
            assert_eq!(resolved.scope_attribute.value, "globalpath");
            assert_eq!(
                resolved.taskrc,
                Some(Resolved {
                    value: PathBuf::from("/etc/taskrc"),
                    source: "global",
                })
            );

            fs::write(
                repo.path().join(".tasksync.toml"),
                "task_command = \"project-task\"\ndata_location = \"data\"\n",
            )
            .expect("project config");
            let resolved = resolve_config(repo.path(), &StoreOverrides::default()).expect("resolve");
            assert_eq!(resolved.task_command.source, "project");
            assert_eq!(
                resolved.data_location.map(|r| r.value),
                Some(repo.path().join("data"))
            );
            assert_eq!(resolved.scope_attribute.source, "global");

            std::env::set_var(TASK_COMMAND_ENV, "env-task rc.hooks=off");
            let resolved = resolve_config(repo.path(), &StoreOverrides::default()).expect("resolve");
            assert_eq!(resolved.task_command.value, vec!["env-task", "rc.hooks=off"]);
            assert_eq!(resolved.task_command.source, "env");

            let overrides = StoreOverrides {
                task_command: Some("flag-task".to_string()),
                scope_attribute: Some("flagpath".to_string()),
                ..StoreOverrides::default()
            };
            let resolved = resolve_config(repo.path(), &overrides).expect("resolve");
            assert_eq!(resolved.task_command.value, vec!["flag-task"]);
            assert_eq!(resolved.task_command.source, "flag");
            let options = resolved.store_options();
            assert_eq!(options.scope_attribute, "flagpath");
            assert_eq!(options.taskrc, Some(PathBuf::from("/etc/taskrc")));
        });
    }

    #[test]
    fn resolve_without_config_uses_defaults() {
        with_env_lock(|| {
            let _env = EnvGuard::capture();
            let repo = TempDir::new().expect("repo tempdir");
            let home = TempDir::new().expect("home tempdir");
            std::env::set_var(HOME_ENV, home.path());
            std::env::remove_var(TASK_COMMAND_ENV);

            let resolved = resolve_config(repo.path(), &StoreOverrides::default()).expect("resolve");
            assert_eq!(resolved.scope_attribute.value, DEFAULT_SCOPE_ATTRIBUTE);
            assert_eq!(resolved.scope_attribute.source, "default");
            assert!(matches!(resolved.task_command.source, "path" | "default"));
            assert_eq!(resolved.taskrc, None);
            assert_eq!(resolved.data_location, None);
        });
    }
}
