//! Store client backed by the Taskwarrior `task` binary.
//!
//! Records are identified by Taskwarrior UUIDs and filed under a document
//! scope kept in a string UDA (`docpath` unless configured otherwise). Every
//! invocation declares that UDA through `rc.` overrides, so no taskrc edits
//! are needed.

use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::{StoreError, TaskStore};
use crate::record::{RecordId, Scope, StoreRecord, TaskStatus};

pub const DEFAULT_TASK_BINARY: &str = "/usr/local/bin/task";
pub const DEFAULT_SCOPE_ATTRIBUTE: &str = "docpath";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskwarriorOptions {
    /// Program followed by any leading arguments.
    pub command: Vec<String>,
    pub taskrc: Option<PathBuf>,
    pub data_location: Option<PathBuf>,
    pub scope_attribute: String,
}

impl Default for TaskwarriorOptions {
    fn default() -> Self {
        Self {
            command: vec![DEFAULT_TASK_BINARY.to_string()],
            taskrc: None,
            data_location: None,
            scope_attribute: DEFAULT_SCOPE_ATTRIBUTE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskwarriorStore {
    options: TaskwarriorOptions,
}

#[derive(Debug, Deserialize)]
struct ExportedTask {
    uuid: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    status: TaskStatus,
    #[serde(flatten)]
    attributes: Map<String, Value>,
}

fn created_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Created task (?P<uuid>[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})")
            .expect("created regex")
    })
}

fn attribute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("attribute regex"))
}

impl TaskwarriorStore {
    pub fn new(options: TaskwarriorOptions) -> Result<Self, StoreError> {
        if options.command.first().map(|p| p.trim().is_empty()).unwrap_or(true) {
            return Err(StoreError::Unavailable(
                "no task command configured".to_string(),
            ));
        }
        if !attribute_regex().is_match(&options.scope_attribute) {
            return Err(StoreError::Unavailable(format!(
                "invalid scope attribute name: {}",
                options.scope_attribute
            )));
        }
        Ok(Self { options })
    }

    pub fn options(&self) -> &TaskwarriorOptions {
        &self.options
    }

    /// Full argument vector (program first) for one invocation.
    pub fn command_line(&self, args: &[String]) -> Vec<String> {
        let attr = &self.options.scope_attribute;
        let mut line = self.options.command.clone();
        if let Some(taskrc) = &self.options.taskrc {
            line.push(format!("rc:{}", taskrc.display()));
        }
        if let Some(data) = &self.options.data_location {
            line.push(format!("rc.data.location={}", data.display()));
        }
        line.push("rc.confirmation=off".to_string());
        line.push("rc.verbose=new-uuid".to_string());
        line.push("rc.json.array=on".to_string());
        line.push(format!("rc.uda.{}.type=string", attr));
        line.push(format!("rc.uda.{}.label=Document", attr));
        line.extend(args.iter().cloned());
        line
    }

    fn run(&self, args: &[String]) -> Result<Output, StoreError> {
        let line = self.command_line(args);
        debug!(command = ?line, "running task");
        Command::new(&line[0])
            .args(&line[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| StoreError::Unavailable(format!("cannot run {}: {}", line[0], err)))
    }

    fn read(&self, args: &[String]) -> Result<String, StoreError> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(StoreError::Unavailable(failure_message(&output)));
        }
        stdout_text(output)
    }

    fn write(&self, args: &[String]) -> Result<String, StoreError> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(StoreError::Rejected(failure_message(&output)));
        }
        stdout_text(output)
    }

    fn export(&self, filter: Vec<String>) -> Result<Vec<StoreRecord>, StoreError> {
        let mut args = filter;
        args.push("export".to_string());
        let text = self.read(&args)?;
        self.parse_export(&text)
    }

    fn export_one(&self, id: &RecordId) -> Result<Option<StoreRecord>, StoreError> {
        let records = self.export(vec![id.to_string()])?;
        Ok(records
            .into_iter()
            .find(|record| record.id == *id && record.status != TaskStatus::Deleted))
    }

    fn parse_export(&self, text: &str) -> Result<Vec<StoreRecord>, StoreError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let tasks: Vec<ExportedTask> = serde_json::from_str(text)
            .map_err(|err| StoreError::Unavailable(format!("malformed export: {}", err)))?;
        Ok(tasks
            .into_iter()
            .map(|task| {
                let scope = task
                    .attributes
                    .get(&self.options.scope_attribute)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                StoreRecord {
                    id: RecordId::new(task.uuid),
                    description: task.description,
                    scope: Scope::new(scope),
                    status: task.status,
                }
            })
            .collect())
    }
}

impl TaskStore for TaskwarriorStore {
    fn query(&self, scope: &Scope) -> Result<Vec<StoreRecord>, StoreError> {
        let filter = vec![
            format!("{}.any:", self.options.scope_attribute),
            "status.not:deleted".to_string(),
        ];
        let records = self.export(filter)?;
        Ok(records
            .into_iter()
            .filter(|record| &record.scope == scope && record.status != TaskStatus::Deleted)
            .collect())
    }

    fn create(&mut self, scope: &Scope, description: &str) -> Result<StoreRecord, StoreError> {
        if description.trim().is_empty() {
            return Err(StoreError::Rejected("empty description".to_string()));
        }
        let args = vec![
            "add".to_string(),
            format!(
                "{}:{}",
                self.options.scope_attribute,
                quote_value(scope.as_str())
            ),
            "--".to_string(),
            description.to_string(),
        ];
        let stdout = self.write(&args)?;
        let uuid = created_regex()
            .captures(&stdout)
            .and_then(|caps| caps.name("uuid"))
            .map(|m| RecordId::new(m.as_str()))
            .ok_or_else(|| {
                StoreError::Unavailable(format!(
                    "no task uuid in add output: {}",
                    stdout.trim()
                ))
            })?;
        debug!(%uuid, %scope, "created task");
        self.export_one(&uuid)?.ok_or_else(|| {
            StoreError::Unavailable(format!("created task {} not found on re-read", uuid))
        })
    }

    fn update(
        &mut self,
        id: &RecordId,
        description: &str,
        status: Option<TaskStatus>,
    ) -> Result<StoreRecord, StoreError> {
        if description.trim().is_empty() {
            return Err(StoreError::Rejected("empty description".to_string()));
        }
        let current = self
            .export_one(id)?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if current.description != description {
            self.write(&[
                id.to_string(),
                "modify".to_string(),
                "--".to_string(),
                description.to_string(),
            ])?;
        }
        match status {
            Some(next) if next == current.status => {}
            Some(TaskStatus::Completed) => {
                self.write(&[id.to_string(), "done".to_string()])?;
            }
            Some(next) => {
                self.write(&[
                    id.to_string(),
                    "modify".to_string(),
                    format!("status:{}", next),
                ])?;
            }
            None => {}
        }
        debug!(%id, "updated task");

        self.export_one(id)?
            .ok_or_else(|| StoreError::Unavailable(format!("task {} vanished during update", id)))
    }
}

fn stdout_text(output: Output) -> Result<String, StoreError> {
    String::from_utf8(output.stdout)
        .map_err(|_| StoreError::Unavailable("task output is not valid UTF-8".to_string()))
}

fn failure_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let code = output
        .status
        .code()
        .map(|code| code.to_string())
        .unwrap_or_else(|| "signal".to_string());
    if stderr.is_empty() {
        format!("task exited with {}", code)
    } else {
        format!("task exited with {}: {}", code, stderr)
    }
}

/// Quote an attribute value for the task command-line lexer when needed.
fn quote_value(value: &str) -> String {
    if !value
        .chars()
        .any(|c| c.is_whitespace() || c == '"' || c == '\'' || c == '\\')
    {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}
