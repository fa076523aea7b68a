//! Task capability and task options
//!
//! A task is a named unit of work. Concrete kinds (shell commands, file
//! operations, watchers, closures) implement [`Task`]; the engine only ever
//! talks to them through this trait.

use crate::config::PropertyStore;
use crate::error::{ConfigError, ConfigResult, DisposalResult, ExecutionError, ExecutionResult};
use crate::runner::RunContext;
use async_trait::async_trait;
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::sync::Arc;

/// Shared handle to a task
pub type SharedTask = Arc<dyn Task>;

/// Builds a task of one kind from its options
pub type TaskFactory = Arc<dyn Fn(TaskOptions) -> ConfigResult<SharedTask> + Send + Sync>;

/// Wrap a constructor as a [`TaskFactory`]
pub fn factory<F>(f: F) -> TaskFactory
where
    F: Fn(TaskOptions) -> ConfigResult<SharedTask> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// How a task's body is invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// [`Task::exec`] runs to completion on the calling thread
    Sync,
    /// [`Task::exec_async`] resolves when the task is done (or, for forever
    /// tasks, started)
    Async,
}

/// A named, configurable unit of work
#[async_trait]
pub trait Task: Send + Sync {
    /// Task name
    fn name(&self) -> &str;

    /// Options the task was constructed with, before interpolation
    fn options(&self) -> &TaskOptions;

    /// Which of `exec` / `exec_async` carries the task body
    fn mode(&self) -> ExecMode {
        ExecMode::Sync
    }

    /// Synchronous body
    fn exec(&self, ctx: &RunContext) -> ExecutionResult<()> {
        let _ = ctx;
        Err(ExecutionError::Failed(format!(
            "task '{}' has no synchronous body",
            self.name()
        )))
    }

    /// Asynchronous body.
    ///
    /// Errors raised after the returned future resolved must be sent through
    /// [`RunContext::faults`].
    async fn exec_async(&self, ctx: &RunContext) -> ExecutionResult<()> {
        let _ = ctx;
        Err(ExecutionError::Failed(format!(
            "task '{}' has no asynchronous body",
            self.name()
        )))
    }

    /// Release anything acquired by `exec`.
    ///
    /// May be called before `exec` produced anything.
    async fn dispose(&self, ctx: &RunContext) -> DisposalResult {
        let _ = ctx;
        Ok(())
    }

    /// A successful exec of a forever task means "started", not "finished"
    fn runs_forever(&self) -> bool {
        false
    }

    /// Sub-tasks run by the task runner before this task
    fn dependent_tasks(&self) -> &[SharedTask] {
        &[]
    }
}

impl fmt::Debug for dyn Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name())
            .field("mode", &self.mode())
            .field("forever", &self.runs_forever())
            .finish()
    }
}

/// Options of a task, as a YAML mapping.
///
/// A `src` option is always stored as a list, even when a single value was
/// given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOptions {
    values: Mapping,
}

impl TaskOptions {
    pub fn new(mut values: Mapping) -> Self {
        if let Some(src) = values.get_mut("src") {
            if !matches!(src, Value::Sequence(_) | Value::Null) {
                *src = Value::Sequence(vec![src.clone()]);
            }
        }
        TaskOptions { values }
    }

    /// Build options from a YAML value; `null` gives empty options
    pub fn from_value(value: Value) -> ConfigResult<Self> {
        match value {
            Value::Mapping(map) => Ok(Self::new(map)),
            Value::Null => Ok(Self::default()),
            other => Err(ConfigError::Invalid(format!(
                "task options must be a mapping, got {:?}",
                other
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(Value::String(key.to_string()), value.into());
        if key == "src" {
            *self = Self::new(std::mem::take(&mut self.values));
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// String form of a scalar option
    pub fn string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// A scalar option that must be present and non-empty
    pub fn require_string(&self, task: &str, key: &str) -> ConfigResult<String> {
        self.string(key)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingOption {
                task: task.to_string(),
                option: key.to_string(),
            })
    }

    /// Boolean option; absent means `false`
    pub fn flag(&self, key: &str) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.as_str(), "true" | "yes" | "1"),
            _ => false,
        }
    }

    /// List option; a single scalar counts as a one-element list
    pub fn list(&self, key: &str) -> ConfigResult<Vec<String>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Sequence(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    Value::Bool(b) => Ok(b.to_string()),
                    other => Err(ConfigError::InvalidOption {
                        name: key.to_string(),
                        error: format!("expected a list of strings, found {:?}", other),
                    }),
                })
                .collect(),
            Some(_) => Ok(self.string(key).into_iter().collect()),
        }
    }

    /// Source patterns, always a list
    pub fn src(&self) -> ConfigResult<Vec<String>> {
        self.list("src")
    }

    /// Names of the targets this one depends on
    pub fn dependencies(&self) -> ConfigResult<Vec<String>> {
        self.list("dependencies")
    }

    pub fn alias(&self) -> Option<String> {
        self.string("alias")
    }

    /// Nested mapping option
    pub fn mapping(&self, key: &str) -> Option<&Mapping> {
        match self.get(key)? {
            Value::Mapping(map) => Some(map),
            _ => None,
        }
    }

    /// Copy of these options with every string interpolated
    pub fn interpolated(&self, properties: &PropertyStore) -> Self {
        let mut value = Value::Mapping(self.values.clone());
        properties.interpolate_value(&mut value);
        match value {
            Value::Mapping(map) => Self::new(map),
            _ => self.clone(),
        }
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.values
    }
}

impl From<Mapping> for TaskOptions {
    fn from(values: Mapping) -> Self {
        Self::new(values)
    }
}

type TaskBody = dyn Fn(&RunContext) -> ExecutionResult<()> + Send + Sync;

/// Synchronous task backed by a closure.
///
/// Used for custom targets and for composing tasks programmatically.
pub struct FnTask {
    name: String,
    options: TaskOptions,
    body: Box<TaskBody>,
    dependents: Vec<SharedTask>,
}

impl FnTask {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&RunContext) -> ExecutionResult<()> + Send + Sync + 'static,
    {
        FnTask {
            name: name.into(),
            options: TaskOptions::default(),
            body: Box::new(body),
            dependents: Vec::new(),
        }
    }

    /// Attach sub-tasks that run before this one
    pub fn with_dependents(mut self, dependents: Vec<SharedTask>) -> Self {
        self.dependents = dependents;
        self
    }

    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }

    pub fn shared(self) -> SharedTask {
        Arc::new(self)
    }
}

#[async_trait]
impl Task for FnTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> &TaskOptions {
        &self.options
    }

    fn exec(&self, ctx: &RunContext) -> ExecutionResult<()> {
        (self.body)(ctx)
    }

    fn dependent_tasks(&self) -> &[SharedTask] {
        &self.dependents
    }
}
