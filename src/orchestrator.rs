//! The orchestrator
//!
//! [`Deo`] owns the configuration and every runner it ever created. Running
//! a target resolves its dependency closure, runs each dependency on its own
//! runner, then runs the target itself. `kill` disposes everything that is
//! still holding resources.

use crate::config::{parse_deofile_file, Config, Property};
use crate::error::{DisposalError, ExecutionResult, Result, UsageError};
use crate::runner::{
    FnTask, RunContext, RunnerState, Scratch, SharedTask, TargetInvoker, TaskFactory, TaskOptions,
    TaskRunner,
};
use crate::utils::{format_elapsed, lock};
use async_trait::async_trait;
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;
use tracing::{debug, info, trace};

struct DeoInner {
    config: Mutex<Config>,
    runners: Mutex<Vec<Arc<TaskRunner>>>,
    failed: Mutex<Vec<String>>,
    scratch: Scratch,
    idle: Arc<Notify>,
    me: Weak<DeoInner>,
}

/// Task orchestrator; cheap to clone, clones share all state
#[derive(Clone)]
pub struct Deo {
    inner: Arc<DeoInner>,
}

impl Deo {
    /// Orchestrator with no task kinds registered
    pub fn new() -> Self {
        Self::with_config(Config::new())
    }

    /// Orchestrator with the built-in task kinds registered
    pub fn with_builtin_tasks() -> Self {
        let mut config = Config::new();
        crate::tasks::register_builtin(&mut config);
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Self {
        let inner = Arc::new_cyclic(|me| DeoInner {
            config: Mutex::new(config),
            runners: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
            scratch: Scratch::new(),
            idle: Arc::new(Notify::new()),
            me: me.clone(),
        });
        Deo { inner }
    }

    /// Run a target after all of its transitive dependencies
    pub async fn run_task(&self, name: &str) -> Result<()> {
        self.inner.run_task(name).await
    }

    /// Run targets one after another, stopping at the first failure
    pub async fn run_tasks<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        for name in names {
            self.run_task(name.as_ref()).await?;
        }
        Ok(())
    }

    /// Whether any runner is still running
    pub fn is_running(&self) -> bool {
        lock(&self.inner.runners).iter().any(|r| r.is_running())
    }

    /// Resolve once no runner is running
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }

    /// Dispose every runner this orchestrator created.
    ///
    /// Keeps going past failures and returns all of them.
    pub async fn kill(&self) -> Vec<DisposalError> {
        let runners = lock(&self.inner.runners).clone();
        debug!("Cleaning up {} runner(s)", runners.len());

        let mut errors = Vec::new();
        for runner in runners.iter().rev() {
            if let Err(e) = runner.dispose().await {
                errors.push(e);
            }
        }
        errors
    }

    /// Tracked runners, oldest first.
    ///
    /// Settled runners are dropped when the next `run_task` starts.
    pub fn runners(&self) -> Vec<Arc<TaskRunner>> {
        lock(&self.inner.runners).clone()
    }

    /// Names of every task whose runner ended in error
    pub fn failed_tasks(&self) -> Vec<String> {
        let mut failed = lock(&self.inner.failed).clone();
        failed.extend(
            lock(&self.inner.runners)
                .iter()
                .filter(|r| r.state() == RunnerState::Erred)
                .filter_map(|r| r.task_name()),
        );
        failed
    }

    /// Scratch space shared by every run of this orchestrator
    pub fn scratch(&self) -> &Scratch {
        &self.inner.scratch
    }

    pub fn register_task_kind(&self, name: impl Into<String>, factory: TaskFactory) {
        lock(&self.inner.config).register_task_kind(name, factory);
    }

    /// Register targets declared as `kind -> name -> options`
    pub fn register_targets(&self, declarations: &Mapping) -> Result<Vec<String>> {
        lock(&self.inner.config).register_targets(declarations)
    }

    pub fn register_target(&self, name: &str, task: SharedTask, dependencies: &[String]) -> Result<()> {
        if name.is_empty() {
            return Err(UsageError::MissingName.into());
        }
        lock(&self.inner.config).register_target(name, task, dependencies)?;
        Ok(())
    }

    /// Register a target whose body is a closure
    pub fn register_custom_target<F>(&self, name: &str, dependencies: &[String], body: F) -> Result<()>
    where
        F: Fn(&RunContext) -> ExecutionResult<()> + Send + Sync + 'static,
    {
        self.register_target(name, FnTask::new(name, body).shared(), dependencies)
    }

    pub fn set_property(&self, key: &str, value: impl Into<Property>) -> Result<()> {
        lock(&self.inner.config)
            .properties_mut()
            .set_property(key, value)?;
        Ok(())
    }

    pub fn set_properties(&self, tree: &Value) {
        lock(&self.inner.config).properties_mut().set_properties(tree);
    }

    pub fn get_property(&self, key: &str) -> Option<String> {
        lock(&self.inner.config).properties().get_property(key)
    }

    pub fn interpolate(&self, s: &str) -> String {
        lock(&self.inner.config).properties().interpolate(s)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.inner.config).set_setting(key, value)?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<String> {
        Ok(lock(&self.inner.config).get_setting(key)?)
    }

    /// Load a deofile; its directory becomes the default `cwd`
    pub fn load_deofile(&self, path: &Path) -> Result<Vec<String>> {
        let deofile = parse_deofile_file(path)?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let base_dir = base_dir.canonicalize().unwrap_or_else(|_| base_dir.to_path_buf());

        let mut config = lock(&self.inner.config);
        deofile.apply(&mut config, &base_dir)
    }

    /// Registered targets with their direct dependencies, sorted by name
    pub fn targets(&self) -> Vec<(String, Vec<String>)> {
        let config = lock(&self.inner.config);
        config
            .targets()
            .map(|(name, _)| {
                let deps = config.graph().dependencies_of(name).unwrap_or_default();
                (name.to_string(), deps)
            })
            .collect()
    }
}

impl Default for Deo {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Deo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deo")
            .field("config", &*lock(&self.inner.config))
            .field("runners", &lock(&self.inner.runners).len())
            .finish()
    }
}

impl DeoInner {
    async fn run_task(&self, name: &str) -> Result<()> {
        self.prune();
        let (target, dependencies, cwd) = {
            let config = lock(&self.config);
            let target = config.get_target(name)?;
            let dependencies = config.target_dependencies(name)?;
            (target, dependencies, config.settings().cwd.clone())
        };

        let invoker: Weak<dyn TargetInvoker> = self.me.clone();
        let root = RunContext::builder(name)
            .with_cwd(cwd)
            .with_scratch(self.scratch.clone())
            .with_invoker(invoker)
            .build();
        root.mark_started();

        if !dependencies.is_empty() {
            debug!("'{}' depends on: {}", name, dependencies.join(", "));
        }

        let result = self.run_chain(&root, name, target, &dependencies).await;
        root.mark_ended();
        if result.is_ok() {
            info!("'{}' done after {}", name, format_elapsed(root.elapsed()));
        }
        result
    }

    /// Forget runners that have nothing left to dispose
    fn prune(&self) {
        let mut runners = lock(&self.runners);
        let before = runners.len();
        let mut failed = lock(&self.failed);
        runners.retain(|runner| {
            if !runner.is_settled() {
                return true;
            }
            if runner.state() == RunnerState::Erred {
                failed.extend(runner.task_name());
            }
            false
        });
        if runners.len() < before {
            trace!("dropped {} settled runner(s)", before - runners.len());
        }
    }

    async fn run_chain(
        &self,
        root: &RunContext,
        name: &str,
        target: SharedTask,
        dependencies: &[String],
    ) -> Result<()> {
        for dependency in dependencies {
            let task = lock(&self.config).get_target(dependency)?;
            self.run_one(root, dependency, task).await?;
        }
        self.run_one(root, name, target).await
    }

    async fn run_one(&self, root: &RunContext, name: &str, task: SharedTask) -> Result<()> {
        // interpolate as late as possible so properties set since
        // registration are seen
        let options = self.interpolate_options(task.options());
        let ctx = root.child(name, options);

        let runner = TaskRunner::with_notify(ctx, Arc::clone(&self.idle));
        lock(&self.runners).push(Arc::clone(&runner));
        runner.run(task).await
    }
}

#[async_trait]
impl TargetInvoker for DeoInner {
    async fn run_target(&self, name: &str) -> Result<()> {
        self.run_task(name).await
    }

    fn interpolate_options(&self, options: &TaskOptions) -> TaskOptions {
        options.interpolated(lock(&self.config).properties())
    }
}
