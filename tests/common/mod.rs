//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use deo::error::{ExecutionError, ExecutionResult};
use deo::runner::{ExecMode, FaultReporter, RunContext, SharedTask, Task, TaskOptions};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Create a temporary directory with a deofile.yml file
pub fn create_test_deofile(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("deofile.yml");
    fs::write(&path, content).unwrap();
    (temp_dir, path)
}

/// Shared log of task names, in execution order
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }
}

/// Task that starts, then keeps running until disposed or faulted
pub struct ForeverTask {
    name: String,
    options: TaskOptions,
    journal: Journal,
    reporter: Arc<Mutex<Option<FaultReporter>>>,
    fail_disposal: bool,
}

impl ForeverTask {
    pub fn new(name: &str, journal: &Journal) -> Self {
        ForeverTask {
            name: name.to_string(),
            options: TaskOptions::default(),
            journal: journal.clone(),
            reporter: Arc::new(Mutex::new(None)),
            fail_disposal: false,
        }
    }

    pub fn failing_disposal(mut self) -> Self {
        self.fail_disposal = true;
        self
    }

    /// Handle for raising a fault after the task started
    pub fn trigger(&self) -> FaultTrigger {
        FaultTrigger(Arc::clone(&self.reporter))
    }

    pub fn shared(self) -> SharedTask {
        Arc::new(self)
    }
}

#[derive(Clone)]
pub struct FaultTrigger(Arc<Mutex<Option<FaultReporter>>>);

impl FaultTrigger {
    pub fn fire(&self, message: &str) -> bool {
        match self.0.lock().unwrap().as_ref() {
            Some(reporter) => reporter.report(ExecutionError::Failed(message.to_string())),
            None => false,
        }
    }
}

#[async_trait]
impl Task for ForeverTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> &TaskOptions {
        &self.options
    }

    fn mode(&self) -> ExecMode {
        ExecMode::Async
    }

    fn runs_forever(&self) -> bool {
        true
    }

    async fn exec_async(&self, ctx: &RunContext) -> ExecutionResult<()> {
        *self.reporter.lock().unwrap() = Some(ctx.faults());
        self.journal.record(format!("{}:start", self.name));
        Ok(())
    }

    async fn dispose(&self, _ctx: &RunContext) -> deo::error::DisposalResult {
        self.journal.record(format!("{}:dispose", self.name));
        if self.fail_disposal {
            return Err(deo::error::DisposalError::new(&self.name, "refused to stop"));
        }
        Ok(())
    }
}
