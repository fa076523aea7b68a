//! Task runner
//!
//! A runner drives exactly one task through its lifecycle:
//!
//! ```text
//! Idle --run--> Running --ok--> Succeeded
//!                  \----err---> Erred
//! ```
//!
//! A forever task that started successfully stays `Running` after `run`
//! returns. It leaves that state when it reports a fault or is disposed.

use crate::error::{
    DeoError, DisposalError, DisposalResult, ExecutionError, ExecutionResult, Result, UsageError,
};
use crate::runner::{ExecMode, RunContext, SharedTask};
use crate::utils::{format_elapsed, lock};
use futures::future::{BoxFuture, FutureExt};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::sync::Notify;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn, Instrument};

/// Lifecycle state of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running,
    Succeeded,
    Erred,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunnerState::Idle => "idle",
            RunnerState::Running => "running",
            RunnerState::Succeeded => "succeeded",
            RunnerState::Erred => "erred",
        };
        f.write_str(s)
    }
}

type FaultReceiver = oneshot::Receiver<ExecutionError>;

/// Drives one task; never reused
pub struct TaskRunner {
    context: RunContext,
    state: Mutex<RunnerState>,
    task: Mutex<Option<SharedTask>>,
    children: Mutex<Vec<Arc<TaskRunner>>>,
    disposed: AtomicBool,
    idle: Option<Arc<Notify>>,
}

impl TaskRunner {
    pub fn new(context: RunContext) -> Arc<Self> {
        Arc::new(Self::build(context, None))
    }

    /// Runner that wakes `idle` waiters on every terminal transition
    pub(crate) fn with_notify(context: RunContext, idle: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self::build(context, Some(idle)))
    }

    fn build(context: RunContext, idle: Option<Arc<Notify>>) -> Self {
        TaskRunner {
            context,
            state: Mutex::new(RunnerState::Idle),
            task: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
            idle,
        }
    }

    pub fn state(&self) -> RunnerState {
        *lock(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunnerState::Running
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Terminal and disposed, with no child still holding resources
    pub fn is_settled(&self) -> bool {
        matches!(self.state(), RunnerState::Succeeded | RunnerState::Erred)
            && lock(&self.children)
                .iter()
                .all(|c| c.state() == RunnerState::Idle || c.is_settled())
    }

    /// Name of the task this runner was given, if any
    pub fn task_name(&self) -> Option<String> {
        lock(&self.task).as_ref().map(|t| t.name().to_string())
    }

    /// Run `task` to completion, or until started for forever tasks
    pub fn run(self: &Arc<Self>, task: SharedTask) -> BoxFuture<'static, Result<()>> {
        let runner = Arc::clone(self);
        let span = self.context.span().clone();
        async move { runner.run_inner(task).await }
            .instrument(span)
            .boxed()
    }

    async fn run_inner(self: Arc<Self>, task: SharedTask) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if *state != RunnerState::Idle {
                return Err(UsageError::RunnerReused.into());
            }
            *state = RunnerState::Running;
        }
        *lock(&self.task) = Some(Arc::clone(&task));
        self.context.mark_started();
        info!("Starting '{}'", task.name());

        for dependent in task.dependent_tasks() {
            let options = self.context.interpolate(dependent.options());
            let child_ctx = self.context.child(dependent.name(), options);
            let child = Arc::new(Self::build(child_ctx, self.idle.clone()));
            lock(&self.children).push(Arc::clone(&child));

            if let Err(e) = child.run(Arc::clone(dependent)).await {
                return self.finish(Err(e)).await;
            }
        }

        let mut faults = self.context.take_fault_receiver();
        let result = self.execute(&task, &mut faults).await;

        if task.runs_forever() && result.is_ok() {
            info!("Started '{}'", task.name());
            if let Some(rx) = faults {
                self.watch_faults(rx);
            }
            return Ok(());
        }

        self.finish(result.map_err(DeoError::from)).await
    }

    async fn execute(
        &self,
        task: &SharedTask,
        faults: &mut Option<FaultReceiver>,
    ) -> ExecutionResult<()> {
        let result = match task.mode() {
            ExecMode::Sync => {
                let ctx = &self.context;
                let outcome = self
                    .context
                    .span()
                    .in_scope(|| panic::catch_unwind(AssertUnwindSafe(|| task.exec(ctx))));
                match outcome {
                    Ok(result) => result,
                    Err(payload) => Err(ExecutionError::Panicked(panic_message(payload.as_ref()))),
                }
            }
            ExecMode::Async => self.execute_async(task, faults).await,
        };

        // a fault sent while exec was still running counts as the result
        match result {
            Ok(()) => match take_pending_fault(faults) {
                Some(err) => Err(err),
                None => Ok(()),
            },
            err => err,
        }
    }

    async fn execute_async(
        &self,
        task: &SharedTask,
        faults: &mut Option<FaultReceiver>,
    ) -> ExecutionResult<()> {
        let task = Arc::clone(task);
        let ctx = self.context.clone();
        let mut handle = tokio::spawn(
            async move { task.exec_async(&ctx).await }.instrument(self.context.span().clone()),
        );

        let Some(rx) = faults.as_mut() else {
            return flatten_join(handle.await);
        };

        enum Race {
            Done(std::result::Result<ExecutionResult<()>, JoinError>),
            Fault(std::result::Result<ExecutionError, oneshot::error::RecvError>),
        }

        let race = tokio::select! {
            joined = &mut handle => Race::Done(joined),
            fault = rx => Race::Fault(fault),
        };

        match race {
            Race::Done(joined) => flatten_join(joined),
            Race::Fault(Ok(err)) => {
                handle.abort();
                *faults = None;
                Err(err)
            }
            Race::Fault(Err(_)) => {
                // reporter closed by dispose; let exec wind down on its own
                *faults = None;
                flatten_join(handle.await)
            }
        }
    }

    fn watch_faults(self: &Arc<Self>, rx: FaultReceiver) {
        let runner = Arc::clone(self);
        let span = self.context.span().clone();
        tokio::spawn(
            async move {
                if let Ok(err) = rx.await {
                    if runner.is_running() {
                        error!("Task failed after start: {}", err);
                        let _ = runner.finish(Err(err.into())).await;
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Dispose the task and move to the terminal state matching `result`
    async fn finish(&self, result: Result<()>) -> Result<()> {
        if let Err(e) = self.dispose_task().await {
            error!("{}", e);
        }

        let name = self.task_name().unwrap_or_default();
        let next = match &result {
            Ok(()) => RunnerState::Succeeded,
            Err(e) => {
                debug!("'{}' failed: {}", name, e);
                RunnerState::Erred
            }
        };
        if self.transition(next) && next == RunnerState::Succeeded {
            info!(
                "Finished '{}' after {}",
                name,
                format_elapsed(self.context.elapsed())
            );
        }

        result
    }

    async fn dispose_task(&self) -> DisposalResult {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.context.faults().close();

        let task = lock(&self.task).clone();
        match task {
            Some(task) => {
                debug!("Disposing '{}'", task.name());
                task.dispose(&self.context)
                    .instrument(self.context.span().clone())
                    .await
            }
            None => Ok(()),
        }
    }

    /// Release everything this runner started.
    ///
    /// Runs at most once; a runner that never ran has nothing to release.
    /// A forever task that was still running counts as succeeded unless its
    /// disposal fails; any other task interrupted here counts as erred.
    pub fn dispose(&self) -> BoxFuture<'_, DisposalResult> {
        async move {
            let mut first_error: Option<DisposalError> = None;

            let children = lock(&self.children).clone();
            for child in children.iter().rev() {
                if let Err(e) = child.dispose().await {
                    warn!("{}", e);
                    first_error.get_or_insert(e);
                }
            }

            let task = lock(&self.task).clone();
            let Some(task) = task else {
                return first_error.map_or(Ok(()), Err);
            };

            let result = self.dispose_task().await;
            let next = if task.runs_forever() && result.is_ok() {
                RunnerState::Succeeded
            } else {
                RunnerState::Erred
            };
            if self.transition(next) {
                info!(
                    "Stopped '{}' after {}",
                    task.name(),
                    format_elapsed(self.context.elapsed())
                );
            }

            match (result, first_error) {
                (Err(e), _) => Err(e),
                (Ok(()), Some(e)) => Err(e),
                (Ok(()), None) => Ok(()),
            }
        }
        .instrument(self.context.span().clone())
        .boxed()
    }

    /// Terminal transition; only ever taken from `Running`
    fn transition(&self, next: RunnerState) -> bool {
        {
            let mut state = lock(&self.state);
            if *state != RunnerState::Running {
                return false;
            }
            *state = next;
        }
        self.context.mark_ended();
        if let Some(idle) = &self.idle {
            idle.notify_waiters();
        }
        true
    }
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("task", &self.task_name())
            .field("state", &self.state())
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .finish()
    }
}

fn take_pending_fault(faults: &mut Option<FaultReceiver>) -> Option<ExecutionError> {
    let rx = faults.as_mut()?;
    match rx.try_recv() {
        Ok(err) => {
            *faults = None;
            Some(err)
        }
        Err(TryRecvError::Empty) => None,
        Err(TryRecvError::Closed) => {
            *faults = None;
            None
        }
    }
}

fn flatten_join(joined: std::result::Result<ExecutionResult<()>, JoinError>) -> ExecutionResult<()> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(ExecutionError::Panicked(panic_message(
            e.into_panic().as_ref(),
        ))),
        Err(_) => Err(ExecutionError::Failed("task was cancelled".to_string())),
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{FnTask, TaskOptions};

    #[tokio::test]
    async fn test_sync_success() {
        let runner = TaskRunner::new(RunContext::new("ok"));
        runner.run(FnTask::new("ok", |_| Ok(())).shared()).await.unwrap();

        assert_eq!(runner.state(), RunnerState::Succeeded);
        assert!(runner.context().has_ended());
    }

    #[tokio::test]
    async fn test_sync_failure() {
        let runner = TaskRunner::new(RunContext::new("bad"));
        let task = FnTask::new("bad", |_| Err(ExecutionError::Failed("nope".into()))).shared();

        let err = runner.run(task).await.unwrap_err();
        assert!(matches!(err, DeoError::Execution(ExecutionError::Failed(m)) if m == "nope"));
        assert_eq!(runner.state(), RunnerState::Erred);
    }

    #[tokio::test]
    async fn test_sync_panic_is_captured() {
        let runner = TaskRunner::new(RunContext::new("boom"));
        let task = FnTask::new("boom", |_| panic!("kaboom")).shared();

        let err = runner.run(task).await.unwrap_err();
        assert!(matches!(err, DeoError::Execution(ExecutionError::Panicked(m)) if m == "kaboom"));
        assert_eq!(runner.state(), RunnerState::Erred);
    }

    #[tokio::test]
    async fn test_second_run_is_rejected() {
        let runner = TaskRunner::new(RunContext::new("once"));
        let task = FnTask::new("once", |_| Ok(())).shared();

        runner.run(Arc::clone(&task)).await.unwrap();
        let err = runner.run(task).await.unwrap_err();

        assert!(matches!(err, DeoError::Usage(UsageError::RunnerReused)));
        assert_eq!(runner.state(), RunnerState::Succeeded);
    }

    #[tokio::test]
    async fn test_dispose_before_run_is_noop() {
        let runner = TaskRunner::new(RunContext::new("idle"));
        runner.dispose().await.unwrap();
        assert_eq!(runner.state(), RunnerState::Idle);
    }

    #[tokio::test]
    async fn test_dependents_share_scratch() {
        let producer = FnTask::new("producer", |ctx| {
            ctx.set("value", 7_i32);
            Ok(())
        })
        .shared();
        let consumer = FnTask::new("consumer", |ctx| match ctx.get::<i32>("value") {
            Some(v) if *v == 7 => Ok(()),
            _ => Err(ExecutionError::Failed("value missing".into())),
        })
        .with_dependents(vec![producer])
        .with_options(TaskOptions::default())
        .shared();

        let root = RunContext::new("consumer");
        let runner = TaskRunner::new(root.clone());
        runner.run(consumer).await.unwrap();
        assert_eq!(root.children().len(), 1);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(3_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
