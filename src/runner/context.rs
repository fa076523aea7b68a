//! Execution contexts
//!
//! Every task invocation gets a [`RunContext`]. Contexts form a tree rooted
//! at the context created for a `run_task` call; all of them share one
//! scratch space, so tasks can hand values to the tasks that run after them.

use crate::error::{ExecutionError, Result, UsageError};
use crate::runner::TaskOptions;
use crate::utils::lock;
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{info_span, Span};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Something that can run targets by name
#[async_trait]
pub trait TargetInvoker: Send + Sync {
    async fn run_target(&self, name: &str) -> Result<()>;

    /// Resolve placeholders in task options against current properties
    fn interpolate_options(&self, options: &TaskOptions) -> TaskOptions;
}

type ScratchMap = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// Key/value space shared by reference between contexts
#[derive(Clone, Default)]
pub struct Scratch {
    values: Arc<Mutex<ScratchMap>>,
}

impl Scratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed read; `None` when missing or stored with another type
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = lock(&self.values).get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        lock(&self.values).insert(key.into(), Arc::new(value));
    }

    pub fn remove(&self, key: &str) -> bool {
        lock(&self.values).remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.values).contains_key(key)
    }

    /// Whether both handles point at the same space
    pub fn same_as(&self, other: &Scratch) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}

impl fmt::Debug for Scratch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = lock(&self.values);
        f.debug_set().entries(map.keys()).finish()
    }
}

/// Single-shot channel for errors raised after a task reported success.
///
/// Only the first report is delivered; later ones are dropped.
#[derive(Clone)]
pub struct FaultReporter {
    sender: Arc<Mutex<Option<oneshot::Sender<ExecutionError>>>>,
}

impl FaultReporter {
    fn new(sender: oneshot::Sender<ExecutionError>) -> Self {
        FaultReporter {
            sender: Arc::new(Mutex::new(Some(sender))),
        }
    }

    /// Send a fault; returns whether it was delivered
    pub fn report(&self, error: ExecutionError) -> bool {
        match lock(&self.sender).take() {
            Some(sender) => sender.send(error).is_ok(),
            None => false,
        }
    }

    /// Whether a fault can still be delivered
    pub fn is_open(&self) -> bool {
        lock(&self.sender)
            .as_ref()
            .map(|s| !s.is_closed())
            .unwrap_or(false)
    }

    pub(crate) fn close(&self) {
        lock(&self.sender).take();
    }
}

impl fmt::Debug for FaultReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultReporter")
            .field("open", &self.is_open())
            .finish()
    }
}

#[derive(Default)]
struct Timing {
    start: Option<Instant>,
    end: Option<Instant>,
}

struct ContextNode {
    id: u64,
    name: String,
    options: TaskOptions,
    cwd: PathBuf,
    span: Span,
    timing: Mutex<Timing>,
    scratch: Scratch,
    invoker: Option<Weak<dyn TargetInvoker>>,
    children: Mutex<Vec<RunContext>>,
    faults: FaultReporter,
    fault_rx: Mutex<Option<oneshot::Receiver<ExecutionError>>>,
}

/// Per-invocation state of a task
#[derive(Clone)]
pub struct RunContext {
    node: Arc<ContextNode>,
}

/// Builder for root contexts
pub struct RunContextBuilder {
    name: String,
    options: TaskOptions,
    cwd: Option<PathBuf>,
    scratch: Option<Scratch>,
    invoker: Option<Weak<dyn TargetInvoker>>,
    parent_span: Option<Span>,
}

impl RunContextBuilder {
    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Share an existing scratch space instead of creating a new one
    pub fn with_scratch(mut self, scratch: Scratch) -> Self {
        self.scratch = Some(scratch);
        self
    }

    pub fn with_invoker(mut self, invoker: Weak<dyn TargetInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    fn with_parent_span(mut self, span: Span) -> Self {
        self.parent_span = Some(span);
        self
    }

    pub fn build(self) -> RunContext {
        let (tx, rx) = oneshot::channel();
        let span = match self.parent_span {
            Some(parent) => info_span!(parent: &parent, "task", name = %self.name),
            None => info_span!("task", name = %self.name),
        };
        let cwd = self
            .cwd
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        RunContext {
            node: Arc::new(ContextNode {
                id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                name: self.name,
                options: self.options,
                cwd,
                span,
                timing: Mutex::new(Timing::default()),
                scratch: self.scratch.unwrap_or_default(),
                invoker: self.invoker,
                children: Mutex::new(Vec::new()),
                faults: FaultReporter::new(tx),
                fault_rx: Mutex::new(Some(rx)),
            }),
        }
    }
}

impl RunContext {
    pub fn builder(name: impl Into<String>) -> RunContextBuilder {
        RunContextBuilder {
            name: name.into(),
            options: TaskOptions::default(),
            cwd: None,
            scratch: None,
            invoker: None,
            parent_span: None,
        }
    }

    /// Detached root context with its own scratch space
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder(name).build()
    }

    /// Create a child sharing scratch space, working directory and invoker
    pub fn child(&self, name: impl Into<String>, options: TaskOptions) -> RunContext {
        let mut builder = Self::builder(name)
            .with_options(options)
            .with_cwd(self.node.cwd.clone())
            .with_scratch(self.node.scratch.clone())
            .with_parent_span(self.node.span.clone());
        if let Some(invoker) = &self.node.invoker {
            builder = builder.with_invoker(invoker.clone());
        }

        let child = builder.build();
        lock(&self.node.children).push(child.clone());
        child
    }

    /// Unique id, stable for the lifetime of the context
    pub fn id(&self) -> u64 {
        self.node.id
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// Options of the running task, already interpolated
    pub fn options(&self) -> &TaskOptions {
        &self.node.options
    }

    pub fn cwd(&self) -> &Path {
        &self.node.cwd
    }

    /// Resolve a path against the working directory
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.node.cwd.join(path)
    }

    pub fn span(&self) -> &Span {
        &self.node.span
    }

    pub fn scratch(&self) -> &Scratch {
        &self.node.scratch
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.node.scratch.get(key)
    }

    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.node.scratch.set(key, value)
    }

    pub fn children(&self) -> Vec<RunContext> {
        lock(&self.node.children).clone()
    }

    /// Reporter for errors raised after the task's exec completed
    pub fn faults(&self) -> FaultReporter {
        self.node.faults.clone()
    }

    /// Time since start; frozen once the context has ended
    pub fn elapsed(&self) -> Duration {
        let timing = lock(&self.node.timing);
        match (timing.start, timing.end) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    pub fn has_started(&self) -> bool {
        lock(&self.node.timing).start.is_some()
    }

    pub fn has_ended(&self) -> bool {
        lock(&self.node.timing).end.is_some()
    }

    /// Interpolate options for a task about to run under this context.
    ///
    /// A detached context has no properties and returns them unchanged.
    pub fn interpolate(&self, options: &TaskOptions) -> TaskOptions {
        match self.node.invoker.as_ref().and_then(Weak::upgrade) {
            Some(invoker) => invoker.interpolate_options(options),
            None => options.clone(),
        }
    }

    /// Run a target through the orchestrator this context belongs to
    pub async fn run_task(&self, name: &str) -> Result<()> {
        let invoker = self
            .node
            .invoker
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| UsageError::Detached(self.node.name.clone()))?;
        invoker.run_target(name).await
    }

    pub(crate) fn mark_started(&self) {
        let mut timing = lock(&self.node.timing);
        if timing.start.is_none() {
            timing.start = Some(Instant::now());
        }
    }

    pub(crate) fn mark_ended(&self) {
        let mut timing = lock(&self.node.timing);
        timing.start.get_or_insert_with(Instant::now);
        if timing.end.is_none() {
            timing.end = Some(Instant::now());
        }
    }

    pub(crate) fn take_fault_receiver(&self) -> Option<oneshot::Receiver<ExecutionError>> {
        lock(&self.node.fault_rx).take()
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("id", &self.node.id)
            .field("name", &self.node.name)
            .field("cwd", &self.node.cwd)
            .field("elapsed", &self.elapsed())
            .finish()
    }
}
