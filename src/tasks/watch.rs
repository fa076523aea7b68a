//! `watch` task kind
//!
//! Watches paths for changes and runs targets when changed files match a
//! handler's pattern. Changes are batched: a batch closes once no event has
//! arrived for `debounce_ms`, and the next batch only starts after every
//! handler of the previous one has finished.

use crate::error::{ConfigError, ConfigResult, DisposalResult, ExecutionError, ExecutionResult};
use crate::runner::{ExecMode, FaultReporter, RunContext, SharedTask, Task, TaskOptions};
use crate::utils::lock;
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn, Instrument};

const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Targets to run when a changed file matches `pattern`
#[derive(Debug, Clone)]
struct Handler {
    name: String,
    pattern: Regex,
    targets: Vec<String>,
}

#[derive(Debug, Clone)]
struct WatchOptions {
    src: Vec<String>,
    exclude: Option<GlobSet>,
    debounce: Duration,
    handlers: Vec<Handler>,
}

impl WatchOptions {
    fn from_options(task: &str, options: &TaskOptions) -> ConfigResult<Self> {
        let missing = |option: &str| ConfigError::MissingOption {
            task: task.to_string(),
            option: option.to_string(),
        };

        let src = options.src()?;
        if src.is_empty() {
            return Err(missing("src"));
        }

        let exclude = options.list("exclude")?;
        let exclude = if exclude.is_empty() {
            None
        } else {
            Some(build_globset(&exclude)?)
        };

        let debounce = match options.string("debounce_ms") {
            Some(ms) => ms.parse::<u64>().map_err(|e| ConfigError::InvalidOption {
                name: "debounce_ms".to_string(),
                error: e.to_string(),
            })?,
            None => DEFAULT_DEBOUNCE_MS,
        };

        let declared = options.mapping("handlers").ok_or_else(|| missing("handlers"))?;
        let mut handlers = Vec::with_capacity(declared.len());
        for (name, handler) in declared {
            let name = name.as_str().unwrap_or_default().to_string();
            let handler = TaskOptions::from_value(handler.clone()).map_err(|_| {
                ConfigError::InvalidOption {
                    name: format!("handlers.{}", name),
                    error: "handler must be a mapping".to_string(),
                }
            })?;

            let pattern = handler.require_string(task, "pattern")?;
            let pattern = Regex::new(&pattern).map_err(|e| ConfigError::InvalidOption {
                name: format!("handlers.{}.pattern", name),
                error: e.to_string(),
            })?;
            let targets = handler.list("targets")?;
            if targets.is_empty() {
                return Err(missing(&format!("handlers.{}.targets", name)));
            }

            handlers.push(Handler {
                name,
                pattern,
                targets,
            });
        }

        Ok(WatchOptions {
            src,
            exclude,
            debounce: Duration::from_millis(debounce),
            handlers,
        })
    }

    /// Whether a changed path should be considered at all
    fn accepts(&self, path: &Path, root: &Path) -> bool {
        let hidden = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(false);
        if hidden {
            return false;
        }

        match &self.exclude {
            Some(exclude) => {
                let rel = path.strip_prefix(root).unwrap_or(path);
                !exclude.is_match(rel) && !exclude.is_match(path)
            }
            None => true,
        }
    }
}

fn build_globset(patterns: &[String]) -> ConfigResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| ConfigError::InvalidOption {
            name: "exclude".to_string(),
            error: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| ConfigError::InvalidOption {
        name: "exclude".to_string(),
        error: e.to_string(),
    })
}

/// Watcher and event loop of a running watch task
struct WatchHandle {
    watcher: Mutex<Option<RecommendedWatcher>>,
    events: Mutex<Option<JoinHandle<()>>>,
}

/// File watching task; always runs forever
pub struct WatchTask {
    name: String,
    options: TaskOptions,
}

impl WatchTask {
    pub fn new(options: TaskOptions) -> ConfigResult<Self> {
        let name = options.alias().unwrap_or_else(|| "watch".to_string());
        WatchOptions::from_options(&name, &options)?;
        Ok(WatchTask { name, options })
    }

    pub fn factory(options: TaskOptions) -> ConfigResult<SharedTask> {
        Ok(Arc::new(Self::new(options)?))
    }

    fn handle_key(&self, ctx: &RunContext) -> String {
        format!("watch:{}:{}", self.name, ctx.id())
    }
}

#[async_trait]
impl Task for WatchTask {
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
        let opts = WatchOptions::from_options(&self.name, ctx.options())?;
        let root = match ctx.options().string("cwd").filter(|s| !s.is_empty()) {
            Some(dir) => ctx.resolve(dir),
            None => ctx.cwd().to_path_buf(),
        };

        // notify calls back on its own thread; forward into the async world
        let (event_tx, event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = event_tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(|e| ExecutionError::Watch(e.to_string()))?;

        for src in &opts.src {
            let path = root.join(src);
            watcher
                .watch(&path, RecursiveMode::Recursive)
                .map_err(|e| ExecutionError::Watch(format!("{}: {}", path.display(), e)))?;
            debug!("watching {}", path.display());
        }

        let events = tokio::spawn(
            event_loop(ctx.clone(), opts, root, event_rx, ctx.faults())
                .instrument(ctx.span().clone()),
        );

        ctx.set(
            self.handle_key(ctx),
            WatchHandle {
                watcher: Mutex::new(Some(watcher)),
                events: Mutex::new(Some(events)),
            },
        );
        info!("Watching for changes");
        Ok(())
    }

    async fn dispose(&self, ctx: &RunContext) -> DisposalResult {
        let Some(handle) = ctx.get::<WatchHandle>(&self.handle_key(ctx)) else {
            return Ok(());
        };
        ctx.scratch().remove(&self.handle_key(ctx));

        info!("Stopping watchers...");
        // dropping the watcher stops it
        drop(lock(&handle.watcher).take());
        if let Some(events) = lock(&handle.events).take() {
            events.abort();
        }
        Ok(())
    }
}

async fn event_loop(
    ctx: RunContext,
    opts: WatchOptions,
    root: PathBuf,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    faults: FaultReporter,
) {
    let mut batch = BTreeSet::new();

    while let Some(first) = events.recv().await {
        if !collect(first, &opts, &root, &mut batch, &faults) {
            return;
        }

        // keep collecting until the stream goes quiet
        loop {
            match tokio::time::timeout(opts.debounce, events.recv()).await {
                Ok(Some(next)) => {
                    if !collect(next, &opts, &root, &mut batch, &faults) {
                        return;
                    }
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }

        if batch.is_empty() {
            continue;
        }
        let files: Vec<PathBuf> = std::mem::take(&mut batch).into_iter().collect();
        run_handlers(&ctx, &opts, &files).await;
    }

    debug!("file watcher loop ended");
}

/// Add the paths of one notify result to the batch; false on watcher error
fn collect(
    result: notify::Result<Event>,
    opts: &WatchOptions,
    root: &Path,
    batch: &mut BTreeSet<PathBuf>,
    faults: &FaultReporter,
) -> bool {
    let event = match result {
        Ok(event) => event,
        Err(e) => {
            error!("file watch error: {}", e);
            faults.report(ExecutionError::Watch(e.to_string()));
            return false;
        }
    };

    let verb = match event.kind {
        EventKind::Create(_) => "created",
        EventKind::Modify(_) => "modified",
        EventKind::Remove(_) => "deleted",
        _ => return true,
    };

    for path in event.paths {
        if !opts.accepts(&path, root) {
            trace!("ignoring {}", path.display());
            continue;
        }
        if batch.insert(path.clone()) {
            info!("{} was {}", path.display(), verb);
        } else {
            debug!("already detected change for {}", path.display());
        }
    }
    true
}

async fn run_handlers(ctx: &RunContext, opts: &WatchOptions, files: &[PathBuf]) {
    for handler in &opts.handlers {
        let matched = files
            .iter()
            .any(|f| handler.pattern.is_match(&f.to_string_lossy()));
        if !matched {
            continue;
        }

        debug!("Running matched handler {}", handler.name);
        for target in &handler.targets {
            if let Err(e) = ctx.run_task(target).await {
                warn!("handler {} failed running '{}': {}", handler.name, target, e);
                break;
            }
        }
    }
    debug!("All handlers completed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(yaml: &str) -> TaskOptions {
        TaskOptions::from_value(serde_yaml::from_str(yaml).unwrap()).unwrap()
    }

    const VALID: &str = r#"
src: src
exclude: ["**/*.tmp"]
debounce_ms: 50
handlers:
  styles:
    pattern: '\.css$'
    targets: [build-css]
  scripts:
    pattern: '\.js$'
    targets: [lint, bundle]
"#;

    #[test]
    fn test_valid_options() {
        let opts = WatchOptions::from_options("w", &options(VALID)).unwrap();
        assert_eq!(opts.src, vec!["src"]);
        assert_eq!(opts.debounce, Duration::from_millis(50));
        assert_eq!(opts.handlers.len(), 2);
        assert_eq!(opts.handlers[1].targets, vec!["lint", "bundle"]);
    }

    #[test]
    fn test_handlers_are_required() {
        assert!(matches!(
            WatchTask::new(options("src: src")),
            Err(ConfigError::MissingOption { option, .. }) if option == "handlers"
        ));
    }

    #[test]
    fn test_invalid_handler_pattern() {
        let result = WatchTask::new(options(
            "src: src\nhandlers:\n  bad:\n    pattern: '('\n    targets: [x]\n",
        ));
        assert!(matches!(result, Err(ConfigError::InvalidOption { .. })));
    }

    #[test]
    fn test_default_debounce() {
        let opts = WatchOptions::from_options(
            "w",
            &options("src: .\nhandlers:\n  all:\n    pattern: '.*'\n    targets: [x]\n"),
        )
        .unwrap();
        assert_eq!(opts.debounce, Duration::from_millis(DEFAULT_DEBOUNCE_MS));
    }

    #[test]
    fn test_accepts_filters_hidden_and_excluded() {
        let opts = WatchOptions::from_options("w", &options(VALID)).unwrap();
        let root = Path::new("/project");
        assert!(opts.accepts(Path::new("/project/src/app.js"), root));
        assert!(!opts.accepts(Path::new("/project/src/.app.js.swp"), root));
        assert!(!opts.accepts(Path::new("/project/src/cache/x.tmp"), root));
    }

    #[test]
    fn test_collect_dedups_and_skips_access() {
        let opts = WatchOptions::from_options("w", &options(VALID)).unwrap();
        let ctx = RunContext::new("w");
        let faults = ctx.faults();
        let root = Path::new("/project");
        let mut batch = BTreeSet::new();

        let modify = Event::new(EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(PathBuf::from("/project/src/a.js"));
        assert!(collect(Ok(modify.clone()), &opts, root, &mut batch, &faults));
        assert!(collect(Ok(modify), &opts, root, &mut batch, &faults));
        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/project/src/b.js"));
        assert!(collect(Ok(access), &opts, root, &mut batch, &faults));

        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_watch_error_is_reported_as_fault() {
        let opts = WatchOptions::from_options("w", &options(VALID)).unwrap();
        let ctx = RunContext::new("w");
        let mut rx = ctx.take_fault_receiver().unwrap();
        let mut batch = BTreeSet::new();

        let keep_going = collect(
            Err(notify::Error::generic("boom")),
            &opts,
            Path::new("/"),
            &mut batch,
            &ctx.faults(),
        );
        assert!(!keep_going);
        assert!(matches!(rx.try_recv(), Ok(ExecutionError::Watch(_))));
    }
}
