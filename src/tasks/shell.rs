//! `shell` task kind
//!
//! Runs a command, through `sh -c` unless explicit `args` are given. With
//! `forever: true` the task counts as started once the process is spawned.

use crate::error::{
    ConfigError, ConfigResult, DisposalError, DisposalResult, ExecutionError, ExecutionResult,
};
use crate::runner::{ExecMode, RunContext, SharedTask, Task, TaskOptions};
use crate::utils::lock;
use async_trait::async_trait;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn, Instrument};

const DEFAULT_KILL_SIGNAL: &str = "SIGKILL";

/// Resolved options of a shell target
#[derive(Debug, Clone, PartialEq)]
struct ShellOptions {
    command: String,
    args: Option<Vec<String>>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    forever: bool,
    kill_signal: String,
}

impl ShellOptions {
    fn from_options(task: &str, options: &TaskOptions) -> ConfigResult<Self> {
        let command = options.require_string(task, "command")?;
        let args = if options.contains("args") {
            Some(options.list("args")?)
        } else {
            None
        };

        let mut env = BTreeMap::new();
        if let Some(map) = options.mapping("env") {
            for (key, value) in map {
                let key = match key {
                    Value::String(s) => s.clone(),
                    other => format!("{:?}", other),
                };
                let value = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => String::new(),
                };
                env.insert(key, value);
            }
        }

        Ok(ShellOptions {
            command,
            args,
            cwd: options.string("cwd").filter(|s| !s.is_empty()).map(PathBuf::from),
            env,
            forever: forever_flag(options)?,
            kill_signal: options
                .string("kill_signal")
                .unwrap_or_else(|| DEFAULT_KILL_SIGNAL.to_string()),
        })
    }

    fn display(&self) -> String {
        match &self.args {
            Some(args) if !args.is_empty() => format!("{} {}", self.command, args.join(" ")),
            _ => self.command.clone(),
        }
    }

    fn build(&self, ctx: &RunContext) -> Command {
        let mut command = match &self.args {
            Some(args) => {
                let mut c = Command::new(&self.command);
                c.args(args);
                c
            }
            None => {
                let mut c = Command::new("sh");
                c.arg("-c").arg(&self.command);
                c
            }
        };

        let cwd = match &self.cwd {
            Some(dir) => ctx.resolve(dir),
            None => ctx.cwd().to_path_buf(),
        };
        command.current_dir(cwd);
        command.envs(&self.env);

        command.stdin(Stdio::inherit());
        command.stdout(Stdio::inherit());
        command.stderr(Stdio::inherit());
        command
    }
}

/// `forever` decides the runner's lifecycle before interpolation, so it
/// must be a literal boolean
fn forever_flag(options: &TaskOptions) -> ConfigResult<bool> {
    match options.get("forever") {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) if s == "true" => Ok(true),
        Some(Value::String(s)) if s == "false" => Ok(false),
        Some(other) => Err(ConfigError::InvalidOption {
            name: "forever".to_string(),
            error: format!("expected true or false, found {:?}", other),
        }),
    }
}

/// Running process, kept in the scratch space until disposal
struct ProcessHandle {
    pid: Option<u32>,
    exited: AtomicBool,
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

/// Shell command task
pub struct ShellTask {
    name: String,
    options: TaskOptions,
    forever: bool,
}

impl ShellTask {
    pub fn new(options: TaskOptions) -> ConfigResult<Self> {
        let name = options.alias().unwrap_or_else(|| "shell".to_string());
        let opts = ShellOptions::from_options(&name, &options)?;
        Ok(ShellTask {
            name,
            forever: opts.forever,
            options,
        })
    }

    pub fn factory(options: TaskOptions) -> ConfigResult<SharedTask> {
        Ok(Arc::new(Self::new(options)?))
    }

    fn process_key(&self, ctx: &RunContext) -> String {
        format!("shell:{}:{}", self.name, ctx.id())
    }
}

/// Wait for the child, killing it first if asked to
async fn wait_for(mut child: Child, mut kill: oneshot::Receiver<()>) -> io::Result<ExitStatus> {
    tokio::select! {
        status = child.wait() => status,
        Ok(()) = &mut kill => {
            child.start_kill()?;
            child.wait().await
        }
    }
}

fn status_result(status: io::Result<ExitStatus>, command: &str) -> ExecutionResult<()> {
    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(ExecutionError::CommandFailed(status.code())),
        Err(error) => Err(ExecutionError::Spawn {
            command: command.to_string(),
            error,
        }),
    }
}

#[async_trait]
impl Task for ShellTask {
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
        self.forever
    }

    async fn exec_async(&self, ctx: &RunContext) -> ExecutionResult<()> {
        let opts = ShellOptions::from_options(&self.name, ctx.options())?;
        let shown = opts.display();
        debug!("Command: {}", shown);

        let child = opts
            .build(ctx)
            .spawn()
            .map_err(|error| ExecutionError::Spawn {
                command: shown.clone(),
                error,
            })?;

        let (kill_tx, kill_rx) = oneshot::channel();
        let handle = Arc::new(ProcessHandle {
            pid: child.id(),
            exited: AtomicBool::new(false),
            kill: Mutex::new(Some(kill_tx)),
        });
        ctx.set(self.process_key(ctx), Arc::clone(&handle));

        if !self.forever {
            let status = wait_for(child, kill_rx).await;
            handle.exited.store(true, Ordering::SeqCst);
            if let Ok(status) = &status {
                debug!("Child process finished with {}", status);
            }
            return status_result(status, &shown);
        }

        let faults = ctx.faults();
        tokio::spawn(
            async move {
                let status = wait_for(child, kill_rx).await;
                handle.exited.store(true, Ordering::SeqCst);
                match status_result(status, &shown) {
                    Ok(()) => warn!("Shell command finished, but is supposed to run continuously"),
                    Err(err) => {
                        if !faults.report(err) {
                            trace!("process ended after disposal");
                        }
                    }
                }
            }
            .instrument(ctx.span().clone()),
        );

        Ok(())
    }

    async fn dispose(&self, ctx: &RunContext) -> DisposalResult {
        let Some(handle) = ctx.get::<Arc<ProcessHandle>>(&self.process_key(ctx)) else {
            return Ok(());
        };
        ctx.scratch().remove(&self.process_key(ctx));

        if handle.exited.load(Ordering::SeqCst) {
            trace!("Not killing process, it has already exited");
            return Ok(());
        }

        let signal = ShellOptions::from_options(&self.name, ctx.options())
            .map(|opts| opts.kill_signal)
            .unwrap_or_else(|_| DEFAULT_KILL_SIGNAL.to_string());
        info!("Killing running process using signal {}", signal);

        match (handle.pid, signal.as_str()) {
            (Some(pid), sig) if sig != DEFAULT_KILL_SIGNAL => {
                let sig = sig.trim_start_matches("SIG");
                let status = Command::new("kill")
                    .arg("-s")
                    .arg(sig)
                    .arg(pid.to_string())
                    .status()
                    .await
                    .map_err(|e| DisposalError::new(&self.name, e))?;
                if !status.success() {
                    error!("kill -s {} {} exited with {}", sig, pid, status);
                    return Err(DisposalError::new(
                        &self.name,
                        format!("failed to send {} to process {}", signal, pid),
                    ));
                }
                Ok(())
            }
            _ => {
                if let Some(kill) = lock(&handle.kill).take() {
                    let _ = kill.send(());
                }
                Ok(())
            }
        }
    }
}
