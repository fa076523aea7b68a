//! Integration tests for running targets through the orchestrator

mod common;

use async_trait::async_trait;
use common::{ForeverTask, Journal};
use deo::error::{ConfigError, DeoError, ExecutionError, ExecutionResult};
use deo::runner::{ExecMode, FnTask, RunContext, RunnerState, Task, TaskOptions};
use deo::Deo;
use std::sync::Arc;

fn deps(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn recording_target(deo: &Deo, journal: &Journal, name: &str, dependencies: &[&str]) {
    let journal = journal.clone();
    let entry = name.to_string();
    deo.register_custom_target(name, &deps(dependencies), move |_| {
        journal.record(entry.clone());
        Ok(())
    })
    .unwrap();
}

#[tokio::test]
async fn test_dependencies_run_first_in_declaration_order() {
    let deo = Deo::new();
    let journal = Journal::new();
    recording_target(&deo, &journal, "fetch", &[]);
    recording_target(&deo, &journal, "compile", &["fetch"]);
    recording_target(&deo, &journal, "lint", &[]);
    recording_target(&deo, &journal, "build", &["compile", "lint"]);

    deo.run_task("build").await.unwrap();
    assert_eq!(journal.entries(), vec!["fetch", "compile", "lint", "build"]);
}

#[tokio::test]
async fn test_shared_dependency_runs_once_per_invocation() {
    let deo = Deo::new();
    let journal = Journal::new();
    recording_target(&deo, &journal, "clean", &[]);
    recording_target(&deo, &journal, "js", &["clean"]);
    recording_target(&deo, &journal, "css", &["clean"]);
    recording_target(&deo, &journal, "all", &["js", "css"]);

    deo.run_task("all").await.unwrap();
    assert_eq!(journal.count("clean"), 1);
    assert_eq!(journal.entries(), vec!["clean", "js", "css", "all"]);

    // a new invocation runs the chain again
    deo.run_task("all").await.unwrap();
    assert_eq!(journal.count("clean"), 2);
}

#[tokio::test]
async fn test_failure_aborts_the_chain() {
    let deo = Deo::new();
    let journal = Journal::new();
    recording_target(&deo, &journal, "first", &[]);
    deo.register_custom_target("broken", &deps(&["first"]), |_| {
        Err(ExecutionError::Failed("boom".to_string()))
    })
    .unwrap();
    recording_target(&deo, &journal, "last", &["broken"]);

    let err = deo.run_task("last").await.unwrap_err();
    assert!(matches!(err, DeoError::Execution(ExecutionError::Failed(_))));
    assert_eq!(journal.entries(), vec!["first"]);

    let states: Vec<RunnerState> = deo.runners().iter().map(|r| r.state()).collect();
    assert_eq!(states, vec![RunnerState::Succeeded, RunnerState::Erred]);
}

#[tokio::test]
async fn test_run_tasks_stops_at_first_failure() {
    let deo = Deo::new();
    let journal = Journal::new();
    recording_target(&deo, &journal, "a", &[]);
    deo.register_custom_target("bad", &[], |_| Err(ExecutionError::Failed("no".into())))
        .unwrap();
    recording_target(&deo, &journal, "c", &[]);

    assert!(deo.run_tasks(&["a", "bad", "c"]).await.is_err());
    assert_eq!(journal.entries(), vec!["a"]);
}

#[tokio::test]
async fn test_panic_becomes_execution_error() {
    let deo = Deo::new();
    deo.register_custom_target("explode", &[], |_| panic!("kaboom"))
        .unwrap();

    let err = deo.run_task("explode").await.unwrap_err();
    match err {
        DeoError::Execution(ExecutionError::Panicked(message)) => {
            assert!(message.contains("kaboom"))
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!deo.is_running());
}

#[tokio::test]
async fn test_cycle_is_rejected_at_registration() {
    let deo = Deo::new();
    deo.register_custom_target("a", &deps(&["b"]), |_| Ok(())).unwrap();
    deo.register_custom_target("b", &deps(&["c"]), |_| Ok(())).unwrap();

    let err = deo
        .register_custom_target("c", &deps(&["a"]), |_| Ok(()))
        .unwrap_err();
    assert!(matches!(err, DeoError::Cycle(_)));

    // nothing was registered for the rejected target
    assert!(deo.targets().iter().all(|(name, _)| name != "c"));
}

#[tokio::test]
async fn test_self_dependency_is_a_cycle() {
    let deo = Deo::new();
    let err = deo
        .register_custom_target("loop", &deps(&["loop"]), |_| Ok(()))
        .unwrap_err();
    assert!(matches!(err, DeoError::Cycle(_)));
}

#[tokio::test]
async fn test_options_are_interpolated_at_run_time() {
    let deo = Deo::with_builtin_tasks();
    let temp_dir = tempfile::TempDir::new().unwrap();
    let out = temp_dir.path().join("out.txt");

    let declarations: serde_yaml::Mapping = serde_yaml::from_str(
        r#"
shell:
  write:
    alias: write
    command: "echo ${greeting} > ${out}"
"#,
    )
    .unwrap();
    deo.register_targets(&declarations).unwrap();

    // properties set after registration are still seen
    deo.set_property("greeting", "hello").unwrap();
    deo.set_property("out", out.to_string_lossy().as_ref()).unwrap();

    deo.run_task("write").await.unwrap();
    let written = std::fs::read_to_string(&out).unwrap();
    assert_eq!(written.trim(), "hello");
}

#[tokio::test]
async fn test_alias_and_default_names() {
    let deo = Deo::with_builtin_tasks();
    let declarations: serde_yaml::Mapping = serde_yaml::from_str(
        r#"
shell:
  plain:
    command: "true"
  named:
    alias: build
    command: "true"
"#,
    )
    .unwrap();

    let names = deo.register_targets(&declarations).unwrap();
    assert_eq!(names, vec!["shell:plain", "build"]);
    deo.run_task("shell:plain").await.unwrap();
    deo.run_task("build").await.unwrap();
}

#[tokio::test]
async fn test_unknown_task_kind() {
    let deo = Deo::new();
    let declarations: serde_yaml::Mapping =
        serde_yaml::from_str("rocket:\n  launch:\n    speed: 9\n").unwrap();
    let err = deo.register_targets(&declarations).unwrap_err();
    assert!(matches!(
        err,
        DeoError::Config(ConfigError::UnknownTaskKind(kind)) if kind == "rocket"
    ));
}

#[tokio::test]
async fn test_forever_target_keeps_running_until_killed() {
    let deo = Deo::new();
    let journal = Journal::new();
    deo.register_target("serve", ForeverTask::new("serve", &journal).shared(), &[])
        .unwrap();

    deo.run_task("serve").await.unwrap();
    assert!(deo.is_running());
    assert_eq!(deo.runners()[0].state(), RunnerState::Running);

    assert!(deo.kill().await.is_empty());
    assert!(!deo.is_running());
    assert_eq!(deo.runners()[0].state(), RunnerState::Succeeded);
    assert_eq!(journal.entries(), vec!["serve:start", "serve:dispose"]);
}

#[tokio::test]
async fn test_fault_after_start_stops_the_runner() {
    let deo = Deo::new();
    let journal = Journal::new();
    let task = ForeverTask::new("server", &journal);
    let trigger = task.trigger();
    deo.register_target("server", task.shared(), &[]).unwrap();

    deo.run_task("server").await.unwrap();
    assert!(deo.is_running());

    assert!(trigger.fire("port closed"));
    deo.wait_until_idle().await;

    assert!(!deo.is_running());
    assert_eq!(deo.runners()[0].state(), RunnerState::Erred);
    // the failed task was disposed on the way out
    assert_eq!(journal.count("server:dispose"), 1);

    // killing afterwards does not dispose it again
    assert!(deo.kill().await.is_empty());
    assert_eq!(journal.count("server:dispose"), 1);
}

#[tokio::test]
async fn test_kill_continues_past_disposal_errors() {
    let deo = Deo::new();
    let journal = Journal::new();
    deo.register_target("a", ForeverTask::new("a", &journal).shared(), &[])
        .unwrap();
    deo.register_target(
        "b",
        ForeverTask::new("b", &journal).failing_disposal().shared(),
        &[],
    )
    .unwrap();
    deo.register_target("c", ForeverTask::new("c", &journal).shared(), &[])
        .unwrap();

    deo.run_tasks(&["a", "b", "c"]).await.unwrap();
    let errors = deo.kill().await;

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].task, "b");
    for name in ["a", "b", "c"] {
        assert_eq!(journal.count(&format!("{}:dispose", name)), 1);
    }
    // newest first
    assert_eq!(
        &journal.entries()[3..],
        &["c:dispose", "b:dispose", "a:dispose"]
    );

    let states: Vec<RunnerState> = deo.runners().iter().map(|r| r.state()).collect();
    assert_eq!(
        states,
        vec![
            RunnerState::Succeeded,
            RunnerState::Erred,
            RunnerState::Succeeded
        ]
    );
}

#[tokio::test]
async fn test_settled_runners_are_dropped() {
    let deo = Deo::new();
    let journal = Journal::new();
    recording_target(&deo, &journal, "tick", &[]);
    deo.register_custom_target("bad", &[], |_| Err(ExecutionError::Failed("no".into())))
        .unwrap();
    deo.register_target("serve", ForeverTask::new("serve", &journal).shared(), &[])
        .unwrap();

    deo.run_task("serve").await.unwrap();
    assert!(deo.run_task("bad").await.is_err());
    for _ in 0..5 {
        deo.run_task("tick").await.unwrap();
    }

    let names: Vec<String> = deo
        .runners()
        .iter()
        .filter_map(|r| r.task_name())
        .collect();
    assert_eq!(names, vec!["serve", "tick"]);
    assert_eq!(deo.failed_tasks(), vec!["bad"]);

    // the live runner is still disposed
    assert!(deo.kill().await.is_empty());
    assert_eq!(journal.count("serve:dispose"), 1);
}

#[tokio::test]
async fn test_attached_dependents_run_before_their_task() {
    let deo = Deo::new();
    let journal = Journal::new();

    let j = journal.clone();
    let prepare = FnTask::new("prepare", move |_| {
        j.record("prepare");
        Ok(())
    })
    .shared();
    let j = journal.clone();
    let main = FnTask::new("main", move |_| {
        j.record("main");
        Ok(())
    })
    .with_dependents(vec![prepare]);

    deo.register_target("main", main.shared(), &[]).unwrap();
    deo.run_task("main").await.unwrap();
    assert_eq!(journal.entries(), vec!["prepare", "main"]);
}

#[tokio::test]
async fn test_attached_dependents_see_interpolated_options() {
    let deo = Deo::new();
    let seen = Arc::new(std::sync::Mutex::new(None));

    let mut options = TaskOptions::default();
    options.set("dest", "${dir}/out");
    let slot = Arc::clone(&seen);
    let child = FnTask::new("child", move |ctx| {
        *slot.lock().unwrap() = ctx.options().string("dest");
        Ok(())
    })
    .with_options(options)
    .shared();
    let parent = FnTask::new("parent", |_| Ok(())).with_dependents(vec![child]);

    deo.register_target("parent", parent.shared(), &[]).unwrap();
    deo.set_property("dir", "build").unwrap();
    deo.run_task("parent").await.unwrap();

    assert_eq!(seen.lock().unwrap().as_deref(), Some("build/out"));
}

#[tokio::test]
async fn test_task_can_run_another_target() {
    let deo = Deo::new();
    let journal = Journal::new();
    recording_target(&deo, &journal, "inner", &[]);

    let task = NestedTask {
        options: TaskOptions::default(),
        journal: journal.clone(),
    };
    deo.register_target("outer", Arc::new(task), &[]).unwrap();

    deo.run_task("outer").await.unwrap();
    assert_eq!(journal.entries(), vec!["inner", "outer"]);
}

/// Runs the `inner` target from inside its own body
struct NestedTask {
    options: TaskOptions,
    journal: Journal,
}

#[async_trait]
impl Task for NestedTask {
    fn name(&self) -> &str {
        "outer"
    }

    fn options(&self) -> &TaskOptions {
        &self.options
    }

    fn mode(&self) -> ExecMode {
        ExecMode::Async
    }

    async fn exec_async(&self, ctx: &RunContext) -> ExecutionResult<()> {
        ctx.run_task("inner")
            .await
            .map_err(|e| ExecutionError::Failed(e.to_string()))?;
        self.journal.record("outer");
        Ok(())
    }
}
