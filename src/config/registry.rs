//! Task kinds, targets and the dependency graph between them

use crate::config::{PropertyStore, Settings};
use crate::error::{ConfigError, ConfigResult, CycleError, Result};
use crate::runner::{SharedTask, TargetGraph, TaskFactory, TaskOptions};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, trace, warn};

/// Everything the orchestrator knows before anything runs
pub struct Config {
    properties: PropertyStore,
    settings: Settings,
    task_kinds: BTreeMap<String, TaskFactory>,
    targets: BTreeMap<String, SharedTask>,
    graph: TargetGraph,
}

impl Config {
    pub fn new() -> Self {
        Config {
            properties: PropertyStore::new(),
            settings: Settings::new(),
            task_kinds: BTreeMap::new(),
            targets: BTreeMap::new(),
            graph: TargetGraph::new(),
        }
    }

    pub fn properties(&self) -> &PropertyStore {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyStore {
        &mut self.properties
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_setting(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        let setting = self.settings.set(key, value)?;
        self.properties
            .set_pattern(self.settings.interpolation_pattern.clone());
        debug!("set configuration setting for key {}", setting);
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> ConfigResult<String> {
        self.settings.get(key)
    }

    /// Register a task kind; an existing kind with the same name is replaced
    pub fn register_task_kind(&mut self, name: impl Into<String>, factory: TaskFactory) {
        let name = name.into();
        if self.task_kinds.contains_key(&name) {
            warn!("Overriding existing task kind {}", name);
        }
        debug!("registered new task kind {}", name);
        self.task_kinds.insert(name, factory);
    }

    pub fn has_task_kind(&self, name: &str) -> bool {
        self.task_kinds.contains_key(name)
    }

    /// Registered kind names, sorted
    pub fn task_kinds(&self) -> impl Iterator<Item = &str> {
        self.task_kinds.keys().map(String::as_str)
    }

    /// Build and register targets declared as `kind -> name -> options`.
    ///
    /// A target is registered as its `alias` option when present, otherwise
    /// as `kind:name`. Returns the registered names in declaration order.
    pub fn register_targets(&mut self, declarations: &Mapping) -> Result<Vec<String>> {
        let mut registered = Vec::new();

        for (kind, targets) in declarations {
            let kind = kind
                .as_str()
                .ok_or_else(|| ConfigError::Invalid(format!("task kind must be a string: {:?}", kind)))?;
            let factory = self
                .task_kinds
                .get(kind)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownTaskKind(kind.to_string()))?;

            trace!("parsing targets for {}", kind);
            let targets = match targets {
                Value::Mapping(map) => map.clone(),
                Value::Null => Mapping::new(),
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "targets of '{}' must be a mapping, got {:?}",
                        kind, other
                    ))
                    .into())
                }
            };

            for (target, options) in targets {
                let target = target.as_str().ok_or_else(|| {
                    ConfigError::Invalid(format!("target name must be a string: {:?}", target))
                })?;
                let mut options = TaskOptions::from_value(options)?;

                let name = options
                    .alias()
                    .unwrap_or_else(|| format!("{}:{}", kind, target));
                options.set("alias", name.as_str());
                let dependencies = options.dependencies()?;

                let task = factory(options)?;
                self.register_target(&name, task, &dependencies)?;
                registered.push(name);
            }
        }

        Ok(registered)
    }

    /// Register a ready-made task under `name`.
    ///
    /// The graph is checked first; on a cycle nothing is registered.
    pub fn register_target(
        &mut self,
        name: &str,
        task: SharedTask,
        dependencies: &[String],
    ) -> std::result::Result<(), CycleError> {
        self.graph.add_and_verify(name, dependencies)?;
        if self.targets.contains_key(name) {
            warn!("Overriding existing target {}", name);
        }
        debug!("registered target {}", name);
        self.targets.insert(name.to_string(), task);
        Ok(())
    }

    pub fn get_target(&self, name: &str) -> ConfigResult<SharedTask> {
        self.targets
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::TargetNotFound(name.to_string()))
    }

    /// Transitive dependencies of a target, dependencies first
    pub fn target_dependencies(&self, name: &str) -> ConfigResult<Vec<String>> {
        self.graph.descendants(name)
    }

    /// Registered targets, sorted by name
    pub fn targets(&self) -> impl Iterator<Item = (&str, &SharedTask)> {
        self.targets.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn graph(&self) -> &TargetGraph {
        &self.graph
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("properties", &self.properties)
            .field("settings", &self.settings)
            .field("task_kinds", &self.task_kinds.keys().collect::<Vec<_>>())
            .field("targets", &self.targets.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeoError;
    use crate::runner::{factory, FnTask, Task};
    use std::sync::Arc;

    fn noop_kind() -> TaskFactory {
        factory(|options: TaskOptions| {
            let name = options.alias().unwrap_or_default();
            Ok(FnTask::new(name, |_| Ok(())).with_options(options).shared())
        })
    }

    fn declarations(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_target_names() {
        let mut config = Config::new();
        config.register_task_kind("noop", noop_kind());

        let names = config
            .register_targets(&declarations(
                "noop:\n  build: {}\n  test:\n    alias: check\n",
            ))
            .unwrap();

        assert_eq!(names, vec!["noop:build", "check"]);
        let task = config.get_target("check").unwrap();
        assert_eq!(task.options().alias().as_deref(), Some("check"));
        assert_eq!(
            config.get_target("noop:build").unwrap().options().alias().as_deref(),
            Some("noop:build")
        );
    }

    #[test]
    fn test_unknown_kind() {
        let mut config = Config::new();
        let err = config
            .register_targets(&declarations("missing:\n  x: {}\n"))
            .unwrap_err();
        assert!(matches!(
            err,
            DeoError::Config(ConfigError::UnknownTaskKind(kind)) if kind == "missing"
        ));
    }

    #[test]
    fn test_dependencies_are_registered() {
        let mut config = Config::new();
        config.register_task_kind("noop", noop_kind());
        config
            .register_targets(&declarations(
                "noop:\n  a:\n    alias: a\n    dependencies: [b]\n  b:\n    alias: b\n",
            ))
            .unwrap();

        assert_eq!(config.target_dependencies("a").unwrap(), vec!["b"]);
    }

    #[test]
    fn test_cycle_registers_nothing() {
        let mut config = Config::new();
        config.register_task_kind("noop", noop_kind());
        config
            .register_targets(&declarations("noop:\n  a:\n    alias: a\n    dependencies: b\n"))
            .unwrap();

        let err = config
            .register_targets(&declarations("noop:\n  b:\n    alias: b\n    dependencies: a\n"))
            .unwrap_err();
        assert!(matches!(err, DeoError::Cycle(_)));
        assert!(config.get_target("b").is_err());
    }

    #[test]
    fn test_register_target_overwrites() {
        let mut config = Config::new();
        let first: SharedTask = Arc::new(FnTask::new("first", |_| Ok(())));
        let second: SharedTask = Arc::new(FnTask::new("second", |_| Ok(())));

        config.register_target("t", first, &[]).unwrap();
        config.register_target("t", second, &[]).unwrap();
        assert_eq!(config.get_target("t").unwrap().name(), "second");
    }

    #[test]
    fn test_setting_pattern_applies_to_properties() {
        let mut config = Config::new();
        config
            .set_setting("interpolation_pattern", r"\{\{(\w+)\}\}")
            .unwrap();
        config.properties_mut().set_property("x", "1").unwrap();
        assert_eq!(config.properties().interpolate("{{x}}"), "1");
    }
}
