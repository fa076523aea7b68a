//! `delete` task kind

use crate::error::{ConfigError, ConfigResult, ExecutionResult};
use crate::runner::{RunContext, SharedTask, Task, TaskOptions};
use crate::utils::{expand, remove};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Removes the files and directories matched by `src`
pub struct DeleteTask {
    name: String,
    options: TaskOptions,
}

impl DeleteTask {
    pub fn new(options: TaskOptions) -> ConfigResult<Self> {
        let name = options.alias().unwrap_or_else(|| "delete".to_string());
        if options.src()?.is_empty() {
            return Err(ConfigError::MissingOption {
                task: name,
                option: "src".to_string(),
            });
        }
        Ok(DeleteTask { name, options })
    }

    pub fn factory(options: TaskOptions) -> ConfigResult<SharedTask> {
        Ok(Arc::new(Self::new(options)?))
    }
}

#[async_trait]
impl Task for DeleteTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> &TaskOptions {
        &self.options
    }

    fn exec(&self, ctx: &RunContext) -> ExecutionResult<()> {
        let options = ctx.options();
        let cwd = match options.string("cwd").filter(|s| !s.is_empty()) {
            Some(dir) => ctx.resolve(dir),
            None => ctx.cwd().to_path_buf(),
        };

        let files = expand(&options.src()?, &cwd)?;
        for file in &files {
            debug!("Deleting {}", file.display());
            remove(file)?;
        }

        info!(
            "Deleted {} file{}",
            files.len(),
            if files.len() == 1 { "" } else { "s" }
        );
        Ok(())
    }
}
