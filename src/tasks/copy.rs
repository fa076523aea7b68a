//! `copy` task kind

use crate::error::{ConfigError, ConfigResult, ExecutionResult};
use crate::runner::{RunContext, SharedTask, Task, TaskOptions};
use crate::utils::{copy, expand, map_src_to_dest};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Copies the files matched by `src` to `dest`
pub struct CopyTask {
    name: String,
    options: TaskOptions,
}

struct CopyOptions {
    src: Vec<String>,
    dest: String,
    cwd: Option<PathBuf>,
}

impl CopyOptions {
    fn from_options(task: &str, options: &TaskOptions) -> ConfigResult<Self> {
        let src = options.src()?;
        if src.is_empty() {
            return Err(ConfigError::MissingOption {
                task: task.to_string(),
                option: "src".to_string(),
            });
        }
        Ok(CopyOptions {
            src,
            dest: options.require_string(task, "dest")?,
            cwd: options.string("cwd").filter(|s| !s.is_empty()).map(PathBuf::from),
        })
    }
}

impl CopyTask {
    pub fn new(options: TaskOptions) -> ConfigResult<Self> {
        let name = options.alias().unwrap_or_else(|| "copy".to_string());
        CopyOptions::from_options(&name, &options)?;
        Ok(CopyTask { name, options })
    }

    pub fn factory(options: TaskOptions) -> ConfigResult<SharedTask> {
        Ok(Arc::new(Self::new(options)?))
    }
}

#[async_trait]
impl Task for CopyTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> &TaskOptions {
        &self.options
    }

    fn exec(&self, ctx: &RunContext) -> ExecutionResult<()> {
        let opts = CopyOptions::from_options(&self.name, ctx.options())?;
        let cwd = match &opts.cwd {
            Some(dir) => ctx.resolve(dir),
            None => ctx.cwd().to_path_buf(),
        };

        let files = expand(&opts.src, &cwd)?;
        let dest = cwd.join(&opts.dest);
        let pairs = map_src_to_dest(&files, &dest)?;

        for (from, to) in &pairs {
            debug!("Copying {} to {}", from.display(), to.display());
            copy(from, to)?;
        }

        info!(
            "Copied {} file{} into {}",
            pairs.len(),
            if pairs.len() == 1 { "" } else { "s" },
            dest.display()
        );
        Ok(())
    }
}
