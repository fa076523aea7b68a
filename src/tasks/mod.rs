//! Built-in task kinds
//!
//! | kind     | runs    | purpose                                   |
//! |----------|---------|-------------------------------------------|
//! | `shell`  | async   | run a command, optionally forever         |
//! | `copy`   | sync    | copy files matched by globs               |
//! | `delete` | sync    | remove files matched by globs             |
//! | `watch`  | forever | run targets when watched files change     |

pub mod copy;
pub mod delete;
pub mod shell;
pub mod watch;

pub use copy::CopyTask;
pub use delete::DeleteTask;
pub use shell::ShellTask;
pub use watch::WatchTask;

use crate::config::Config;
use crate::runner::factory;

/// Register every built-in kind under its name
pub fn register_builtin(config: &mut Config) {
    config.register_task_kind("shell", factory(ShellTask::factory));
    config.register_task_kind("copy", factory(CopyTask::factory));
    config.register_task_kind("delete", factory(DeleteTask::factory));
    config.register_task_kind("watch", factory(WatchTask::factory));
}
