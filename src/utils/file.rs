//! File helpers for the file-system task kinds

use crate::error::{ExecutionError, ExecutionResult};
use glob::{MatchOptions, Pattern};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Expand glob patterns relative to `cwd`.
///
/// Matching is case-insensitive and hidden files only match patterns that
/// spell out the leading dot. `.` and `..` are never returned. The result
/// keeps first-seen order and holds each path once.
pub fn expand<S: AsRef<str>>(patterns: &[S], cwd: &Path) -> ExecutionResult<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for pattern in patterns {
        for path in expand_one(pattern.as_ref(), cwd)? {
            if seen.insert(path.clone()) {
                files.push(path);
            }
        }
    }

    debug!("expanded {} pattern(s) to {} path(s)", patterns.len(), files.len());
    Ok(files)
}

fn has_magic(component: &str) -> bool {
    component.contains(['*', '?', '['])
}

fn expand_one(pattern: &str, cwd: &Path) -> ExecutionResult<Vec<PathBuf>> {
    let components: Vec<&str> = pattern.split('/').collect();
    if matches!(components.last(), Some(&".") | Some(&"..")) {
        debug!("ignoring pattern '{}' that names a directory link", pattern);
        return Ok(Vec::new());
    }

    // literal leading components form the directory the walk starts from
    let split = components
        .iter()
        .position(|c| has_magic(c))
        .unwrap_or(components.len());
    let prefix = components[..split].join("/");
    let base = if split == 0 {
        cwd.to_path_buf()
    } else if prefix.is_empty() {
        PathBuf::from("/")
    } else {
        cwd.join(&prefix)
    };

    if split == components.len() {
        return Ok(match fs::symlink_metadata(&base) {
            Ok(_) => vec![base],
            Err(_) => Vec::new(),
        });
    }

    let rest = components[split..].join("/");
    let matcher = Pattern::new(&rest).map_err(|e| ExecutionError::Glob {
        pattern: pattern.to_string(),
        error: e.to_string(),
    })?;
    let walk = Walk {
        base: &base,
        matcher: &matcher,
        depth: if rest.contains("**") {
            None
        } else {
            Some(components.len() - split)
        },
        dotted: rest.split('/').any(|c| c.starts_with('.')),
    };

    let mut found = Vec::new();
    walk.visit(Path::new(""), &mut found)?;
    Ok(found)
}

/// Directory walk matching entries below `base` against one pattern
struct Walk<'a> {
    base: &'a Path,
    matcher: &'a Pattern,
    depth: Option<usize>,
    dotted: bool,
}

impl Walk<'_> {
    fn visit(&self, rel: &Path, found: &mut Vec<PathBuf>) -> ExecutionResult<()> {
        let dir = self.base.join(rel);
        if !dir.is_dir() {
            return Ok(());
        }

        let file_error = |error| ExecutionError::File {
            path: dir.clone(),
            error,
        };
        let mut entries = fs::read_dir(&dir)
            .map_err(file_error)?
            .collect::<io::Result<Vec<_>>>()
            .map_err(file_error)?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name();
            let child = rel.join(&name);
            if self.matcher.matches_path_with(&child, MATCH_OPTIONS) {
                found.push(self.base.join(&child));
            }

            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let hidden = name.to_string_lossy().starts_with('.');
            let level = child.components().count();
            if is_dir
                && (self.dotted || !hidden)
                && self.depth.map_or(true, |depth| level < depth)
            {
                self.visit(&child, found)?;
            }
        }
        Ok(())
    }
}

/// Pair every source with the path it should be copied to.
///
/// - one file: to `dest`, or into it when `dest` is an existing directory
/// - several files: into `dest`, which must not be an existing non-directory
/// - a directory: onto `dest`, which must not be an existing non-directory
pub fn map_src_to_dest(src: &[PathBuf], dest: &Path) -> ExecutionResult<Vec<(PathBuf, PathBuf)>> {
    let Some(first) = src.first() else {
        return Ok(Vec::new());
    };

    let dest_meta = match fs::metadata(dest) {
        Ok(meta) => Some(meta),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(error) => {
            return Err(ExecutionError::File {
                path: dest.to_path_buf(),
                error,
            })
        }
    };
    let dest_is_dir = dest_meta.as_ref().map(|m| m.is_dir());

    let src_meta = fs::metadata(first).map_err(|error| ExecutionError::File {
        path: first.clone(),
        error,
    })?;

    let into_dir = |files: &[PathBuf]| -> Vec<(PathBuf, PathBuf)> {
        files
            .iter()
            .map(|f| {
                let name = f.file_name().map(PathBuf::from).unwrap_or_default();
                (f.clone(), dest.join(name))
            })
            .collect()
    };

    if src_meta.is_file() {
        if src.len() > 1 {
            if dest_is_dir == Some(false) {
                return Err(ExecutionError::Mapping(
                    "cannot map multiple src files to a non-directory destination".to_string(),
                ));
            }
            return Ok(into_dir(src));
        }
        if dest_is_dir == Some(true) {
            return Ok(into_dir(src));
        }
        return Ok(vec![(first.clone(), dest.to_path_buf())]);
    }

    if src_meta.is_dir() {
        if dest_is_dir == Some(false) {
            return Err(ExecutionError::Mapping(
                "cannot map source directory to a destination that is not a directory".to_string(),
            ));
        }
        return Ok(src.iter().map(|s| (s.clone(), dest.to_path_buf())).collect());
    }

    Err(ExecutionError::Mapping(format!(
        "{} is neither a file nor a directory",
        first.display()
    )))
}

/// Copy a file or a directory tree, creating parent directories as needed
pub fn copy(src: &Path, dest: &Path) -> ExecutionResult<()> {
    let file_error = |path: &Path| {
        let path = path.to_path_buf();
        move |error| ExecutionError::File { path, error }
    };

    if src.is_dir() {
        fs::create_dir_all(dest).map_err(file_error(dest))?;
        for entry in fs::read_dir(src).map_err(file_error(src))? {
            let entry = entry.map_err(file_error(src))?;
            copy(&entry.path(), &dest.join(entry.file_name()))?;
        }
        return Ok(());
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(file_error(parent))?;
    }
    fs::copy(src, dest).map_err(file_error(src))?;
    debug!("copied {} -> {}", src.display(), dest.display());
    Ok(())
}

/// Remove a file or a directory tree; a missing path is not an error
pub fn remove(path: &Path) -> ExecutionResult<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => Err(e),
    };

    result.map_err(|error| ExecutionError::File {
        path: path.to_path_buf(),
        error,
    })?;
    debug!("removed {}", path.display());
    Ok(())
}
