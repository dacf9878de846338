//! Project directory resolution
//!
//! Maps a project reference from the connection URL to the directory a
//! new shell starts in.

use std::path::{Component, Path, PathBuf};

use tracing::debug;
use wsmux_utils::{expand_home, Result, WsmuxError};

/// Resolves the working directory for a new session
pub trait ProjectResolver: Send + Sync {
    /// `None` asks for the default directory
    fn resolve(&self, project: Option<&str>) -> Result<PathBuf>;
}

/// One subdirectory per project under a common root
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
    create_missing: bool,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>, create_missing: bool) -> Self {
        Self {
            root: root.into(),
            create_missing,
        }
    }

    /// Make `path` absolute without touching the filesystem
    ///
    /// A leading `~` means the home directory.
    fn absolute(path: PathBuf) -> Result<PathBuf> {
        let path = expand_home(&path);
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(std::env::current_dir()?.join(path))
        }
    }

    fn ensure_dir(&self, dir: &Path, project: &str) -> Result<()> {
        if dir.is_dir() {
            return Ok(());
        }
        if !self.create_missing {
            return Err(WsmuxError::invalid_project(project, "directory does not exist"));
        }
        std::fs::create_dir_all(dir).map_err(|e| WsmuxError::FileWrite {
            path: dir.to_path_buf(),
            source: e,
        })?;
        debug!(path = %dir.display(), "Created project directory");
        Ok(())
    }
}

impl ProjectResolver for DirectoryResolver {
    fn resolve(&self, project: Option<&str>) -> Result<PathBuf> {
        let root = Self::absolute(self.root.clone())?;

        let Some(project) = project else {
            self.ensure_dir(&root, "")?;
            return Ok(root);
        };

        validate_name(project)?;
        let dir = root.join(project);
        self.ensure_dir(&dir, project)?;
        Ok(dir)
    }
}

/// A project name must be exactly one normal path component
fn validate_name(project: &str) -> Result<()> {
    if project.is_empty() {
        return Err(WsmuxError::invalid_project(project, "empty name"));
    }
    if project.contains('/') || project.contains('\\') || project.contains('\0') {
        return Err(WsmuxError::invalid_project(project, "must not contain separators"));
    }

    let mut components = Path::new(project).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(WsmuxError::invalid_project(project, "not a plain directory name")),
    }
}
