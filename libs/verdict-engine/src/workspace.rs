//! Per-request scratch directories
//!
//! Every request gets a uniquely named directory under one process-wide
//! scratch root. The directory is owned by exactly one request and is removed
//! when the request finishes, whatever the outcome.

use crate::error::ExecutionError;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Directory staged packages are copied into
pub const MODULES_DIR: &str = "node_modules";

/// Engine-private area inside a workspace (fixture files live here)
pub const INTERNAL_DIR: &str = ".verdict";

/// Check that a caller-supplied path stays inside the workspace
pub fn validate_relative_path(path: &str) -> Result<(), String> {
    if path.trim().is_empty() {
        return Err("file path is empty".to_string());
    }

    let mut normal_components = 0;
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) => normal_components += 1,
            Component::CurDir => {}
            Component::ParentDir => return Err(format!("file path '{}' escapes the workspace", path)),
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("file path '{}' must be relative", path))
            }
        }
    }

    if normal_components == 0 {
        return Err(format!("file path '{}' does not name a file", path));
    }

    Ok(())
}

/// Process-wide parent of all workspaces
///
/// Created once when the engine starts; workspaces never re-check it.
#[derive(Debug, Clone)]
pub struct ScratchRoot {
    path: PathBuf,
}

impl ScratchRoot {
    pub fn init(path: impl Into<PathBuf>) -> Result<Self, ExecutionError> {
        let path = path.into();
        std::fs::create_dir_all(&path).map_err(|e| {
            ExecutionError::workspace(format!("Failed to create scratch root {}", path.display()), e)
        })?;
        debug!(scratch_root = %path.display(), "Scratch root ready");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Allocate a fresh, empty workspace
    pub async fn create(&self) -> Result<Workspace, ExecutionError> {
        let id = Uuid::new_v4();
        let root = self.path.join(id.to_string());

        tokio::fs::create_dir(&root).await.map_err(|e| {
            ExecutionError::workspace(format!("Failed to create workspace {}", root.display()), e)
        })?;

        debug!(workspace_id = %id, path = %root.display(), "Workspace created");
        Ok(Workspace {
            id,
            root,
            destroyed: false,
        })
    }
}

/// Disposable directory for one request
///
/// Call [`Workspace::destroy`] on every exit path. The `Drop` impl is a
/// fallback for panics and dropped futures.
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    root: PathBuf,
    destroyed: bool,
}

impl Workspace {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.root.join(MODULES_DIR)
    }

    pub fn internal_dir(&self) -> PathBuf {
        self.root.join(INTERNAL_DIR)
    }

    /// Absolute path for a validated relative path
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, ExecutionError> {
        validate_relative_path(relative).map_err(ExecutionError::InvalidRequest)?;
        Ok(self.root.join(relative))
    }

    /// Write `content` at `relative`, creating parent directories
    pub async fn write_file(&self, relative: &str, content: &str) -> Result<PathBuf, ExecutionError> {
        let target = self.resolve(relative)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ExecutionError::workspace(format!("Failed to create directory for {}", relative), e)
            })?;
        }

        tokio::fs::write(&target, content)
            .await
            .map_err(|e| ExecutionError::workspace(format!("Failed to write {}", relative), e))?;

        Ok(target)
    }

    pub async fn ensure_internal_dir(&self) -> Result<PathBuf, ExecutionError> {
        let dir = self.internal_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ExecutionError::workspace("Failed to create engine directory", e))?;
        Ok(dir)
    }

    /// Recursively remove the directory. Errors are logged, never returned.
    pub async fn destroy(mut self) {
        self.destroyed = true;

        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!(workspace_id = %self.id, "Workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                workspace_id = %self.id,
                path = %self.root.display(),
                error = %e,
                "Failed to remove workspace"
            ),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }

        // Not async-safe to await here; a blocking remove is acceptable on this rare path
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(workspace_id = %self.id, error = %e, "Failed to remove abandoned workspace");
            }
        }
    }
}
