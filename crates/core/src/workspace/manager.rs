//! Per-job workspace allocation and cleanup.

use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::WorkspaceError;
use crate::pipeline::JobKind;

/// Number of fresh identifiers tried before giving up on a collision.
const MAX_ACQUIRE_ATTEMPTS: u32 = 4;

/// An exclusively-owned directory holding one job's files.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceHandle {
    id: String,
    path: PathBuf,
}

impl WorkspaceHandle {
    pub(crate) fn new(id: String, path: PathBuf) -> Self {
        Self { id, path }
    }

    /// Workspace identifier (also the directory name).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Absolute path of the workspace directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolves a relative name inside the workspace.
    ///
    /// Absolute names and `..` components are rejected so a caller-supplied
    /// name can never point outside the job's own directory.
    pub fn resolve(&self, name: impl AsRef<Path>) -> Result<PathBuf, WorkspaceError> {
        let name = name.as_ref();
        let escapes = name.as_os_str().is_empty()
            || name.components().any(|c| {
                !matches!(c, Component::Normal(_) | Component::CurDir)
            });
        if escapes {
            return Err(WorkspaceError::PathEscape {
                name: name.display().to_string(),
            });
        }
        Ok(self.path.join(name))
    }

    /// Creates (if needed) a subdirectory and returns its absolute path.
    pub async fn create_subdir(&self, name: &str) -> Result<PathBuf, WorkspaceError> {
        let dir = self.resolve(name)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| WorkspaceError::CreateFailed {
                path: dir.clone(),
                source,
            })?;
        Ok(dir)
    }

    /// Writes `data` to `name` inside the workspace, creating parents.
    pub async fn write_file(&self, name: &str, data: &[u8]) -> Result<PathBuf, WorkspaceError> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| WorkspaceError::WriteFailed {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|source| WorkspaceError::WriteFailed {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

/// Allocates and reclaims job workspaces under a single root.
#[derive(Debug)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    /// Creates the manager, making sure the root exists and is writable.
    ///
    /// A failure here means no job could ever run, so callers should treat
    /// it as fatal at startup.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, WorkspaceError> {
        let root = root.into();
        let unavailable = |source| WorkspaceError::RootUnavailable {
            path: root.clone(),
            source,
        };

        tokio::fs::create_dir_all(&root).await.map_err(unavailable)?;
        let root = tokio::fs::canonicalize(&root).await.map_err(unavailable)?;

        let probe = root.join(format!(".probe-{}", Uuid::new_v4()));
        tokio::fs::write(&probe, b"")
            .await
            .map_err(|source| WorkspaceError::RootUnavailable {
                path: root.clone(),
                source,
            })?;
        let _ = tokio::fs::remove_file(&probe).await;

        info!(root = %root.display(), "Workspace root ready");
        Ok(Self { root })
    }

    /// The canonical workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocates a fresh workspace for a job of the given kind.
    pub async fn acquire(&self, kind: JobKind) -> Result<WorkspaceHandle, WorkspaceError> {
        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            let id = format!("{}-{}", kind.slug(), Uuid::new_v4().simple());
            let path = self.root.join(&id);

            // create_dir (not create_dir_all) fails on an existing directory,
            // so two jobs can never end up sharing one.
            match tokio::fs::create_dir(&path).await {
                Ok(()) => {
                    debug!(workspace = %id, "Workspace acquired");
                    return Ok(WorkspaceHandle::new(id, path));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    warn!(workspace = %id, "Workspace id collision, retrying");
                }
                Err(source) => return Err(WorkspaceError::CreateFailed { path, source }),
            }
        }

        Err(WorkspaceError::Exhausted {
            attempts: MAX_ACQUIRE_ATTEMPTS,
        })
    }

    /// Removes a workspace. Idempotent.
    ///
    /// Releasing an already-released handle, or one whose directory never
    /// existed, succeeds without doing anything. Handles that do not point
    /// directly under this manager's root are left untouched.
    pub async fn release(&self, handle: &WorkspaceHandle) -> Result<(), WorkspaceError> {
        if handle.path().parent() != Some(self.root.as_path()) {
            warn!(
                workspace = %handle.id(),
                path = %handle.path().display(),
                "Refusing to release a path outside the workspace root"
            );
            return Ok(());
        }

        match tokio::fs::remove_dir_all(handle.path()).await {
            Ok(()) => {
                debug!(workspace = %handle.id(), "Workspace released");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(WorkspaceError::ReleaseFailed {
                path: handle.path().to_path_buf(),
                source,
            }),
        }
    }

    /// Removes workspaces whose last modification is older than `max_age`.
    ///
    /// Returns the number of workspaces removed.
    pub async fn sweep_stale(&self, max_age: Duration) -> Result<usize, WorkspaceError> {
        let read_failed = |source| WorkspaceError::RootUnavailable {
            path: self.root.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(read_failed)?;
        let now = SystemTime::now();
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await.map_err(read_failed)? {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_dir() {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }

            let handle = WorkspaceHandle::new(
                entry.file_name().to_string_lossy().to_string(),
                entry.path(),
            );
            self.release(&handle).await?;
            removed += 1;
        }

        if removed > 0 {
            info!(removed, "Swept stale workspaces");
        }
        Ok(removed)
    }
}
