//! Error types for the workspace module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while allocating or reclaiming job storage.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The workspace root cannot be created or written to.
    #[error("Workspace root is not usable: {path}: {source}")]
    RootUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A job directory could not be created.
    #[error("Failed to create workspace {path}: {source}")]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Repeated identifier collisions while allocating a workspace.
    #[error("Could not allocate a unique workspace after {attempts} attempts")]
    Exhausted { attempts: u32 },

    /// Writing a file into a workspace failed.
    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A workspace directory could not be removed.
    #[error("Failed to release workspace {path}: {source}")]
    ReleaseFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A relative name would resolve outside of its workspace.
    #[error("Path escapes workspace: {name}")]
    PathEscape { name: String },
}
