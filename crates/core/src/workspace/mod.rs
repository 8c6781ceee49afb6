//! Job workspace management.
//!
//! Every job gets its own directory under a configured root. The directory is
//! exclusively owned by that job for its lifetime, so concurrent jobs never
//! need to coordinate beyond the atomic directory creation done by
//! [`WorkspaceManager::acquire`].

mod error;
mod manager;

pub use error::WorkspaceError;
pub use manager::{WorkspaceHandle, WorkspaceManager};
