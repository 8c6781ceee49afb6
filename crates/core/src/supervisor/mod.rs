//! Concurrency supervision for pipeline jobs.
//!
//! Each submitted job runs on its own tokio task; stages inside a job stay
//! sequential. The supervisor keeps a snapshot of every job for polling,
//! supports cancellation between stages, and can cap how many jobs run at
//! once.

mod config;
mod dispatch;
mod registry;
mod types;

pub use config::{RetentionPolicy, SupervisorConfig};
pub use dispatch::{JobHandle, JobSupervisor};
pub use types::{DiscardOutcome, JobSnapshot, SupervisorStatus};
