//! Trait definitions for the stage module.

use async_trait::async_trait;

use super::types::{StageInvocation, StageResult};

/// Runs one external tool invocation to completion.
///
/// Implementations never retry and never panic on tool failure: every
/// outcome, including a tool that cannot be started, comes back as a
/// [`StageResult`].
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Returns the name of this executor implementation.
    fn name(&self) -> &str;

    /// Runs the invocation and verifies its expected output.
    async fn run(&self, invocation: &StageInvocation) -> StageResult;
}
