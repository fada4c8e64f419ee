//! Ordered, fail-fast execution of a rule's actions.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::registry::Action;

/// A single action failed.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// The executable could not be started.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// Executable that was requested.
        command: String,
        /// OS-level error.
        #[source]
        source: io::Error,
    },
    /// Waiting on the child process failed.
    #[error("failed to wait for process: {0}")]
    Wait(#[source] io::Error),
    /// The process exited unsuccessfully.
    #[error("process exited unsuccessfully ({0})")]
    Failed(ExitStatus),
    /// The process outlived its timeout and was killed.
    #[error("process timed out after {0:?} and was killed")]
    TimedOut(Duration),
}

/// An action chain stopped early.
#[derive(Debug, thiserror::Error)]
#[error("action {index} ({description}) failed: {source}")]
pub struct DispatchError {
    /// Zero-based position of the failing action.
    pub index: usize,
    /// Label of the failing action.
    pub description: String,
    /// Why it failed.
    #[source]
    pub source: ActionError,
}

/// Runs one action to completion.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    /// Run the action and report success or failure.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError`] if the action cannot start, fails, or times out.
    async fn run(&self, action: &Action) -> Result<(), ActionError>;
}

/// Runs actions as child processes without a shell.
///
/// Children inherit stdout and stderr; stdin is closed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl ActionRunner for ProcessRunner {
    async fn run(&self, action: &Action) -> Result<(), ActionError> {
        let mut child = tokio::process::Command::new(&action.command)
            .args(&action.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ActionError::Spawn {
                command: action.command.clone(),
                source,
            })?;

        let status = match action.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        warn!(command = %action.command, error = %e, "failed to kill timed-out action");
                    }
                    return Err(ActionError::TimedOut(limit));
                }
            },
            None => child.wait().await,
        }
        .map_err(ActionError::Wait)?;

        if status.success() {
            Ok(())
        } else {
            Err(ActionError::Failed(status))
        }
    }
}

/// Run `actions` in order, stopping at the first failure.
///
/// Returns the number of actions that ran successfully.
///
/// # Errors
///
/// Returns [`DispatchError`] naming the first action that failed. Later
/// actions are not run.
pub async fn dispatch(runner: &dyn ActionRunner, actions: &[Action]) -> Result<usize, DispatchError> {
    for (index, action) in actions.iter().enumerate() {
        info!(index, action = action.label(), command = %action.command, "running action");
        if let Err(source) = runner.run(action).await {
            return Err(DispatchError {
                index,
                description: action.label().to_owned(),
                source,
            });
        }
    }
    Ok(actions.len())
}
