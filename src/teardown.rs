//! Teardown Stack - everything the run created, undone in reverse
//!
//! Cleanup actions are pushed as soon as the thing they undo exists and are
//! drained once, newest first, when the run ends for any reason. A failing
//! action is recorded and the drain moves on to the next one.

use std::fmt;
use std::future::Future;

use serde::Serialize;
use tracing::{info, warn};

use crate::apply::Declaration;
use crate::Error;

/// A side-effect-only undo step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CleanupAction {
    /// Remove the provisioning label from a node
    RemoveNodeLabel {
        /// Node carrying the label
        node: String,
        /// Label key to remove
        key: String,
    },
    /// Delete the declarations of one installation step, last applied first
    Uninstall {
        /// Installation step name
        step: String,
        /// Declarations in the order they were applied
        declarations: Vec<Declaration>,
    },
    /// Delete a verification workload
    DeleteWorkload {
        /// Pod name
        pod: String,
        /// Declaration the pod was created from
        declaration: Declaration,
    },
    /// Release vfio-bound VFs on a node
    UnbindVfio {
        /// Node whose VFs were bound
        node: String,
    },
}

impl fmt::Display for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoveNodeLabel { node, key } => {
                write!(f, "remove label {} from node {}", key, node)
            }
            Self::Uninstall { step, .. } => write!(f, "uninstall {}", step),
            Self::DeleteWorkload { pod, .. } => write!(f, "delete workload {}", pod),
            Self::UnbindVfio { node } => write!(f, "unbind vfio VFs on node {}", node),
        }
    }
}

/// A cleanup action that did not succeed
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    /// Description of the action
    pub action: String,
    /// Last error reported for it
    pub error: String,
}

/// Outcome of draining a [`TeardownStack`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// Actions that completed, in execution order
    pub completed: Vec<String>,
    /// Actions that failed, in execution order
    pub failed: Vec<CleanupFailure>,
}

impl TeardownReport {
    /// Number of actions executed, successful or not
    pub fn executed(&self) -> usize {
        self.completed.len() + self.failed.len()
    }

    /// Whether every action succeeded
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// LIFO stack of [`CleanupAction`]s
#[derive(Debug, Default)]
pub struct TeardownStack {
    actions: Vec<CleanupAction>,
}

impl TeardownStack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action
    pub fn push(&mut self, action: CleanupAction) {
        info!(action = %action, "registered cleanup");
        self.actions.push(action);
    }

    /// Registered actions in registration order
    pub fn actions(&self) -> &[CleanupAction] {
        &self.actions
    }

    /// Number of registered actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every registered action, newest first, exactly once.
    ///
    /// Errors from `run` are logged and recorded; they never stop the drain.
    /// The stack is empty afterwards, so a second drain does nothing.
    pub async fn drain<F, Fut>(&mut self, mut run: F) -> TeardownReport
    where
        F: FnMut(CleanupAction) -> Fut,
        Fut: Future<Output = Result<(), Error>>,
    {
        let actions = std::mem::take(&mut self.actions);
        let mut report = TeardownReport::default();

        for action in actions.into_iter().rev() {
            let description = action.to_string();
            match run(action).await {
                Ok(()) => {
                    info!(action = %description, "cleanup complete");
                    report.completed.push(description);
                }
                Err(e) => {
                    warn!(action = %description, error = %e, "cleanup failed, continuing");
                    report.failed.push(CleanupFailure {
                        action: description,
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }
}
