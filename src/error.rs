//! Error types for the SR-IOV harness

use std::time::Duration;

use thiserror::Error;

/// Main error type for harness operations
///
/// Every variant except [`Error::Cleanup`] is a hard failure: it short-circuits
/// the phase that produced it and routes the run straight to teardown.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A provisioning (or vfio bind) attempt reported failure on a node
    #[error("provisioning failed on node {node} for {resource}: {reason}")]
    Probe {
        /// Node the probe ran against
        node: String,
        /// Resource name of the catalog device
        resource: String,
        /// Output or reason reported by the node script
        reason: String,
    },

    /// The command execution collaborator could not run a command
    #[error("exec in {target} failed: {message}")]
    Exec {
        /// Pod (and namespace) the command targeted
        target: String,
        /// Error message
        message: String,
    },

    /// A resource declaration could not be applied
    #[error("install of {step} failed: {message}")]
    Install {
        /// Installation step or declaration being applied
        step: String,
        /// Error message
        message: String,
    },

    /// A readiness wait ran out of time
    #[error("timed out after {timeout:?} waiting for {target}")]
    ReadinessTimeout {
        /// What was being waited on
        target: String,
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// A workload or allocatable check did not match expectations
    #[error("verification failed for {resource} on node {node}: {reason}")]
    Verification {
        /// Node the resource was provisioned on
        node: String,
        /// Resource name under verification
        resource: String,
        /// What did not match
        reason: String,
    },

    /// A cleanup action failed (logged, never escalated)
    #[error("cleanup {action} failed: {message}")]
    Cleanup {
        /// Description of the cleanup action
        action: String,
        /// Error message
        message: String,
    },

    /// Invalid harness configuration
    #[error("invalid config: {0}")]
    Config(String),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a probe failure for a node/resource pair
    pub fn probe(
        node: impl Into<String>,
        resource: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Probe {
            node: node.into(),
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Create an exec error for the given target
    pub fn exec(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Exec {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create an install error for the given step
    pub fn install(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Install {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Create a readiness timeout error
    pub fn readiness_timeout(target: impl Into<String>, timeout: Duration) -> Self {
        Self::ReadinessTimeout {
            target: target.into(),
            timeout,
        }
    }

    /// Create a verification error for a node/resource pair
    pub fn verification(
        node: impl Into<String>,
        resource: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Verification {
            node: node.into(),
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Create a cleanup error for the given action
    pub fn cleanup(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Cleanup {
            action: action.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error aborts the phase it occurred in
    pub fn is_hard(&self) -> bool {
        !matches!(self, Self::Cleanup { .. })
    }
}
