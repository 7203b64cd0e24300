//! Command execution collaborator
//!
//! Runs commands inside pods: the node debug pod during provisioning and
//! the verification workloads afterwards.

use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::kubectl::Kubectl;
use crate::Error;

/// The pod (and optionally container) a command runs in
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecTarget {
    /// Namespace of the pod
    pub namespace: String,
    /// Pod name
    pub pod: String,
    /// Container name, `None` for the pod's default container
    pub container: Option<String>,
}

impl ExecTarget {
    /// Target the default container of a pod
    pub fn pod(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: None,
        }
    }
}

impl fmt::Display for ExecTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod)?;
        if let Some(container) = &self.container {
            write!(f, "[{}]", container)?;
        }
        Ok(())
    }
}

/// Trait abstracting command execution for testability
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `command` in `target` and return its combined output.
    ///
    /// A non-zero exit status is an [`Error::Exec`] carrying the output.
    async fn exec(&self, target: &ExecTarget, command: &[String]) -> Result<String, Error>;
}

/// Executor that shells out to `kubectl exec`
#[derive(Clone, Debug, Default)]
pub struct KubectlExecutor {
    kubectl: Kubectl,
}

impl KubectlExecutor {
    /// Create an executor using the given kubectl
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }
}

/// Arguments for `kubectl exec` against `target`
fn exec_args(target: &ExecTarget, command: &[String]) -> Vec<String> {
    let mut args = vec![
        "exec".to_string(),
        "-n".to_string(),
        target.namespace.clone(),
        target.pod.clone(),
    ];
    if let Some(container) = &target.container {
        args.push("-c".to_string());
        args.push(container.clone());
    }
    args.push("--".to_string());
    args.extend(command.iter().cloned());
    args
}

#[async_trait]
impl CommandExecutor for KubectlExecutor {
    async fn exec(&self, target: &ExecTarget, command: &[String]) -> Result<String, Error> {
        let output = self
            .kubectl
            .run(&exec_args(target, command), None)
            .await?;

        if !output.success {
            return Err(Error::exec(
                target.to_string(),
                format!("`{}`: {}", command.join(" "), output.combined().trim()),
            ));
        }

        Ok(output.combined())
    }
}
