//! Resource declaration collaborator
//!
//! Declarations are YAML files addressed by path. Creation uses
//! `kubectl create` so that an object left behind by someone else is an
//! install failure instead of something this run would later delete.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::kubectl::{run_command, Kubectl};
use crate::Error;

/// A resource declaration and where it is applied
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Declaration {
    /// Path of the YAML file
    pub path: PathBuf,
    /// Namespace it is created in
    pub namespace: String,
    /// Shell filter the file is piped through before creation
    pub patch_command: Option<String>,
}

impl Declaration {
    /// A declaration applied as-is
    pub fn new(path: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            namespace: namespace.into(),
            patch_command: None,
        }
    }

    /// Pipe the file through `command` before creating it
    pub fn with_patch(mut self, command: Option<String>) -> Self {
        self.patch_command = command;
        self
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (-n {})", self.path.display(), self.namespace)
    }
}

/// Trait abstracting declaration application for testability
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManifestApplier: Send + Sync {
    /// Create the objects in a declaration
    async fn apply(&self, declaration: &Declaration) -> Result<(), Error>;

    /// Delete the objects in a declaration; absent objects are not an error
    async fn delete(&self, declaration: &Declaration) -> Result<(), Error>;
}

/// Applier that shells out to `kubectl create` / `kubectl delete`
#[derive(Clone, Debug, Default)]
pub struct KubectlApplier {
    kubectl: Kubectl,
}

impl KubectlApplier {
    /// Create an applier using the given kubectl
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }

    /// Render a declaration through its patch command
    async fn render(&self, declaration: &Declaration, command: &str) -> Result<Vec<u8>, Error> {
        let content = tokio::fs::read(&declaration.path).await?;
        let output = run_command(
            "sh",
            &["-c".to_string(), command.to_string()],
            Some(&content),
        )
        .await?;

        if !output.success {
            return Err(Error::install(
                declaration.to_string(),
                format!("patch command `{}` failed: {}", command, output.stderr.trim()),
            ));
        }
        Ok(output.stdout.into_bytes())
    }
}

#[async_trait]
impl ManifestApplier for KubectlApplier {
    async fn apply(&self, declaration: &Declaration) -> Result<(), Error> {
        info!(declaration = %declaration, "creating");

        let output = match &declaration.patch_command {
            Some(command) => {
                let rendered = self.render(declaration, command).await?;
                self.kubectl
                    .run(
                        &create_args("-", &declaration.namespace),
                        Some(&rendered),
                    )
                    .await?
            }
            None => {
                let path = declaration.path.to_string_lossy();
                self.kubectl
                    .run(&create_args(&path, &declaration.namespace), None)
                    .await?
            }
        };

        if !output.success {
            return Err(Error::install(
                declaration.to_string(),
                output.stderr.trim().to_string(),
            ));
        }
        Ok(())
    }

    async fn delete(&self, declaration: &Declaration) -> Result<(), Error> {
        info!(declaration = %declaration, "deleting");

        let path = declaration.path.to_string_lossy();
        let output = self
            .kubectl
            .run(&delete_args(&path, &declaration.namespace), None)
            .await?;

        if !output.success {
            return Err(Error::cleanup(
                format!("delete {}", declaration),
                output.stderr.trim().to_string(),
            ));
        }
        Ok(())
    }
}

fn create_args(file: &str, namespace: &str) -> Vec<String> {
    ["create", "-f", file, "-n", namespace]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn delete_args(file: &str, namespace: &str) -> Vec<String> {
    ["delete", "-f", file, "-n", namespace, "--ignore-not-found"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
