//! Thin async wrapper around the `kubectl` binary

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Captured result of one process invocation
#[derive(Debug)]
pub(crate) struct CommandOutput {
    /// Exit status was zero
    pub success: bool,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// stdout followed by stderr, the way a terminal would show them
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout.trim_end(), self.stderr)
        }
    }
}

/// Run a program to completion, optionally feeding `stdin`
pub(crate) async fn run_command(
    program: &str,
    args: &[String],
    stdin: Option<&[u8]>,
) -> std::io::Result<CommandOutput> {
    debug!(program, args = %args.join(" "), "running command");

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // stdin is written from its own task while stdout drains; dropping the
    // pipe signals EOF
    let writer = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => {
            let input = input.to_vec();
            Some(tokio::spawn(async move { pipe.write_all(&input).await }))
        }
        _ => None,
    };

    let output = child.wait_with_output().await?;
    if let Some(writer) = writer {
        writer.await.map_err(std::io::Error::other)??;
    }
    Ok(CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// `kubectl` bound to an optional kubeconfig
#[derive(Clone, Debug, Default)]
pub struct Kubectl {
    kubeconfig: Option<PathBuf>,
}

impl Kubectl {
    /// Use the given kubeconfig, or kubectl's own resolution when `None`
    pub fn new(kubeconfig: Option<PathBuf>) -> Self {
        Self { kubeconfig }
    }

    /// Run `kubectl` with `args`
    pub(crate) async fn run(
        &self,
        args: &[String],
        stdin: Option<&[u8]>,
    ) -> std::io::Result<CommandOutput> {
        let mut full_args = Vec::with_capacity(args.len() + 2);
        if let Some(path) = &self.kubeconfig {
            full_args.push("--kubeconfig".to_string());
            full_args.push(path.to_string_lossy().to_string());
        }
        full_args.extend(args.iter().cloned());
        run_command("kubectl", &full_args, stdin).await
    }
}
