//! Container image tooling
//!
//! Building images is delegated to an external tool; the deploy sequence
//! only needs build, registry login, tag and push. [`DockerCli`] drives the
//! `docker` executable.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::aws::ecr::RegistryCredentials;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to run {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{command}` timed out after {}s", timeout.as_secs())]
    Timeout { command: String, timeout: Duration },
}

/// Build, authenticate, tag and push container images
#[async_trait]
pub trait ImageTool: Send + Sync {
    /// Build the image in `context` under the local name `image`
    async fn build(&self, context: &Path, image: &str) -> Result<(), ImageError>;

    async fn login(&self, credentials: &RegistryCredentials) -> Result<(), ImageError>;

    async fn tag(&self, source: &str, target: &str) -> Result<(), ImageError>;

    async fn push(&self, image: &str) -> Result<(), ImageError>;
}

/// The `docker` command line
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    build_timeout: Duration,
    command_timeout: Duration,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
            build_timeout: Duration::from_secs(1800),
            command_timeout: Duration::from_secs(600),
        }
    }
}

impl DockerCli {
    /// Use a different executable (podman, a wrapper script)
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Run one subcommand; `stdin` is written to the child and then closed.
    ///
    /// The child is killed if the timeout elapses.
    async fn run(
        &self,
        args: &[&str],
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<(), ImageError> {
        // Never includes secrets: those only travel on stdin
        let command = format!("{} {}", self.program, args.join(" "));
        debug!(command = %command, "Running image command");

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ImageError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|source| ImageError::Spawn {
                    program: self.program.clone(),
                    source,
                })?;
        }

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ImageError::Spawn {
                program: self.program.clone(),
                source,
            })?,
            Err(_) => {
                warn!(command = %command, timeout_secs = timeout.as_secs(), "Image command timed out, killing process");
                return Err(ImageError::Timeout { command, timeout });
            }
        };

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ImageError::Failed {
                command,
                status: output.status.to_string(),
                stderr: tail(&stderr, 20),
            })
        }
    }
}

/// Last `lines` lines of tool output
fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[async_trait]
impl ImageTool for DockerCli {
    async fn build(&self, context: &Path, image: &str) -> Result<(), ImageError> {
        let context = context.to_string_lossy();
        info!(image = %image, context = %context, "Building image");
        self.run(&["build", "-t", image, &context], None, self.build_timeout)
            .await
    }

    async fn login(&self, credentials: &RegistryCredentials) -> Result<(), ImageError> {
        info!(registry = %credentials.endpoint, "Logging in to registry");
        self.run(
            &[
                "login",
                "--username",
                &credentials.username,
                "--password-stdin",
                &credentials.endpoint,
            ],
            Some(&credentials.password),
            self.command_timeout,
        )
        .await
    }

    async fn tag(&self, source: &str, target: &str) -> Result<(), ImageError> {
        self.run(&["tag", source, target], None, self.command_timeout)
            .await
    }

    async fn push(&self, image: &str) -> Result<(), ImageError> {
        info!(image = %image, "Pushing image");
        self.run(&["push", image], None, self.command_timeout)
            .await
    }
}
