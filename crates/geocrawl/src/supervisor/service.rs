//! Control of the OS services that host workers.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("systemctl not found in PATH")]
    NotInstalled,

    #[error("Failed to run systemctl {action} {service}: {source}")]
    Spawn {
        action: &'static str,
        service: String,
        source: std::io::Error,
    },

    #[error("systemctl {action} {service} failed: {stderr}")]
    Failed {
        action: &'static str,
        service: String,
        stderr: String,
    },
}

/// Starts, stops and probes the service backing a worker group.
#[async_trait]
pub trait ServiceController: Send + Sync {
    async fn is_active(&self, service: &str) -> Result<bool, ServiceError>;
    async fn start(&self, service: &str) -> Result<(), ServiceError>;
    async fn stop(&self, service: &str) -> Result<(), ServiceError>;
}

/// Shells out to `systemctl`.
#[derive(Debug, Clone)]
pub struct SystemctlController {
    binary: PathBuf,
    user: bool,
}

impl SystemctlController {
    /// Locate `systemctl` on `PATH`. `user` selects the per-user manager.
    pub fn new(user: bool) -> Result<Self, ServiceError> {
        let binary = which::which("systemctl").map_err(|_| ServiceError::NotInstalled)?;
        Ok(Self { binary, user })
    }

    fn command(&self, action: &str, service: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        if self.user {
            cmd.arg("--user");
        }
        cmd.args([action, service])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    async fn run(&self, action: &'static str, service: &str) -> Result<(), ServiceError> {
        debug!("systemctl {} {}", action, service);
        let output = self
            .command(action, service)
            .output()
            .await
            .map_err(|source| ServiceError::Spawn {
                action,
                service: service.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(ServiceError::Failed {
                action,
                service: service.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceController for SystemctlController {
    async fn is_active(&self, service: &str) -> Result<bool, ServiceError> {
        // is-active exits non-zero for every state except "active"
        let output = self
            .command("is-active", service)
            .output()
            .await
            .map_err(|source| ServiceError::Spawn {
                action: "is-active",
                service: service.to_string(),
                source,
            })?;
        let state = String::from_utf8_lossy(&output.stdout);
        Ok(output.status.success() && state.trim() == "active")
    }

    async fn start(&self, service: &str) -> Result<(), ServiceError> {
        self.run("start", service).await
    }

    async fn stop(&self, service: &str) -> Result<(), ServiceError> {
        self.run("stop", service).await
    }
}
