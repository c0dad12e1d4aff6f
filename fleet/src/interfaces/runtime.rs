// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to the container runtime hosting tenant environments.

use super::run_command;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use emporos_common::api::external::Error;
use slog::Logger;
use std::time::Duration;
use uuid::Uuid;

/// Identifies one tenant's runtime environment on this host.
#[derive(Clone, Debug)]
pub struct EnvironmentSpec {
    pub tenant_id: Uuid,
    /// compose project name; containers and volumes are labeled with this
    pub project: String,
    /// the tenant's workspace directory
    pub workspace: Utf8PathBuf,
    /// rendered compose file within the workspace
    pub compose_file: Utf8PathBuf,
}

impl EnvironmentSpec {
    pub fn new(tenant_id: Uuid, workspace: Utf8PathBuf) -> Self {
        let compose_file = workspace.join("docker-compose.yml");
        EnvironmentSpec {
            tenant_id,
            project: format!("emporos-{}", tenant_id.simple()),
            workspace,
            compose_file,
        }
    }
}

/// Operations the pipeline needs from the container runtime.  All three are
/// idempotent; in particular, tearing down an environment that does not exist
/// is a no-op.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Bring the environment up (creating or restarting containers as
    /// needed).
    async fn ensure_up(&self, env: &EnvironmentSpec) -> Result<(), Error>;

    /// Stop the environment's containers, preserving volumes.  Used by
    /// suspension.
    async fn stop(&self, env: &EnvironmentSpec) -> Result<(), Error>;

    /// Stop and remove the environment *including volumes*.  This is the
    /// idempotency linchpin of the pipeline: every attempt destroys whatever
    /// a previous attempt left behind before starting fresh.
    async fn destroy(&self, env: &EnvironmentSpec) -> Result<(), Error>;

    /// Probe the environment's health surface once.
    async fn check_health(
        &self,
        env: &EnvironmentSpec,
        port: u16,
    ) -> Result<(), Error>;
}

/// Drives tenant environments through a compose-compatible CLI.
pub struct ComposeRuntime {
    log: Logger,
    compose_bin: String,
    command_timeout: Duration,
    client: reqwest::Client,
}

impl ComposeRuntime {
    pub fn new(log: Logger, compose_bin: String) -> Self {
        ComposeRuntime {
            log,
            compose_bin,
            command_timeout: Duration::from_secs(300),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    fn compose_command(
        &self,
        env: &EnvironmentSpec,
        action: &[&str],
    ) -> Vec<String> {
        let mut cmd = vec![
            self.compose_bin.clone(),
            "compose".to_string(),
            "--project-name".to_string(),
            env.project.clone(),
            "-f".to_string(),
            env.compose_file.to_string(),
        ];
        cmd.extend(action.iter().map(|s| s.to_string()));
        cmd
    }
}

#[async_trait]
impl ContainerRuntime for ComposeRuntime {
    async fn ensure_up(&self, env: &EnvironmentSpec) -> Result<(), Error> {
        run_command(
            &self.log,
            &self.compose_command(env, &["up", "-d"]),
            self.command_timeout,
        )
        .await?;
        Ok(())
    }

    async fn stop(&self, env: &EnvironmentSpec) -> Result<(), Error> {
        if !env.compose_file.exists() {
            return Ok(());
        }
        run_command(
            &self.log,
            &self.compose_command(env, &["stop"]),
            self.command_timeout,
        )
        .await?;
        Ok(())
    }

    async fn destroy(&self, env: &EnvironmentSpec) -> Result<(), Error> {
        // Without a compose file there is nothing to address; treat that as
        // the environment not existing.
        if !env.compose_file.exists() {
            return Ok(());
        }
        run_command(
            &self.log,
            &self.compose_command(
                env,
                &["down", "--volumes", "--remove-orphans"],
            ),
            self.command_timeout,
        )
        .await?;
        Ok(())
    }

    async fn check_health(
        &self,
        env: &EnvironmentSpec,
        port: u16,
    ) -> Result<(), Error> {
        let url = format!("http://127.0.0.1:{}/", port);
        let response =
            self.client.get(&url).send().await.map_err(|e| {
                Error::unavail(&format!(
                    "health probe of {} ({}) failed: {}",
                    env.project, url, e
                ))
            })?;
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            Ok(())
        } else {
            Err(Error::unavail(&format!(
                "health probe of {} returned {}",
                env.project, status
            )))
        }
    }
}
