// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to the opaque backup/restore tool.
//!
//! The tool is external and its storage format is its own business.  The
//! contract is narrow: invoke per-tenant with an operation and a scope; a
//! backup prints a snapshot identifier on stdout, a restore exits zero on
//! success.

use super::run_command;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use emporos_common::api::external::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use slog::Logger;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// What the tool should include in the operation.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BackupScope {
    Db,
    Files,
    Both,
}

impl BackupScope {
    fn as_str(&self) -> &'static str {
        match self {
            BackupScope::Db => "db",
            BackupScope::Files => "files",
            BackupScope::Both => "both",
        }
    }
}

impl fmt::Display for BackupScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque identifier returned by a successful backup.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SnapshotId(pub String);

#[async_trait]
pub trait BackupTool: Send + Sync {
    async fn backup(
        &self,
        tenant_id: Uuid,
        scope: BackupScope,
    ) -> Result<SnapshotId, Error>;

    async fn restore(
        &self,
        tenant_id: Uuid,
        scope: BackupScope,
        snapshot: &SnapshotId,
    ) -> Result<(), Error>;
}

/// Stands in when no backup tool is configured; every request is a typed
/// rejection rather than a missing-binary failure at exec time.
pub struct DisabledBackupTool;

#[async_trait]
impl BackupTool for DisabledBackupTool {
    async fn backup(
        &self,
        _tenant_id: Uuid,
        _scope: BackupScope,
    ) -> Result<SnapshotId, Error> {
        Err(Error::invalid_request("no backup tool is configured"))
    }

    async fn restore(
        &self,
        _tenant_id: Uuid,
        _scope: BackupScope,
        _snapshot: &SnapshotId,
    ) -> Result<(), Error> {
        Err(Error::invalid_request("no backup tool is configured"))
    }
}

/// Invokes the configured external backup binary.
pub struct CommandBackupTool {
    log: Logger,
    bin: Utf8PathBuf,
    command_timeout: Duration,
}

impl CommandBackupTool {
    pub fn new(log: Logger, bin: Utf8PathBuf) -> Self {
        CommandBackupTool {
            log,
            bin,
            command_timeout: Duration::from_secs(3600),
        }
    }

    fn base_command(
        &self,
        tenant_id: Uuid,
        op: &str,
        scope: BackupScope,
    ) -> Vec<String> {
        vec![
            self.bin.to_string(),
            "--tenant".to_string(),
            tenant_id.to_string(),
            "--op".to_string(),
            op.to_string(),
            "--scope".to_string(),
            scope.to_string(),
        ]
    }
}

#[async_trait]
impl BackupTool for CommandBackupTool {
    async fn backup(
        &self,
        tenant_id: Uuid,
        scope: BackupScope,
    ) -> Result<SnapshotId, Error> {
        let command = self.base_command(tenant_id, "backup", scope);
        let output =
            run_command(&self.log, &command, self.command_timeout).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let snapshot = stdout.lines().next().unwrap_or("").trim();
        if snapshot.is_empty() {
            return Err(Error::internal_error(
                "backup tool exited successfully but printed no snapshot id",
            ));
        }
        Ok(SnapshotId(snapshot.to_string()))
    }

    async fn restore(
        &self,
        tenant_id: Uuid,
        scope: BackupScope,
        snapshot: &SnapshotId,
    ) -> Result<(), Error> {
        let mut command = self.base_command(tenant_id, "restore", scope);
        command.push("--snapshot".to_string());
        command.push(snapshot.0.clone());
        run_command(&self.log, &command, self.command_timeout).await?;
        Ok(())
    }
}
