// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Seams to the external collaborators the pipeline drives
//!
//! Each collaborator (container runtime, reverse proxy, certificate issuer,
//! notification sink, backup tool) is behind a trait so that the pipeline can
//! be exercised end-to-end against the simulated implementations in
//! [`crate::sim`].  The real implementations shell out to host tooling with
//! explicit timeouts; a hung external tool must never wedge the worker
//! forever.

pub mod backup;
pub mod certificates;
pub mod notify;
pub mod proxy;
pub mod runtime;

use emporos_common::api::external::Error;
use slog::Logger;
use std::process::Output;
use std::time::Duration;

/// Runs an external command to completion, bounded by `timeout`.
///
/// Non-zero exit and timeout both map to `ServiceUnavailable`: from the
/// pipeline's perspective a misbehaving external tool is transient
/// infrastructure failure, retryable on a later attempt.
pub(crate) async fn run_command(
    log: &Logger,
    command: &[String],
    timeout: Duration,
) -> Result<Output, Error> {
    let Some((program, args)) = command.split_first() else {
        return Err(Error::internal_error("cannot run an empty command"));
    };
    debug!(log, "running external command"; "command" => command.join(" "));
    let fut = tokio::process::Command::new(program).args(args).output();
    let output = tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| {
            Error::unavail(&format!(
                "command {:?} timed out after {:?}",
                program, timeout
            ))
        })?
        .map_err(|e| {
            Error::unavail(&format!("failed to execute {:?}: {}", program, e))
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::unavail(&format!(
            "command {:?} failed ({}): {}",
            program,
            output.status,
            stderr.trim()
        )));
    }
    Ok(output)
}
