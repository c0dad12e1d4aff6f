// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to the ACME certificate tooling.
//!
//! Issuance is best-effort everywhere it is invoked: the pipeline tags its
//! certificate step non-fatal, and the worker retries missing certificates on
//! a background cycle.  A tenant without a certificate stays reachable over
//! plaintext in the meantime.

use super::run_command;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use emporos_common::api::external::Error;
use slog::Logger;
use std::time::Duration;

#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Request (or renew) a certificate for `domain` via the http-01
    /// challenge.  Idempotent if the domain already has a certificate.
    async fn ensure_certificate(&self, domain: &str) -> Result<(), Error>;

    /// Whether a certificate for `domain` is already present on this host.
    async fn has_certificate(&self, domain: &str) -> Result<bool, Error>;
}

/// Issues certificates by invoking the host's ACME client (certbot or
/// compatible).
pub struct CommandIssuer {
    log: Logger,
    /// command prefix; the domain is appended as the final argument
    command: Vec<String>,
    /// directory in which issued certificates land, one subdirectory per
    /// domain
    cert_root: Utf8PathBuf,
    command_timeout: Duration,
}

impl CommandIssuer {
    pub fn new(
        log: Logger,
        command: Vec<String>,
        cert_root: Utf8PathBuf,
    ) -> Self {
        CommandIssuer {
            log,
            command,
            cert_root,
            command_timeout: Duration::from_secs(120),
        }
    }
}

#[async_trait]
impl CertificateIssuer for CommandIssuer {
    async fn ensure_certificate(&self, domain: &str) -> Result<(), Error> {
        let mut command = self.command.clone();
        command.push(domain.to_string());
        run_command(&self.log, &command, self.command_timeout).await?;
        Ok(())
    }

    async fn has_certificate(&self, domain: &str) -> Result<bool, Error> {
        let path = self.cert_root.join(domain).join("fullchain.pem");
        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::unavail(&format!(
                "failed to stat certificate path {}: {}",
                path, e
            ))),
        }
    }
}
