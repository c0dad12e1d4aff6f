// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to the notification collaborator.
//!
//! Dispatch is fire-and-forget: a delivery failure is logged by the caller
//! and never rolls back provisioning.

use async_trait::async_trait;
use emporos_common::api::external::Error;
use serde::Serialize;
use slog::Logger;
use std::time::Duration;
use uuid::Uuid;

/// The message sent when a tenant finishes provisioning.  Carries the
/// temporary admin credentials; the receiving collaborator is responsible
/// for getting them to the customer.
#[derive(Clone, Debug, Serialize)]
pub struct ProvisionedNotice {
    pub tenant_id: Uuid,
    pub store_url: String,
    pub admin_url: String,
    pub admin_user: String,
    pub admin_password: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_provisioned(
        &self,
        notice: &ProvisionedNotice,
    ) -> Result<(), Error>;
}

/// Posts notices to a webhook endpoint.
pub struct WebhookNotifier {
    log: Logger,
    endpoint: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(log: Logger, endpoint: String) -> Self {
        WebhookNotifier {
            log,
            endpoint,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build HTTP client"),
        }
    }
}

/// Fallback notifier used when no webhook endpoint is configured: records
/// that provisioning finished without the credentials themselves.
pub struct LogNotifier {
    log: Logger,
}

impl LogNotifier {
    pub fn new(log: Logger) -> Self {
        LogNotifier { log }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_provisioned(
        &self,
        notice: &ProvisionedNotice,
    ) -> Result<(), Error> {
        info!(
            self.log,
            "tenant provisioned (no notification endpoint configured)";
            "tenant_id" => %notice.tenant_id,
            "store_url" => &notice.store_url,
            "admin_url" => &notice.admin_url,
        );
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_provisioned(
        &self,
        notice: &ProvisionedNotice,
    ) -> Result<(), Error> {
        debug!(
            self.log,
            "dispatching provisioned notice";
            "tenant_id" => %notice.tenant_id,
            "endpoint" => &self.endpoint,
        );
        let response = self
            .client
            .post(&self.endpoint)
            .json(notice)
            .send()
            .await
            .map_err(|e| {
                Error::unavail(&format!(
                    "notification dispatch failed: {}",
                    e
                ))
            })?;
        if !response.status().is_success() {
            return Err(Error::unavail(&format!(
                "notification endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
