// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task measuring tenant consumption against quota
//!
//! Runs on the worker, over the tenants hosted there (their workspaces and
//! access logs are local files).  Writes one usage sample per tenant per
//! day and raises deduplicated threshold alerts.

use crate::background::BackgroundTask;
use crate::db::model::{QuotaAlert, TenantState, UsageSample};
use crate::db::DataStore;
use crate::usage;
use camino::Utf8PathBuf;
use chrono::{Datelike, TimeZone, Utc};
use emporos_common::api::external::AlertKind;
use emporos_common::api::external::Error;
use futures::future::BoxFuture;
use futures::FutureExt;
use slog::Logger;
use std::sync::Arc;
use uuid::Uuid;

pub struct QuotaMonitor {
    datastore: Arc<DataStore>,
    server_id: Uuid,
    workspace_root: Utf8PathBuf,
    access_log_dir: Utf8PathBuf,
    alert_cooldown: chrono::Duration,
}

impl QuotaMonitor {
    pub fn new(
        datastore: Arc<DataStore>,
        server_id: Uuid,
        workspace_root: Utf8PathBuf,
        access_log_dir: Utf8PathBuf,
        alert_cooldown: chrono::Duration,
    ) -> Self {
        QuotaMonitor {
            datastore,
            server_id,
            workspace_root,
            access_log_dir,
            alert_cooldown,
        }
    }

    async fn sample_tenant(
        &self,
        log: &Logger,
        tenant_id: Uuid,
    ) -> Result<usize, Error> {
        let quota = match self.datastore.quota_fetch(tenant_id).await {
            Ok(quota) => quota,
            Err(Error::ObjectNotFound { .. }) => {
                // An active tenant without a grant shouldn't happen, but the
                // monitor's job is measurement, not repair.
                warn!(
                    log,
                    "active tenant has no quota grant; skipping";
                    "tenant_id" => %tenant_id,
                );
                return Ok(0);
            }
            Err(error) => return Err(error),
        };

        let now = Utc::now();
        // Bandwidth counts from the start of the current billing period
        // (calendar month).
        let period_start = Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .unwrap();
        let workspace = self.workspace_root.join(tenant_id.to_string());
        let access_log =
            self.access_log_dir.join(format!("{}.access.log", tenant_id));

        let (disk_bytes, bandwidth_bytes) =
            tokio::task::spawn_blocking(move || {
                let disk = usage::directory_size(workspace.as_std_path())?;
                let bandwidth = usage::bandwidth_since(
                    access_log.as_std_path(),
                    period_start,
                )?;
                Ok::<_, std::io::Error>((disk, bandwidth))
            })
            .await
            .map_err(|e| {
                Error::internal_error(&format!(
                    "usage measurement task panicked: {}",
                    e
                ))
            })?
            .map_err(|e| {
                Error::unavail(&format!(
                    "failed to measure usage for tenant {}: {}",
                    tenant_id, e
                ))
            })?;

        self.datastore
            .usage_upsert(UsageSample::new(
                tenant_id,
                now.date_naive(),
                disk_bytes,
                bandwidth_bytes,
            ))
            .await?;

        let mut alerts_raised = 0;
        let checks = [
            (AlertKind::Disk, disk_bytes, quota.disk_bytes_limit as u64),
            (
                AlertKind::Bandwidth,
                bandwidth_bytes,
                quota.bandwidth_bytes_limit as u64,
            ),
        ];
        for (kind, used, limit) in checks {
            let Some(severity) = usage::evaluate_usage(used, limit) else {
                continue;
            };
            let recorded = self
                .datastore
                .alert_record_deduped(
                    QuotaAlert::new(tenant_id, kind, severity, used, limit),
                    self.alert_cooldown,
                )
                .await?;
            if let Some(alert) = recorded {
                warn!(
                    log,
                    "tenant exceeded quota threshold";
                    "tenant_id" => %tenant_id,
                    "kind" => %kind,
                    "severity" => %severity,
                    "used_bytes" => alert.usage_bytes,
                    "limit_bytes" => alert.limit_bytes,
                );
                alerts_raised += 1;
            }
        }
        Ok(alerts_raised)
    }
}

impl BackgroundTask for QuotaMonitor {
    fn activate<'a>(
        &'a mut self,
        log: &'a Logger,
    ) -> BoxFuture<'a, serde_json::Value> {
        async move {
            let tenants = match self
                .datastore
                .tenant_list_on_server(self.server_id, TenantState::Active)
                .await
            {
                Ok(tenants) => tenants,
                Err(error) => {
                    error!(
                        log,
                        "failed to list tenants for quota sampling";
                        "error" => %error,
                    );
                    return serde_json::json!({ "error": error.to_string() });
                }
            };

            let mut sampled = 0;
            let mut alerts = 0;
            let mut errors = 0;
            for tenant in &tenants {
                match self.sample_tenant(log, tenant.id).await {
                    Ok(raised) => {
                        sampled += 1;
                        alerts += raised;
                    }
                    Err(error) => {
                        errors += 1;
                        error!(
                            log,
                            "failed to sample tenant usage";
                            "tenant_id" => %tenant.id,
                            "error" => %error,
                        );
                    }
                }
            }
            serde_json::json!({
                "tenants_sampled": sampled,
                "alerts_raised": alerts,
                "errors": errors,
            })
        }
        .boxed()
    }
}
