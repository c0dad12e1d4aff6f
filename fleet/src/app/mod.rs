// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Application-level logic of the central controller
//!
//! The [`Controller`] sits between the HTTP surface and the datastore: it
//! validates intake requests, routes tenants to worker hosts, enqueues jobs,
//! and applies administrative actions.  It never touches a tenant's
//! containers directly — that is the workers' job, reached only through the
//! shared database.

pub mod routing;
pub mod status;

use crate::db::model::{JobKind, ProvisioningJob, Tenant, TenantState};
use crate::db::DataStore;
use crate::external_api::params;
use crate::external_api::views;
use crate::interfaces::backup::{BackupScope, BackupTool, SnapshotId};
use emporos_common::api::external::CreateResult;
use emporos_common::api::external::Error;
use emporos_common::api::external::ListResultVec;
use emporos_common::api::external::LookupResult;
use emporos_common::api::external::UpdateResult;
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct Controller {
    pub(crate) log: Logger,
    datastore: Arc<DataStore>,
    pub(crate) liveness_window: chrono::Duration,
    pub(crate) probe_timeout: Duration,
    backup: Arc<dyn BackupTool>,
}

impl Controller {
    pub fn new(
        log: Logger,
        datastore: Arc<DataStore>,
        liveness_window: chrono::Duration,
        probe_timeout: Duration,
        backup: Arc<dyn BackupTool>,
    ) -> Self {
        Controller { log, datastore, liveness_window, probe_timeout, backup }
    }

    pub fn datastore(&self) -> &Arc<DataStore> {
        &self.datastore
    }

    /// Intake: create the tenant record and enqueue its provisioning job.
    ///
    /// The caller always gets either a job id or a typed rejection —
    /// duplicate identity fails at record creation (before anything is
    /// enqueued), and lack of eligible servers fails before the record is
    /// created at all.
    pub async fn tenant_provision(
        &self,
        params: params::TenantCreate,
    ) -> CreateResult<views::ProvisionAccepted> {
        let server = self
            .route_new_tenant(params.server.as_ref().map(|s| s.as_str()))
            .await?;

        let tenant = self
            .datastore
            .tenant_create(Tenant::new(
                Uuid::new_v4(),
                &params.name,
                &params.domain,
                params.platform,
                params.plan,
            ))
            .await?;
        self.datastore.tenant_set_assignment(tenant.id, server.id).await?;

        let job = self
            .datastore
            .job_create(ProvisioningJob::new(
                tenant.id,
                server.id,
                JobKind::Provision,
            ))
            .await?;
        info!(
            self.log,
            "tenant intake accepted";
            "tenant_id" => %tenant.id,
            "server" => &server.name,
            "job_id" => %job.id,
        );
        Ok(views::ProvisionAccepted { tenant_id: tenant.id, job_id: job.id })
    }

    /// Re-enqueues provisioning for a failed tenant.  `AlreadyInFlight`
    /// surfaces as a conflict if a job is still queued or running.
    pub async fn tenant_retry(
        &self,
        tenant_id: Uuid,
    ) -> CreateResult<views::ProvisionAccepted> {
        let tenant = self.datastore.tenant_fetch(tenant_id).await?;
        if !matches!(
            tenant.state,
            TenantState::Failed | TenantState::Pending
        ) {
            return Err(Error::conflict(format!(
                "tenant {} is {:?}; only failed or pending tenants can be \
                 retried",
                tenant_id, tenant.state
            )));
        }

        // Prefer the existing assignment so the retry can reuse its port
        // and workspace; re-route only if that server is no longer eligible.
        let server = match tenant.server_id {
            Some(server_id) => {
                let server = self.datastore.server_fetch(server_id).await?;
                let counts = self.datastore.server_tenant_counts().await?;
                let still_eligible = routing::pick_server(
                    std::slice::from_ref(&server),
                    &counts,
                    chrono::Utc::now(),
                    self.liveness_window,
                    None,
                );
                match still_eligible {
                    Some(_) => server,
                    None => self.route_new_tenant(None).await?,
                }
            }
            None => self.route_new_tenant(None).await?,
        };
        if tenant.server_id != Some(server.id) {
            self.datastore
                .tenant_set_assignment(tenant.id, server.id)
                .await?;
        }

        let job = self
            .datastore
            .job_create(ProvisioningJob::new(
                tenant.id,
                server.id,
                JobKind::Provision,
            ))
            .await?;
        Ok(views::ProvisionAccepted { tenant_id, job_id: job.id })
    }

    pub async fn tenant_view(
        &self,
        tenant_id: Uuid,
    ) -> LookupResult<views::Tenant> {
        Ok(self.datastore.tenant_fetch(tenant_id).await?.into())
    }

    pub async fn tenant_list(&self) -> ListResultVec<views::Tenant> {
        Ok(self
            .datastore
            .tenant_list()
            .await?
            .into_iter()
            .map(views::Tenant::from)
            .collect())
    }

    pub async fn tenant_jobs(
        &self,
        tenant_id: Uuid,
    ) -> ListResultVec<views::Job> {
        // Ensure the tenant exists so an unknown id is a 404, not an empty
        // list.
        self.datastore.tenant_fetch(tenant_id).await?;
        Ok(self
            .datastore
            .job_list_for_tenant(tenant_id)
            .await?
            .into_iter()
            .map(views::Job::from)
            .collect())
    }

    pub async fn tenant_suspend(
        &self,
        tenant_id: Uuid,
        reason: &str,
    ) -> UpdateResult<()> {
        self.datastore.tenant_suspend(tenant_id, reason, false).await?;
        info!(
            self.log,
            "tenant suspended";
            "tenant_id" => %tenant_id,
            "reason" => reason.to_string(),
        );
        Ok(())
    }

    pub async fn tenant_resume(&self, tenant_id: Uuid) -> UpdateResult<()> {
        self.datastore.tenant_resume(tenant_id).await?;
        info!(self.log, "tenant resumed"; "tenant_id" => %tenant_id);
        Ok(())
    }

    /// Deletes a tenant.  A tenant holding backing resources gets a teardown
    /// job on its server's queue (deletion is always preceded by resource
    /// teardown); one that never acquired resources is deleted inline.
    pub async fn tenant_destroy(
        &self,
        tenant_id: Uuid,
    ) -> CreateResult<views::TeardownAccepted> {
        let tenant = self.datastore.tenant_fetch(tenant_id).await?;
        if tenant.state == TenantState::Provisioning {
            return Err(Error::conflict(format!(
                "tenant {} is currently provisioning; wait for the job to \
                 finish or fail first",
                tenant_id
            )));
        }

        let Some(server_id) = tenant.server_id else {
            // Never routed anywhere: nothing backing it anywhere.
            self.datastore.tenant_soft_delete(tenant_id).await?;
            return Ok(views::TeardownAccepted { job_id: None });
        };

        let job = self
            .datastore
            .job_create(ProvisioningJob::new(
                tenant_id,
                server_id,
                JobKind::Teardown,
            ))
            .await?;
        info!(
            self.log,
            "tenant teardown enqueued";
            "tenant_id" => %tenant_id,
            "job_id" => %job.id,
        );
        Ok(views::TeardownAccepted { job_id: Some(job.id) })
    }

    pub async fn tenant_backup(
        &self,
        tenant_id: Uuid,
        scope: BackupScope,
    ) -> CreateResult<SnapshotId> {
        let tenant = self.datastore.tenant_fetch(tenant_id).await?;
        if !tenant.holds_resources() {
            return Err(Error::conflict(format!(
                "tenant {} has no provisioned environment to back up",
                tenant_id
            )));
        }
        self.backup.backup(tenant_id, scope).await
    }

    pub async fn tenant_restore(
        &self,
        tenant_id: Uuid,
        scope: BackupScope,
        snapshot: &SnapshotId,
    ) -> UpdateResult<()> {
        let tenant = self.datastore.tenant_fetch(tenant_id).await?;
        if !tenant.holds_resources() {
            return Err(Error::conflict(format!(
                "tenant {} has no provisioned environment to restore into",
                tenant_id
            )));
        }
        self.backup.restore(tenant_id, scope, snapshot).await
    }

    pub async fn tenant_usage(
        &self,
        tenant_id: Uuid,
    ) -> ListResultVec<views::UsageSample> {
        self.datastore.tenant_fetch(tenant_id).await?;
        Ok(self
            .datastore
            .usage_list_for_tenant(tenant_id, 31)
            .await?
            .into_iter()
            .map(views::UsageSample::from)
            .collect())
    }

    pub async fn tenant_alerts(
        &self,
        tenant_id: Uuid,
    ) -> ListResultVec<views::QuotaAlert> {
        self.datastore.tenant_fetch(tenant_id).await?;
        Ok(self
            .datastore
            .alert_list_for_tenant(tenant_id, 100)
            .await?
            .into_iter()
            .map(views::QuotaAlert::from)
            .collect())
    }

    async fn route_new_tenant(
        &self,
        hint: Option<&str>,
    ) -> LookupResult<crate::db::model::Server> {
        let servers = self.datastore.server_list().await?;
        let counts = self.datastore.server_tenant_counts().await?;
        routing::pick_server(
            &servers,
            &counts,
            chrono::Utc::now(),
            self.liveness_window,
            hint,
        )
        .cloned()
        .ok_or_else(|| {
            Error::insufficient_capacity(
                "no server is currently accepting new tenants",
                "no live, active server with free capacity was found during \
                 tenant routing",
            )
        })
    }
}
