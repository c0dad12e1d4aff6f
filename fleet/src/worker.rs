// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-server pipeline worker
//!
//! Exactly one worker consumes a server's queue, and it executes jobs
//! strictly one at a time — horizontal scale comes from more servers, never
//! from more workers on one queue.  All state lives in explicit context
//! passed into each job, so tests can run several workers for several
//! servers inside one process.

use crate::db::model::{
    JobKind, JobState, ProvisioningJob, Server, SqlU16, Tenant,
};
use crate::db::DataStore;
use crate::interfaces::certificates::CertificateIssuer;
use crate::interfaces::notify::Notifier;
use crate::interfaces::proxy::ReverseProxy;
use crate::interfaces::runtime::{ContainerRuntime, EnvironmentSpec};
use crate::pipeline;
use crate::pipeline::steps::provision_steps;
use crate::pipeline::{ProvisionContext, StepObserver};
use async_trait::async_trait;
use camino::Utf8PathBuf;
use emporos_common::api::external::Error;
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Worker-local settings the pipeline needs, derived from the worker's
/// config file.
#[derive(Clone)]
pub struct WorkerSettings {
    pub workspace_root: Utf8PathBuf,
    pub master_key: [u8; 32],
    pub health_timeout: Duration,
    pub health_poll_interval: Duration,
    pub dequeue_poll_interval: Duration,
}

pub struct Worker {
    log: Logger,
    datastore: Arc<DataStore>,
    server: Server,
    settings: WorkerSettings,
    runtime: Arc<dyn ContainerRuntime>,
    proxy: Arc<dyn ReverseProxy>,
    certificates: Arc<dyn CertificateIssuer>,
    notifier: Arc<dyn Notifier>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log: Logger,
        datastore: Arc<DataStore>,
        server: Server,
        settings: WorkerSettings,
        runtime: Arc<dyn ContainerRuntime>,
        proxy: Arc<dyn ReverseProxy>,
        certificates: Arc<dyn CertificateIssuer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Worker {
            log,
            datastore,
            server,
            settings,
            runtime,
            proxy,
            certificates,
            notifier,
        }
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Consumes the queue forever, sleeping between empty polls.
    pub async fn run(&self) {
        info!(
            self.log,
            "worker started";
            "server" => &self.server.name,
            "server_id" => %self.server.id,
        );
        loop {
            match self.run_once().await {
                Ok(true) => {
                    // Drain eagerly: look for the next job right away.
                }
                Ok(false) => {
                    tokio::time::sleep(self.settings.dequeue_poll_interval)
                        .await;
                }
                Err(error) => {
                    error!(
                        self.log,
                        "failed to poll job queue";
                        "error" => %error,
                    );
                    tokio::time::sleep(self.settings.dequeue_poll_interval)
                        .await;
                }
            }
        }
    }

    /// Claims and executes at most one job.  Returns whether a job was
    /// found.  Job execution itself cannot fail this function: every
    /// outcome is recorded on the job and tenant records.
    pub async fn run_once(&self) -> Result<bool, Error> {
        let Some(job) = self.datastore.job_claim_next(self.server.id).await?
        else {
            return Ok(false);
        };
        self.execute_job(job).await;
        Ok(true)
    }

    async fn execute_job(&self, job: ProvisioningJob) {
        let log = self.log.new(o!(
            "job_id" => job.id.to_string(),
            "tenant_id" => job.tenant_id.to_string(),
        ));
        info!(log, "claimed job"; "kind" => ?job.kind);

        let tenant = match self.datastore.tenant_fetch(job.tenant_id).await {
            Ok(tenant) => tenant,
            Err(error) => {
                // Tenant vanished between enqueue and claim (e.g. deleted);
                // record the job as failed and move on.
                warn!(
                    log,
                    "job references missing tenant";
                    "error" => %error,
                );
                self.finish_job(&log, job.id, JobState::Failed, Some(error))
                    .await;
                return;
            }
        };

        match job.kind {
            JobKind::Provision => self.provision(&log, &job, tenant).await,
            JobKind::Teardown => self.teardown(&log, &job, tenant).await,
        }
    }

    async fn provision(
        &self,
        log: &Logger,
        job: &ProvisioningJob,
        tenant: Tenant,
    ) {
        if let Err(error) =
            self.datastore.tenant_set_provisioning(tenant.id).await
        {
            warn!(
                log,
                "tenant is not eligible for provisioning; abandoning job";
                "error" => %error,
            );
            self.finish_job(log, job.id, JobState::Failed, Some(error)).await;
            return;
        }

        let ctx = ProvisionContext::new(
            log.clone(),
            Arc::clone(&self.datastore),
            tenant.clone(),
            self.server.clone(),
            self.settings.workspace_root.clone(),
            self.settings.master_key,
            self.settings.health_timeout,
            self.settings.health_poll_interval,
            Arc::clone(&self.runtime),
            Arc::clone(&self.proxy),
            Arc::clone(&self.certificates),
            Arc::clone(&self.notifier),
        );
        let observer = JobStepObserver {
            datastore: Arc::clone(&self.datastore),
            job_id: job.id,
            log: log.clone(),
        };
        let steps = provision_steps();

        match pipeline::execute_steps(log, &ctx, &steps, &observer).await {
            Ok(()) => {
                info!(log, "tenant provisioned");
                self.finish_job(log, job.id, JobState::Succeeded, None).await;
            }
            Err(error) => {
                // Rollback already ran inside the executor; what remains is
                // the durable record.
                if let Err(record_error) = self
                    .datastore
                    .tenant_set_failed(tenant.id, &error.to_string())
                    .await
                {
                    error!(
                        log,
                        "failed to record tenant failure";
                        "error" => %record_error,
                    );
                }
                self.finish_job(log, job.id, JobState::Failed, Some(error))
                    .await;
            }
        }
    }

    async fn teardown(
        &self,
        log: &Logger,
        job: &ProvisioningJob,
        tenant: Tenant,
    ) {
        match self.teardown_resources(log, &tenant).await {
            Ok(()) => {
                info!(log, "tenant torn down and deleted");
                self.finish_job(log, job.id, JobState::Succeeded, None).await;
            }
            Err(error) => {
                // The tenant keeps its state; teardown can simply be
                // requested again once the underlying issue clears.
                warn!(log, "tenant teardown failed"; "error" => %error);
                self.finish_job(log, job.id, JobState::Failed, Some(error))
                    .await;
            }
        }
    }

    /// Releases every backing resource, then soft-deletes the record.  Each
    /// release is idempotent, so a failed teardown can be re-run from the
    /// top.
    async fn teardown_resources(
        &self,
        log: &Logger,
        tenant: &Tenant,
    ) -> Result<(), Error> {
        let workspace =
            self.settings.workspace_root.join(tenant.id.to_string());
        let env = EnvironmentSpec::new(tenant.id, workspace.clone());

        self.runtime.destroy(&env).await?;
        self.proxy.remove_route(tenant.id).await?;
        self.datastore.port_release_for_tenant(tenant.id).await?;
        self.datastore.tenant_set_port(tenant.id, None::<SqlU16>).await?;
        self.datastore.quota_release(tenant.id).await?;

        match tokio::fs::remove_dir_all(&workspace).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                // Not fatal: the record-level teardown is complete and the
                // directory holds no live resources.
                warn!(
                    log,
                    "failed to remove tenant workspace";
                    "workspace" => %workspace,
                    "error" => %e,
                );
            }
        }

        self.datastore.tenant_soft_delete(tenant.id).await
    }

    async fn finish_job(
        &self,
        log: &Logger,
        job_id: Uuid,
        state: JobState,
        error: Option<Error>,
    ) {
        let message = error.map(|e| e.to_string());
        match self.datastore.job_finish(job_id, state, message).await {
            Ok(true) => {}
            Ok(false) => {
                // The reaper beat us to it; our terminal state loses.
                warn!(log, "job was no longer running at completion");
            }
            Err(record_error) => {
                error!(
                    log,
                    "failed to record job completion";
                    "error" => %record_error,
                );
            }
        }
    }
}

/// Keeps the job row's step cursor current as the pipeline advances.
struct JobStepObserver {
    datastore: Arc<DataStore>,
    job_id: Uuid,
    log: Logger,
}

#[async_trait]
impl StepObserver for JobStepObserver {
    async fn step_started(&self, _index: usize, name: &str) {
        if let Err(error) =
            self.datastore.job_set_current_step(self.job_id, name).await
        {
            // Progress bookkeeping must never fail a pipeline run.
            warn!(
                self.log,
                "failed to update job step cursor";
                "step" => name.to_string(),
                "error" => %error,
            );
        }
    }
}
