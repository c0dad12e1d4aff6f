// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`DataStore`] methods on [`ProvisioningJob`]s.
//!
//! The job table is the dispatch queue: one logical queue per server, with
//! the partial unique index on `tenant_id` (for queued/running rows) serving
//! as the storage-layer guarantee that at most one job per tenant is ever in
//! flight.  A second request while one is in flight is rejected, not queued.

use super::DataStore;
use crate::db::error::diesel_result_optional;
use crate::db::error::is_unique_violation;
use crate::db::error::public_error_from_diesel;
use crate::db::error::ErrorHandler;
use crate::db::model::{JobState, ProvisioningJob, TenantState};
use async_bb8_diesel::AsyncRunQueryDsl;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use emporos_common::api::external::CreateResult;
use emporos_common::api::external::Error;
use emporos_common::api::external::ListResultVec;
use uuid::Uuid;

impl DataStore {
    /// Enqueues a job.  Returns the typed `AlreadyInFlight` rejection (as
    /// `Error::Conflict`) when the tenant already has a queued or running
    /// job.  This check rides on the database's partial unique index, so it
    /// holds under concurrent callers in different processes.
    pub async fn job_create(
        &self,
        job: ProvisioningJob,
    ) -> CreateResult<ProvisioningJob> {
        use crate::db::schema::provisioning_job::dsl;
        let tenant_id = job.tenant_id;
        let conn = self.pool_connection().await?;
        diesel::insert_into(dsl::provisioning_job)
            .values(job)
            .returning(ProvisioningJob::as_returning())
            .get_result_async(&*conn)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::conflict(format!(
                        "tenant {} already has a job in flight",
                        tenant_id
                    ))
                } else {
                    public_error_from_diesel(e, ErrorHandler::Server)
                }
            })
    }

    /// Claims the oldest queued job for the given server, marking it
    /// `running`.  The claim is a conditional update so that it cannot
    /// double-fire even if another process were draining the same queue.
    pub async fn job_claim_next(
        &self,
        server_id: Uuid,
    ) -> Result<Option<ProvisioningJob>, Error> {
        use crate::db::schema::provisioning_job::dsl;
        let conn = self.pool_connection().await?;

        // A lost claim race just means some other worker took the candidate;
        // look again for the next one.  Three attempts is plenty given the
        // one-worker-per-queue deployment model.
        for _ in 0..3 {
            let candidate = diesel_result_optional(
                dsl::provisioning_job
                    .filter(dsl::server_id.eq(server_id))
                    .filter(dsl::state.eq(JobState::Queued))
                    .order(dsl::time_created.asc())
                    .select(ProvisioningJob::as_select())
                    .first_async(&*conn)
                    .await,
            )
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;

            let Some(candidate) = candidate else {
                return Ok(None);
            };

            let claimed = diesel_result_optional(
                diesel::update(dsl::provisioning_job)
                    .filter(dsl::id.eq(candidate.id))
                    .filter(dsl::state.eq(JobState::Queued))
                    .set((
                        dsl::state.eq(JobState::Running),
                        dsl::time_claimed.eq(Utc::now()),
                    ))
                    .returning(ProvisioningJob::as_returning())
                    .get_result_async(&*conn)
                    .await,
            )
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;

            if let Some(job) = claimed {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    /// Records the step the worker is about to execute, for observability.
    pub async fn job_set_current_step(
        &self,
        job_id: Uuid,
        step: &str,
    ) -> Result<(), Error> {
        use crate::db::schema::provisioning_job::dsl;
        let conn = self.pool_connection().await?;
        diesel::update(dsl::provisioning_job)
            .filter(dsl::id.eq(job_id))
            .filter(dsl::state.eq(JobState::Running))
            .set(dsl::current_step.eq(step.to_string()))
            .execute_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        Ok(())
    }

    /// Moves a running job to a terminal state.  Returns `false` when the job
    /// was no longer `running` (e.g. the reaper got to it first); terminal
    /// rows are history and are never overwritten.
    pub async fn job_finish(
        &self,
        job_id: Uuid,
        state: JobState,
        error_message: Option<String>,
    ) -> Result<bool, Error> {
        use crate::db::schema::provisioning_job::dsl;
        debug_assert!(matches!(
            state,
            JobState::Succeeded | JobState::Failed
        ));
        let conn = self.pool_connection().await?;
        let updated = diesel::update(dsl::provisioning_job)
            .filter(dsl::id.eq(job_id))
            .filter(dsl::state.eq(JobState::Running))
            .set((
                dsl::state.eq(state),
                dsl::error_message.eq(error_message),
                dsl::time_finished.eq(Utc::now()),
            ))
            .execute_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        Ok(updated == 1)
    }

    pub async fn job_list_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> ListResultVec<ProvisioningJob> {
        use crate::db::schema::provisioning_job::dsl;
        let conn = self.pool_connection().await?;
        dsl::provisioning_job
            .filter(dsl::tenant_id.eq(tenant_id))
            .order(dsl::time_created.desc())
            .limit(100)
            .select(ProvisioningJob::as_select())
            .load_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))
    }

    /// Resets stuck jobs left `running` by a crashed worker.
    ///
    /// A job is only considered stuck when it was claimed before
    /// `claimed_before` *and* its server's heartbeat is older than
    /// `heartbeat_before`: a live worker is never second-guessed, no matter
    /// how long its current job has been running.
    pub async fn jobs_reap_stuck(
        &self,
        claimed_before: DateTime<Utc>,
        heartbeat_before: DateTime<Utc>,
    ) -> Result<usize, Error> {
        use crate::db::schema::provisioning_job::dsl;
        use crate::db::schema::server::dsl as server_dsl;
        let conn = self.pool_connection().await?;

        let stale_servers: Vec<Uuid> = server_dsl::server
            .filter(server_dsl::last_heartbeat.lt(heartbeat_before))
            .select(server_dsl::id)
            .load_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        if stale_servers.is_empty() {
            return Ok(0);
        }

        let reaped: Vec<Uuid> = diesel::update(dsl::provisioning_job)
            .filter(dsl::state.eq(JobState::Running))
            .filter(dsl::time_claimed.le(claimed_before))
            .filter(dsl::server_id.eq_any(stale_servers))
            .set((
                dsl::state.eq(JobState::Failed),
                dsl::error_message.eq(
                    "job abandoned: worker heartbeat went stale while the \
                     job was running"
                        .to_string(),
                ),
                dsl::time_finished.eq(Utc::now()),
            ))
            .returning(dsl::tenant_id)
            .get_results_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;

        // A tenant stranded mid-provisioning by an abandoned job becomes
        // `failed` so that a retry can be enqueued.  Tenants of abandoned
        // teardown jobs keep their state; the teardown can simply be
        // requested again.
        if !reaped.is_empty() {
            use crate::db::schema::tenant::dsl as tenant_dsl;
            diesel::update(tenant_dsl::tenant)
                .filter(tenant_dsl::id.eq_any(reaped.clone()))
                .filter(tenant_dsl::state.eq(TenantState::Provisioning))
                .set((
                    tenant_dsl::state.eq(TenantState::Failed),
                    tenant_dsl::error_message.eq(
                        "provisioning abandoned: worker heartbeat went stale"
                            .to_string(),
                    ),
                    tenant_dsl::time_modified.eq(Utc::now()),
                ))
                .execute_async(&*conn)
                .await
                .map_err(|e| {
                    public_error_from_diesel(e, ErrorHandler::Server)
                })?;
        }
        Ok(reaped.len())
    }
}
