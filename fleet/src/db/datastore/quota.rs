// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`DataStore`] methods for quotas, usage samples, and alerts.

use super::DataStore;
use crate::db::error::diesel_result_optional;
use crate::db::error::public_error_from_diesel;
use crate::db::error::ErrorHandler;
use crate::db::model::{QuotaAlert, ResourceQuota, UsageSample};
use async_bb8_diesel::AsyncRunQueryDsl;
use chrono::{Duration, Utc};
use diesel::prelude::*;
use emporos_common::api::external::CreateResult;
use emporos_common::api::external::DeleteResult;
use emporos_common::api::external::Error;
use emporos_common::api::external::ListResultVec;
use emporos_common::api::external::LookupResult;
use emporos_common::api::external::LookupType;
use emporos_common::api::external::PlanTier;
use emporos_common::api::external::ResourceType;
use uuid::Uuid;

impl DataStore {
    /// Persists the byte ceilings derived from the tenant's plan.  Upsert:
    /// re-provisioning after a plan change refreshes the grant in place.
    /// This records the ceilings only — enforcement is the quota monitor's
    /// job.
    pub async fn quota_ensure(
        &self,
        tenant_id: Uuid,
        plan: PlanTier,
    ) -> CreateResult<ResourceQuota> {
        use crate::db::schema::resource_quota::dsl;
        let quota = ResourceQuota::new(tenant_id, plan);
        let conn = self.pool_connection().await?;
        diesel::insert_into(dsl::resource_quota)
            .values(quota.clone())
            .on_conflict(dsl::tenant_id)
            .do_update()
            .set((
                dsl::plan.eq(quota.plan),
                dsl::disk_bytes_limit.eq(quota.disk_bytes_limit),
                dsl::bandwidth_bytes_limit.eq(quota.bandwidth_bytes_limit),
                dsl::time_modified.eq(Utc::now()),
            ))
            .returning(ResourceQuota::as_returning())
            .get_result_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))
    }

    pub async fn quota_fetch(
        &self,
        tenant_id: Uuid,
    ) -> LookupResult<ResourceQuota> {
        use crate::db::schema::resource_quota::dsl;
        let conn = self.pool_connection().await?;
        dsl::resource_quota
            .filter(dsl::tenant_id.eq(tenant_id))
            .select(ResourceQuota::as_select())
            .first_async(&*conn)
            .await
            .map_err(|e| {
                public_error_from_diesel(
                    e,
                    ErrorHandler::NotFoundByLookup(
                        ResourceType::ResourceQuota,
                        LookupType::ById(tenant_id),
                    ),
                )
            })
    }

    pub async fn quota_release(&self, tenant_id: Uuid) -> DeleteResult {
        use crate::db::schema::resource_quota::dsl;
        let conn = self.pool_connection().await?;
        diesel::delete(dsl::resource_quota)
            .filter(dsl::tenant_id.eq(tenant_id))
            .execute_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        Ok(())
    }

    /// Records a usage sample, one row per tenant per day: a second sample
    /// the same day overwrites the first (upsert on the natural key), so a
    /// sustained monitor loop never grows the table more than once a day per
    /// tenant.
    pub async fn usage_upsert(
        &self,
        sample: UsageSample,
    ) -> CreateResult<UsageSample> {
        use crate::db::schema::usage_sample::dsl;
        let conn = self.pool_connection().await?;
        diesel::insert_into(dsl::usage_sample)
            .values(sample.clone())
            .on_conflict((dsl::tenant_id, dsl::day))
            .do_update()
            .set((
                dsl::disk_bytes_used.eq(sample.disk_bytes_used),
                dsl::bandwidth_bytes_used.eq(sample.bandwidth_bytes_used),
                dsl::time_sampled.eq(sample.time_sampled),
            ))
            .returning(UsageSample::as_returning())
            .get_result_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))
    }

    pub async fn usage_list_for_tenant(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> ListResultVec<UsageSample> {
        use crate::db::schema::usage_sample::dsl;
        let conn = self.pool_connection().await?;
        dsl::usage_sample
            .filter(dsl::tenant_id.eq(tenant_id))
            .order(dsl::day.desc())
            .limit(limit)
            .select(UsageSample::as_select())
            .load_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))
    }

    /// Records an alert unless an equivalent one was raised within the
    /// cooldown window.  Returns `None` when deduplicated, so a sustained
    /// overage produces one alert per window instead of one per monitor
    /// cycle.
    pub async fn alert_record_deduped(
        &self,
        alert: QuotaAlert,
        cooldown: Duration,
    ) -> Result<Option<QuotaAlert>, Error> {
        use crate::db::schema::quota_alert::dsl;
        let conn = self.pool_connection().await?;
        let cutoff = Utc::now() - cooldown;

        let recent = diesel_result_optional(
            dsl::quota_alert
                .filter(dsl::tenant_id.eq(alert.tenant_id))
                .filter(dsl::kind.eq(alert.kind))
                .filter(dsl::severity.eq(alert.severity))
                .filter(dsl::time_created.gt(cutoff))
                .select(QuotaAlert::as_select())
                .first_async(&*conn)
                .await,
        )
        .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        if recent.is_some() {
            return Ok(None);
        }

        let inserted = diesel::insert_into(dsl::quota_alert)
            .values(alert)
            .returning(QuotaAlert::as_returning())
            .get_result_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        Ok(Some(inserted))
    }

    pub async fn alert_list_for_tenant(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> ListResultVec<QuotaAlert> {
        use crate::db::schema::quota_alert::dsl;
        let conn = self.pool_connection().await?;
        dsl::quota_alert
            .filter(dsl::tenant_id.eq(tenant_id))
            .order(dsl::time_created.desc())
            .limit(limit)
            .select(QuotaAlert::as_select())
            .load_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))
    }
}
