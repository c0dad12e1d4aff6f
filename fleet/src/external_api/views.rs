// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Views are response bodies, most of which are public lenses onto DB models.

use crate::db::model;
use chrono::{DateTime, NaiveDate, Utc};
use emporos_common::api::external::{
    AlertKind, AlertSeverity, JobKind, JobState, PlanTier, ServerStatus,
    StorePlatform, TenantState,
};
use schemars::JsonSchema;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, JsonSchema)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub domain: String,
    pub platform: StorePlatform,
    pub plan: PlanTier,
    pub state: TenantState,
    pub server_id: Option<Uuid>,
    pub port: Option<u16>,
    pub time_created: DateTime<Utc>,
    pub suspended_reason: Option<String>,
    /// durable record of the most recent provisioning failure; this is the
    /// error channel an operator consults
    pub error_message: Option<String>,
}

impl From<model::Tenant> for Tenant {
    fn from(tenant: model::Tenant) -> Self {
        Tenant {
            id: tenant.id,
            name: tenant.name,
            domain: tenant.domain,
            platform: tenant.platform.into(),
            plan: tenant.plan.into(),
            state: tenant.state.into(),
            server_id: tenant.server_id,
            port: tenant.port.map(u16::from),
            time_created: tenant.time_created,
            suspended_reason: tenant.suspended_reason,
            error_message: tenant.error_message,
        }
    }
}

#[derive(Clone, Debug, Serialize, JsonSchema)]
pub struct Job {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub server_id: Uuid,
    pub kind: JobKind,
    pub state: JobState,
    pub current_step: Option<String>,
    pub error_message: Option<String>,
    pub time_created: DateTime<Utc>,
    pub time_claimed: Option<DateTime<Utc>>,
    pub time_finished: Option<DateTime<Utc>>,
}

impl From<model::ProvisioningJob> for Job {
    fn from(job: model::ProvisioningJob) -> Self {
        Job {
            id: job.id,
            tenant_id: job.tenant_id,
            server_id: job.server_id,
            kind: job.kind.into(),
            state: job.state.into(),
            current_step: job.current_step,
            error_message: job.error_message,
            time_created: job.time_created,
            time_claimed: job.time_claimed,
            time_finished: job.time_finished,
        }
    }
}

#[derive(Clone, Debug, Serialize, JsonSchema)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub status: ServerStatus,
    /// whether the heartbeat is within the freshness window right now
    pub live: bool,
    /// result of the fallback reachability probe, present only when the
    /// heartbeat was stale and a probe was performed
    pub probe_reachable: Option<bool>,
    pub tenants: i64,
    pub max_tenants: i32,
    pub port_range_first: u16,
    pub port_range_last: u16,
    pub last_heartbeat: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, JsonSchema)]
pub struct FleetStatus {
    pub servers: Vec<Server>,
    pub total_servers: usize,
    pub healthy_servers: usize,
    /// true when any server that should be serving traffic is not healthy
    pub degraded: bool,
}

#[derive(Clone, Debug, Serialize, JsonSchema)]
pub struct ProvisionAccepted {
    pub tenant_id: Uuid,
    pub job_id: Uuid,
}

#[derive(Clone, Debug, Serialize, JsonSchema)]
pub struct TeardownAccepted {
    /// absent when the tenant held no resources and was deleted inline
    pub job_id: Option<Uuid>,
}

#[derive(Clone, Debug, Serialize, JsonSchema)]
pub struct Snapshot {
    pub snapshot: String,
}

#[derive(Clone, Debug, Serialize, JsonSchema)]
pub struct UsageSample {
    pub tenant_id: Uuid,
    pub day: NaiveDate,
    pub disk_bytes_used: i64,
    pub bandwidth_bytes_used: i64,
    pub time_sampled: DateTime<Utc>,
}

impl From<model::UsageSample> for UsageSample {
    fn from(sample: model::UsageSample) -> Self {
        UsageSample {
            tenant_id: sample.tenant_id,
            day: sample.day,
            disk_bytes_used: sample.disk_bytes_used,
            bandwidth_bytes_used: sample.bandwidth_bytes_used,
            time_sampled: sample.time_sampled,
        }
    }
}

#[derive(Clone, Debug, Serialize, JsonSchema)]
pub struct QuotaAlert {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub usage_bytes: i64,
    pub limit_bytes: i64,
    pub time_created: DateTime<Utc>,
}

impl From<model::QuotaAlert> for QuotaAlert {
    fn from(alert: model::QuotaAlert) -> Self {
        QuotaAlert {
            id: alert.id,
            tenant_id: alert.tenant_id,
            kind: alert.kind.into(),
            severity: alert.severity.into(),
            usage_bytes: alert.usage_bytes,
            limit_bytes: alert.limit_bytes,
            time_created: alert.time_created,
        }
    }
}
