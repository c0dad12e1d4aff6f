// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structures stored to the database.

use crate::db::schema::{
    port_assignment, provisioning_job, quota_alert, resource_quota, server,
    tenant, usage_sample,
};
use chrono::{DateTime, NaiveDate, Utc};
use emporos_common::api::external;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::io::Write;
use uuid::Uuid;

/// This macro implements serialization and deserialization of an enum type
/// from our database into our model types.  See [`TenantState`] for a sample
/// usage.
macro_rules! impl_enum_type {
    (
        $(#[$enum_meta:meta])*
        pub struct $diesel_type:ident;

        $(#[$model_meta:meta])*
        pub enum $model_type:ident;

        $($enum_item:ident => $sql_value:literal)+
    ) => {
        $(#[$enum_meta])*
        pub struct $diesel_type;

        $(#[$model_meta])*
        pub enum $model_type {
            $(
                $enum_item,
            )*
        }

        impl ::diesel::serialize::ToSql<$diesel_type, ::diesel::pg::Pg> for $model_type {
            fn to_sql<'a>(
                &'a self,
                out: &mut ::diesel::serialize::Output<'a, '_, ::diesel::pg::Pg>,
            ) -> ::diesel::serialize::Result {
                match self {
                    $(
                    $model_type::$enum_item => {
                        out.write_all($sql_value)?
                    }
                    )*
                }
                Ok(::diesel::serialize::IsNull::No)
            }
        }

        impl ::diesel::deserialize::FromSql<$diesel_type, ::diesel::pg::Pg> for $model_type {
            fn from_sql(bytes: <::diesel::pg::Pg as ::diesel::backend::Backend>::RawValue<'_>) -> ::diesel::deserialize::Result<Self> {
                match <::diesel::pg::Pg as ::diesel::backend::Backend>::RawValue::<'_>::as_bytes(&bytes) {
                    $(
                    $sql_value => {
                        Ok($model_type::$enum_item)
                    }
                    )*
                    _ => {
                        Err(concat!("Unrecognized enum variant for ",
                                stringify!{$model_type})
                            .into())
                    }
                }
            }
        }
    }
}

impl_enum_type!(
    #[derive(Clone, SqlType, Debug, QueryId)]
    #[diesel(postgres_type(name = "tenant_state", schema = "public"))]
    pub struct TenantStateEnum;

    #[derive(Clone, Copy, Debug, AsExpression, FromSqlRow, PartialEq, Eq)]
    #[diesel(sql_type = TenantStateEnum)]
    pub enum TenantState;

    // Enum values
    Pending => b"pending"
    Provisioning => b"provisioning"
    Active => b"active"
    Suspended => b"suspended"
    Failed => b"failed"
);

impl From<TenantState> for external::TenantState {
    fn from(state: TenantState) -> Self {
        match state {
            TenantState::Pending => external::TenantState::Pending,
            TenantState::Provisioning => external::TenantState::Provisioning,
            TenantState::Active => external::TenantState::Active,
            TenantState::Suspended => external::TenantState::Suspended,
            TenantState::Failed => external::TenantState::Failed,
        }
    }
}

impl_enum_type!(
    #[derive(Clone, SqlType, Debug, QueryId)]
    #[diesel(postgres_type(name = "job_state", schema = "public"))]
    pub struct JobStateEnum;

    #[derive(Clone, Copy, Debug, AsExpression, FromSqlRow, PartialEq, Eq)]
    #[diesel(sql_type = JobStateEnum)]
    pub enum JobState;

    // Enum values
    Queued => b"queued"
    Running => b"running"
    Succeeded => b"succeeded"
    Failed => b"failed"
);

impl From<JobState> for external::JobState {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Queued => external::JobState::Queued,
            JobState::Running => external::JobState::Running,
            JobState::Succeeded => external::JobState::Succeeded,
            JobState::Failed => external::JobState::Failed,
        }
    }
}

impl_enum_type!(
    #[derive(Clone, SqlType, Debug, QueryId)]
    #[diesel(postgres_type(name = "job_kind", schema = "public"))]
    pub struct JobKindEnum;

    #[derive(Clone, Copy, Debug, AsExpression, FromSqlRow, PartialEq, Eq)]
    #[diesel(sql_type = JobKindEnum)]
    pub enum JobKind;

    // Enum values
    Provision => b"provision"
    Teardown => b"teardown"
);

impl From<JobKind> for external::JobKind {
    fn from(kind: JobKind) -> Self {
        match kind {
            JobKind::Provision => external::JobKind::Provision,
            JobKind::Teardown => external::JobKind::Teardown,
        }
    }
}

impl_enum_type!(
    #[derive(Clone, SqlType, Debug, QueryId)]
    #[diesel(postgres_type(name = "server_status", schema = "public"))]
    pub struct ServerStatusEnum;

    #[derive(Clone, Copy, Debug, AsExpression, FromSqlRow, PartialEq, Eq)]
    #[diesel(sql_type = ServerStatusEnum)]
    pub enum ServerStatus;

    // Enum values
    Active => b"active"
    Maintenance => b"maintenance"
    Offline => b"offline"
);

impl From<ServerStatus> for external::ServerStatus {
    fn from(status: ServerStatus) -> Self {
        match status {
            ServerStatus::Active => external::ServerStatus::Active,
            ServerStatus::Maintenance => external::ServerStatus::Maintenance,
            ServerStatus::Offline => external::ServerStatus::Offline,
        }
    }
}

impl From<external::ServerStatus> for ServerStatus {
    fn from(status: external::ServerStatus) -> Self {
        match status {
            external::ServerStatus::Active => ServerStatus::Active,
            external::ServerStatus::Maintenance => ServerStatus::Maintenance,
            external::ServerStatus::Offline => ServerStatus::Offline,
        }
    }
}

impl_enum_type!(
    #[derive(Clone, SqlType, Debug, QueryId)]
    #[diesel(postgres_type(name = "store_platform", schema = "public"))]
    pub struct StorePlatformEnum;

    #[derive(Clone, Copy, Debug, AsExpression, FromSqlRow, PartialEq, Eq)]
    #[diesel(sql_type = StorePlatformEnum)]
    pub enum StorePlatform;

    // Enum values
    Woocommerce => b"woocommerce"
    Prestashop => b"prestashop"
    Medusa => b"medusa"
);

impl From<StorePlatform> for external::StorePlatform {
    fn from(platform: StorePlatform) -> Self {
        match platform {
            StorePlatform::Woocommerce => external::StorePlatform::Woocommerce,
            StorePlatform::Prestashop => external::StorePlatform::Prestashop,
            StorePlatform::Medusa => external::StorePlatform::Medusa,
        }
    }
}

impl From<external::StorePlatform> for StorePlatform {
    fn from(platform: external::StorePlatform) -> Self {
        match platform {
            external::StorePlatform::Woocommerce => StorePlatform::Woocommerce,
            external::StorePlatform::Prestashop => StorePlatform::Prestashop,
            external::StorePlatform::Medusa => StorePlatform::Medusa,
        }
    }
}

impl_enum_type!(
    #[derive(Clone, SqlType, Debug, QueryId)]
    #[diesel(postgres_type(name = "plan_tier", schema = "public"))]
    pub struct PlanTierEnum;

    #[derive(Clone, Copy, Debug, AsExpression, FromSqlRow, PartialEq, Eq)]
    #[diesel(sql_type = PlanTierEnum)]
    pub enum PlanTier;

    // Enum values
    Starter => b"starter"
    Standard => b"standard"
    Premium => b"premium"
);

impl From<PlanTier> for external::PlanTier {
    fn from(plan: PlanTier) -> Self {
        match plan {
            PlanTier::Starter => external::PlanTier::Starter,
            PlanTier::Standard => external::PlanTier::Standard,
            PlanTier::Premium => external::PlanTier::Premium,
        }
    }
}

impl From<external::PlanTier> for PlanTier {
    fn from(plan: external::PlanTier) -> Self {
        match plan {
            external::PlanTier::Starter => PlanTier::Starter,
            external::PlanTier::Standard => PlanTier::Standard,
            external::PlanTier::Premium => PlanTier::Premium,
        }
    }
}

impl_enum_type!(
    #[derive(Clone, SqlType, Debug, QueryId)]
    #[diesel(postgres_type(name = "alert_kind", schema = "public"))]
    pub struct AlertKindEnum;

    #[derive(Clone, Copy, Debug, AsExpression, FromSqlRow, PartialEq, Eq)]
    #[diesel(sql_type = AlertKindEnum)]
    pub enum AlertKind;

    // Enum values
    Disk => b"disk"
    Bandwidth => b"bandwidth"
);

impl From<AlertKind> for external::AlertKind {
    fn from(kind: AlertKind) -> Self {
        match kind {
            AlertKind::Disk => external::AlertKind::Disk,
            AlertKind::Bandwidth => external::AlertKind::Bandwidth,
        }
    }
}

impl From<external::AlertKind> for AlertKind {
    fn from(kind: external::AlertKind) -> Self {
        match kind {
            external::AlertKind::Disk => AlertKind::Disk,
            external::AlertKind::Bandwidth => AlertKind::Bandwidth,
        }
    }
}

impl_enum_type!(
    #[derive(Clone, SqlType, Debug, QueryId)]
    #[diesel(postgres_type(name = "alert_severity", schema = "public"))]
    pub struct AlertSeverityEnum;

    #[derive(Clone, Copy, Debug, AsExpression, FromSqlRow, PartialEq, Eq)]
    #[diesel(sql_type = AlertSeverityEnum)]
    pub enum AlertSeverity;

    // Enum values
    Warning => b"warning"
    Critical => b"critical"
);

impl From<AlertSeverity> for external::AlertSeverity {
    fn from(severity: AlertSeverity) -> Self {
        match severity {
            AlertSeverity::Warning => external::AlertSeverity::Warning,
            AlertSeverity::Critical => external::AlertSeverity::Critical,
        }
    }
}

impl From<external::AlertSeverity> for AlertSeverity {
    fn from(severity: external::AlertSeverity) -> Self {
        match severity {
            external::AlertSeverity::Warning => AlertSeverity::Warning,
            external::AlertSeverity::Critical => AlertSeverity::Critical,
        }
    }
}

/// Representation of a [`u16`] in the database, used for TCP port numbers.
/// We store these as `Int4` and guarantee the value is in range on the way in
/// and out.
#[derive(
    Copy,
    Clone,
    Debug,
    AsExpression,
    FromSqlRow,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[diesel(sql_type = diesel::sql_types::Int4)]
#[repr(transparent)]
pub struct SqlU16(pub u16);

impl SqlU16 {
    pub fn new(port: u16) -> Self {
        SqlU16(port)
    }
}

impl From<u16> for SqlU16 {
    fn from(port: u16) -> Self {
        SqlU16(port)
    }
}

impl From<SqlU16> for u16 {
    fn from(port: SqlU16) -> Self {
        port.0
    }
}

impl ::diesel::serialize::ToSql<diesel::sql_types::Int4, ::diesel::pg::Pg>
    for SqlU16
{
    fn to_sql<'a>(
        &'a self,
        out: &mut ::diesel::serialize::Output<'a, '_, ::diesel::pg::Pg>,
    ) -> ::diesel::serialize::Result {
        out.write_all(&i32::from(self.0).to_be_bytes())?;
        Ok(::diesel::serialize::IsNull::No)
    }
}

impl ::diesel::deserialize::FromSql<diesel::sql_types::Int4, ::diesel::pg::Pg>
    for SqlU16
{
    fn from_sql(
        bytes: <::diesel::pg::Pg as ::diesel::backend::Backend>::RawValue<'_>,
    ) -> ::diesel::deserialize::Result<Self> {
        let value = <i32 as ::diesel::deserialize::FromSql<
            diesel::sql_types::Int4,
            ::diesel::pg::Pg,
        >>::from_sql(bytes)?;
        u16::try_from(value).map(SqlU16).map_err(|e| e.to_string().into())
    }
}

/// One customer's store environment.
#[derive(Queryable, Insertable, Selectable, Clone, Debug)]
#[diesel(table_name = tenant)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub domain: String,
    pub platform: StorePlatform,
    pub plan: PlanTier,
    pub time_created: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
    pub time_deleted: Option<DateTime<Utc>>,
    pub state: TenantState,
    pub server_id: Option<Uuid>,
    pub port: Option<SqlU16>,
    pub suspended_reason: Option<String>,
    pub suspended_auto: Option<bool>,
    pub time_suspended: Option<DateTime<Utc>>,
    pub sealed_credentials: Option<String>,
    pub error_message: Option<String>,
}

impl Tenant {
    pub fn new(
        id: Uuid,
        name: &external::Name,
        domain: &external::DomainName,
        platform: external::StorePlatform,
        plan: external::PlanTier,
    ) -> Self {
        let now = Utc::now();
        Tenant {
            id,
            name: name.as_str().to_string(),
            domain: domain.as_str().to_string(),
            platform: platform.into(),
            plan: plan.into(),
            time_created: now,
            time_modified: now,
            time_deleted: None,
            state: TenantState::Pending,
            server_id: None,
            port: None,
            suspended_reason: None,
            suspended_auto: None,
            time_suspended: None,
            sealed_credentials: None,
            error_message: None,
        }
    }

    /// Whether the tenant is in a state that holds backing resources (a
    /// container environment, a port assignment, a proxy route).
    pub fn holds_resources(&self) -> bool {
        matches!(
            self.state,
            TenantState::Provisioning
                | TenantState::Active
                | TenantState::Suspended
        )
    }
}

/// One attempt to run the pipeline (or a teardown) for a tenant.
#[derive(Queryable, Insertable, Selectable, Clone, Debug)]
#[diesel(table_name = provisioning_job)]
pub struct ProvisioningJob {
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

impl ProvisioningJob {
    pub fn new(tenant_id: Uuid, server_id: Uuid, kind: JobKind) -> Self {
        ProvisioningJob {
            id: Uuid::new_v4(),
            tenant_id,
            server_id,
            kind,
            state: JobState::Queued,
            current_step: None,
            error_message: None,
            time_created: Utc::now(),
            time_claimed: None,
            time_finished: None,
        }
    }
}

/// A worker host capable of running the pipeline.
#[derive(Queryable, Insertable, Selectable, Clone, Debug)]
#[diesel(table_name = server)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub status: ServerStatus,
    pub port_range_first: SqlU16,
    pub port_range_last: SqlU16,
    pub max_tenants: i32,
    pub time_created: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl Server {
    /// A server is live only if its heartbeat is younger than the freshness
    /// window, independent of the operator-declared status.
    pub fn is_live(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_heartbeat) < window
    }

    pub fn port_range(
        &self,
    ) -> std::ops::RangeInclusive<u16> {
        self.port_range_first.0..=self.port_range_last.0
    }
}

/// Values used to register (or re-register) a server.  Registration is an
/// upsert: a worker restarting with changed capacity updates its existing
/// record in place, keyed by name.
#[derive(Clone, Debug)]
pub struct ServerUpdate {
    pub name: String,
    pub address: String,
    pub port_range_first: SqlU16,
    pub port_range_last: SqlU16,
    pub max_tenants: i32,
}

impl ServerUpdate {
    pub fn new(
        name: String,
        address: String,
        port_range_first: u16,
        port_range_last: u16,
        max_tenants: i32,
    ) -> Self {
        ServerUpdate {
            name,
            address,
            port_range_first: SqlU16(port_range_first),
            port_range_last: SqlU16(port_range_last),
            max_tenants,
        }
    }

    pub fn into_insertable(self) -> Server {
        let now = Utc::now();
        Server {
            id: Uuid::new_v4(),
            name: self.name,
            address: self.address,
            status: ServerStatus::Active,
            port_range_first: self.port_range_first,
            port_range_last: self.port_range_last,
            max_tenants: self.max_tenants,
            time_created: now,
            time_modified: now,
            last_heartbeat: now,
        }
    }
}

/// Binds one port within a server's range to one tenant.  The primary key on
/// `(server_id, port)` is the arbitration point for concurrent allocation.
#[derive(Queryable, Insertable, Selectable, Clone, Debug)]
#[diesel(table_name = port_assignment)]
pub struct PortAssignment {
    pub server_id: Uuid,
    pub port: SqlU16,
    pub tenant_id: Uuid,
    pub time_created: DateTime<Utc>,
}

impl PortAssignment {
    pub fn new(server_id: Uuid, port: u16, tenant_id: Uuid) -> Self {
        PortAssignment {
            server_id,
            port: SqlU16(port),
            tenant_id,
            time_created: Utc::now(),
        }
    }
}

/// Per-tenant resource ceilings derived from the tenant's plan.
#[derive(Queryable, Insertable, Selectable, Clone, Debug)]
#[diesel(table_name = resource_quota)]
pub struct ResourceQuota {
    pub tenant_id: Uuid,
    pub plan: PlanTier,
    pub disk_bytes_limit: i64,
    pub bandwidth_bytes_limit: i64,
    pub time_created: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
}

impl ResourceQuota {
    pub fn new(tenant_id: Uuid, plan: external::PlanTier) -> Self {
        let limits = plan.limits();
        let now = Utc::now();
        ResourceQuota {
            tenant_id,
            plan: plan.into(),
            disk_bytes_limit: limits.disk_bytes as i64,
            bandwidth_bytes_limit: limits.bandwidth_bytes as i64,
            time_created: now,
            time_modified: now,
        }
    }
}

/// One measured usage data point, one row per tenant per day.
#[derive(Queryable, Insertable, Selectable, Clone, Debug)]
#[diesel(table_name = usage_sample)]
pub struct UsageSample {
    pub tenant_id: Uuid,
    pub day: NaiveDate,
    pub disk_bytes_used: i64,
    pub bandwidth_bytes_used: i64,
    pub time_sampled: DateTime<Utc>,
}

impl UsageSample {
    pub fn new(
        tenant_id: Uuid,
        day: NaiveDate,
        disk_bytes_used: u64,
        bandwidth_bytes_used: u64,
    ) -> Self {
        UsageSample {
            tenant_id,
            day,
            disk_bytes_used: disk_bytes_used as i64,
            bandwidth_bytes_used: bandwidth_bytes_used as i64,
            time_sampled: Utc::now(),
        }
    }
}

/// A threshold crossing recorded by the quota monitor.
#[derive(Queryable, Insertable, Selectable, Clone, Debug)]
#[diesel(table_name = quota_alert)]
pub struct QuotaAlert {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub usage_bytes: i64,
    pub limit_bytes: i64,
    pub time_created: DateTime<Utc>,
}

impl QuotaAlert {
    pub fn new(
        tenant_id: Uuid,
        kind: external::AlertKind,
        severity: external::AlertSeverity,
        usage_bytes: u64,
        limit_bytes: u64,
    ) -> Self {
        QuotaAlert {
            id: Uuid::new_v4(),
            tenant_id,
            kind: kind.into(),
            severity: severity.into(),
            usage_bytes: usage_bytes as i64,
            limit_bytes: limit_bytes as i64,
            time_created: Utc::now(),
        }
    }
}
