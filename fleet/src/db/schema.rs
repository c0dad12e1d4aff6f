// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Describes the Diesel database schema.
//!
//! NOTE: Should be kept up-to-date with schema/dbinit.sql.

table! {
    tenant (id) {
        id -> Uuid,
        name -> Text,
        domain -> Text,
        platform -> crate::db::model::StorePlatformEnum,
        plan -> crate::db::model::PlanTierEnum,
        time_created -> Timestamptz,
        time_modified -> Timestamptz,
        time_deleted -> Nullable<Timestamptz>,
        state -> crate::db::model::TenantStateEnum,
        server_id -> Nullable<Uuid>,
        port -> Nullable<Int4>,
        suspended_reason -> Nullable<Text>,
        suspended_auto -> Nullable<Bool>,
        time_suspended -> Nullable<Timestamptz>,
        sealed_credentials -> Nullable<Text>,
        error_message -> Nullable<Text>,
    }
}

table! {
    provisioning_job (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        server_id -> Uuid,
        kind -> crate::db::model::JobKindEnum,
        state -> crate::db::model::JobStateEnum,
        current_step -> Nullable<Text>,
        error_message -> Nullable<Text>,
        time_created -> Timestamptz,
        time_claimed -> Nullable<Timestamptz>,
        time_finished -> Nullable<Timestamptz>,
    }
}

table! {
    server (id) {
        id -> Uuid,
        name -> Text,
        address -> Text,
        status -> crate::db::model::ServerStatusEnum,
        port_range_first -> Int4,
        port_range_last -> Int4,
        max_tenants -> Int4,
        time_created -> Timestamptz,
        time_modified -> Timestamptz,
        last_heartbeat -> Timestamptz,
    }
}

table! {
    port_assignment (server_id, port) {
        server_id -> Uuid,
        port -> Int4,
        tenant_id -> Uuid,
        time_created -> Timestamptz,
    }
}

table! {
    resource_quota (tenant_id) {
        tenant_id -> Uuid,
        plan -> crate::db::model::PlanTierEnum,
        disk_bytes_limit -> Int8,
        bandwidth_bytes_limit -> Int8,
        time_created -> Timestamptz,
        time_modified -> Timestamptz,
    }
}

table! {
    usage_sample (tenant_id, day) {
        tenant_id -> Uuid,
        day -> Date,
        disk_bytes_used -> Int8,
        bandwidth_bytes_used -> Int8,
        time_sampled -> Timestamptz,
    }
}

table! {
    quota_alert (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        kind -> crate::db::model::AlertKindEnum,
        severity -> crate::db::model::AlertSeverityEnum,
        usage_bytes -> Int8,
        limit_bytes -> Int8,
        time_created -> Timestamptz,
    }
}

allow_tables_to_appear_in_same_query!(
    tenant,
    provisioning_job,
    server,
    port_assignment,
    resource_quota,
    usage_sample,
    quota_alert
);
