// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Datastore coordination properties
//!
//! These exercise the storage-layer arbitration the system depends on under
//! concurrent workers: port uniqueness, the one-in-flight-job rule, queue
//! claiming, the stuck-job reaper, and alert deduplication.  They require
//! `EMPOROS_TEST_DATABASE_URL` and skip without it.

mod common;

use chrono::{Duration, Utc};
use common::*;
use emporos_common::api::external::Error;
use emporos_fleet::db::model::{
    JobKind, JobState, ProvisioningJob, QuotaAlert, TenantState, UsageSample,
};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn test_port_allocation_is_unique_under_concurrency() {
    let log = test_logger("port_allocation_concurrent");
    let Some(datastore) = test_datastore(&log).await else { return };

    // Range of exactly 8 ports, 8 concurrent allocations.
    let server = create_server(&datastore, 9100, 9107, 100).await;

    let allocations = join_all((0..8).map(|_| {
        let datastore = Arc::clone(&datastore);
        let server = server.clone();
        async move {
            datastore.port_allocate(&server, Uuid::new_v4()).await
        }
    }))
    .await;

    let mut ports = BTreeSet::new();
    for result in allocations {
        let assignment = result.expect("each allocation should succeed");
        assert!(
            ports.insert(u16::from(assignment.port)),
            "two tenants got the same port"
        );
    }
    assert_eq!(ports, (9100..=9107).collect::<BTreeSet<u16>>());

    // The range is now exhausted: the next caller gets the typed
    // resource-exhaustion error, not a tenant-attributable failure.
    let error = datastore
        .port_allocate(&server, Uuid::new_v4())
        .await
        .expect_err("range should be exhausted");
    assert!(matches!(error, Error::InsufficientCapacity { .. }));
}

#[tokio::test]
async fn test_port_allocation_is_idempotent_per_tenant() {
    let log = test_logger("port_allocation_idempotent");
    let Some(datastore) = test_datastore(&log).await else { return };

    let server = create_server(&datastore, 9200, 9210, 100).await;
    let tenant_id = Uuid::new_v4();

    let first = datastore.port_allocate(&server, tenant_id).await.unwrap();
    let second = datastore.port_allocate(&server, tenant_id).await.unwrap();
    assert_eq!(first.port, second.port);

    // Only one row exists for the tenant.
    let assignments = datastore.port_list_for_server(server.id).await.unwrap();
    assert_eq!(
        assignments.iter().filter(|a| a.tenant_id == tenant_id).count(),
        1
    );
}

#[tokio::test]
async fn test_port_release_is_idempotent() {
    let log = test_logger("port_release_idempotent");
    let Some(datastore) = test_datastore(&log).await else { return };

    let server = create_server(&datastore, 9300, 9310, 100).await;
    let tenant_id = Uuid::new_v4();
    let assignment = datastore.port_allocate(&server, tenant_id).await.unwrap();

    datastore
        .port_release(server.id, assignment.port.into())
        .await
        .unwrap();
    // Releasing an already-free port is a no-op, not an error.
    datastore
        .port_release(server.id, assignment.port.into())
        .await
        .unwrap();
    assert!(datastore
        .port_fetch_for_tenant(tenant_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_concurrent_enqueue_yields_one_job() {
    let log = test_logger("concurrent_enqueue");
    let Some(datastore) = test_datastore(&log).await else { return };

    let server = create_server(&datastore, 9400, 9410, 100).await;
    let tenant = create_tenant(&datastore, &server).await;

    let results = join_all((0..4).map(|_| {
        let datastore = Arc::clone(&datastore);
        let job = ProvisioningJob::new(
            tenant.id,
            server.id,
            JobKind::Provision,
        );
        async move { datastore.job_create(job).await }
    }))
    .await;

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 1, "exactly one enqueue should win");
    for result in results {
        if let Err(error) = result {
            assert!(
                matches!(error, Error::Conflict { .. }),
                "losers get AlreadyInFlight, got {:?}",
                error
            );
        }
    }

    // Once the in-flight job reaches a terminal state, enqueueing works
    // again.
    let job = datastore.job_claim_next(server.id).await.unwrap().unwrap();
    assert_eq!(job.tenant_id, tenant.id);
    assert!(datastore
        .job_finish(job.id, JobState::Failed, Some("induced".to_string()))
        .await
        .unwrap());
    datastore
        .job_create(ProvisioningJob::new(
            tenant.id,
            server.id,
            JobKind::Provision,
        ))
        .await
        .expect("enqueue after terminal state should succeed");
}

#[tokio::test]
async fn test_job_claim_is_fifo_per_server() {
    let log = test_logger("job_claim_fifo");
    let Some(datastore) = test_datastore(&log).await else { return };

    let server = create_server(&datastore, 9500, 9510, 100).await;
    let tenant_a = create_tenant(&datastore, &server).await;
    let tenant_b = create_tenant(&datastore, &server).await;

    let job_a = enqueue_provision(&datastore, &tenant_a, &server).await;
    let job_b = enqueue_provision(&datastore, &tenant_b, &server).await;

    let first = datastore.job_claim_next(server.id).await.unwrap().unwrap();
    assert_eq!(first.id, job_a.id);
    assert_eq!(first.state, JobState::Running);
    let second = datastore.job_claim_next(server.id).await.unwrap().unwrap();
    assert_eq!(second.id, job_b.id);
    assert!(datastore.job_claim_next(server.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_terminal_job_states_are_immutable() {
    let log = test_logger("terminal_jobs_immutable");
    let Some(datastore) = test_datastore(&log).await else { return };

    let server = create_server(&datastore, 9600, 9610, 100).await;
    let tenant = create_tenant(&datastore, &server).await;
    enqueue_provision(&datastore, &tenant, &server).await;

    let job = datastore.job_claim_next(server.id).await.unwrap().unwrap();
    assert!(datastore
        .job_finish(job.id, JobState::Succeeded, None)
        .await
        .unwrap());
    // A second finish attempt does not overwrite history.
    assert!(!datastore
        .job_finish(job.id, JobState::Failed, Some("late".to_string()))
        .await
        .unwrap());
    let jobs = datastore.job_list_for_tenant(tenant.id).await.unwrap();
    assert_eq!(jobs[0].state, JobState::Succeeded);
}

#[tokio::test]
async fn test_reaper_resets_jobs_on_dead_servers_only() {
    let log = test_logger("job_reaper");
    let Some(db) = test_db(&log).await else { return };
    let datastore = db.datastore.clone();

    let server = create_server(&datastore, 9700, 9710, 100).await;
    let tenant = create_tenant(&datastore, &server).await;
    enqueue_provision(&datastore, &tenant, &server).await;
    let job = datastore.job_claim_next(server.id).await.unwrap().unwrap();
    datastore.tenant_set_provisioning(tenant.id).await.unwrap();

    let claimed_cutoff = Utc::now() + Duration::seconds(1);
    let heartbeat_cutoff = Utc::now() - Duration::minutes(30);

    // The server just heartbeated: the job is old enough to reap, but a
    // live worker is never second-guessed.
    assert_eq!(
        datastore
            .jobs_reap_stuck(claimed_cutoff, heartbeat_cutoff)
            .await
            .unwrap(),
        0
    );

    // Age the server's heartbeat past the freshness window, as if the
    // worker crashed mid-job.
    db.exec(&format!(
        "UPDATE server SET last_heartbeat = now() - interval '1 hour' \
         WHERE id = '{}'",
        server.id
    ))
    .await;
    // At least our job; a previous interrupted test run may have left other
    // reapable jobs behind in a shared test database.
    let reaped = datastore
        .jobs_reap_stuck(claimed_cutoff, heartbeat_cutoff)
        .await
        .unwrap();
    assert!(reaped >= 1);

    let jobs = datastore.job_list_for_tenant(tenant.id).await.unwrap();
    assert_eq!(jobs[0].id, job.id);
    assert_eq!(jobs[0].state, JobState::Failed);
    // The stranded tenant is failed so that a retry can be enqueued.
    let tenant_after = datastore.tenant_fetch(tenant.id).await.unwrap();
    assert_eq!(tenant_after.state, TenantState::Failed);
    datastore
        .job_create(ProvisioningJob::new(
            tenant.id,
            server.id,
            JobKind::Provision,
        ))
        .await
        .expect("retry after reap should be accepted");
}

#[tokio::test]
async fn test_usage_sample_upserts_on_day_key() {
    let log = test_logger("usage_upsert");
    let Some(datastore) = test_datastore(&log).await else { return };

    let tenant_id = Uuid::new_v4();
    let day = Utc::now().date_naive();
    datastore
        .usage_upsert(UsageSample::new(tenant_id, day, 100, 1000))
        .await
        .unwrap();
    datastore
        .usage_upsert(UsageSample::new(tenant_id, day, 250, 2500))
        .await
        .unwrap();

    let samples =
        datastore.usage_list_for_tenant(tenant_id, 10).await.unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].disk_bytes_used, 250);
    assert_eq!(samples[0].bandwidth_bytes_used, 2500);
}

#[tokio::test]
async fn test_alert_dedup_within_cooldown() {
    let log = test_logger("alert_dedup");
    let Some(datastore) = test_datastore(&log).await else { return };

    let tenant_id = Uuid::new_v4();
    let cooldown = Duration::hours(24);
    let alert = |used| {
        QuotaAlert::new(
            tenant_id,
            emporos_common::api::external::AlertKind::Disk,
            emporos_common::api::external::AlertSeverity::Critical,
            used,
            1000,
        )
    };

    // Two critical samples within the window produce exactly one record.
    let first = datastore
        .alert_record_deduped(alert(950), cooldown)
        .await
        .unwrap();
    assert!(first.is_some());
    let second = datastore
        .alert_record_deduped(alert(960), cooldown)
        .await
        .unwrap();
    assert!(second.is_none());

    // A different severity for the same tenant is its own alert stream.
    let warning = datastore
        .alert_record_deduped(
            QuotaAlert::new(
                tenant_id,
                emporos_common::api::external::AlertKind::Disk,
                emporos_common::api::external::AlertSeverity::Warning,
                850,
                1000,
            ),
            cooldown,
        )
        .await
        .unwrap();
    assert!(warning.is_some());

    let alerts = datastore.alert_list_for_tenant(tenant_id, 10).await.unwrap();
    assert_eq!(alerts.len(), 2);
}

#[tokio::test]
async fn test_server_registration_upserts_by_name() {
    let log = test_logger("server_upsert");
    let Some(datastore) = test_datastore(&log).await else { return };

    let server = create_server(&datastore, 9800, 9810, 10).await;
    let again = datastore
        .server_upsert(emporos_fleet::db::model::ServerUpdate::new(
            server.name.clone(),
            "127.0.0.1:2".to_string(),
            9800,
            9820,
            25,
        ))
        .await
        .unwrap();
    // Same record, updated declaration.
    assert_eq!(again.id, server.id);
    assert_eq!(again.max_tenants, 25);
    assert_eq!(u16::from(again.port_range_last), 9820);
    assert_eq!(again.address, "127.0.0.1:2");
}

#[tokio::test]
async fn test_tenant_lifecycle_transitions_are_guarded() {
    let log = test_logger("tenant_transitions");
    let Some(datastore) = test_datastore(&log).await else { return };

    let server = create_server(&datastore, 9900, 9910, 10).await;
    let tenant = create_tenant(&datastore, &server).await;

    // A pending tenant cannot be suspended or resumed.
    assert!(datastore
        .tenant_suspend(tenant.id, "unpaid invoice", false)
        .await
        .is_err());
    assert!(datastore.tenant_resume(tenant.id).await.is_err());

    // pending -> provisioning -> active -> suspended -> active
    datastore.tenant_set_provisioning(tenant.id).await.unwrap();
    // Double-claiming the same tenant is rejected.
    assert!(datastore.tenant_set_provisioning(tenant.id).await.is_err());
    datastore
        .tenant_set_active(tenant.id, "{}".to_string())
        .await
        .unwrap();
    datastore
        .tenant_suspend(tenant.id, "unpaid invoice", false)
        .await
        .unwrap();
    let suspended = datastore.tenant_fetch(tenant.id).await.unwrap();
    assert_eq!(suspended.state, TenantState::Suspended);
    assert_eq!(suspended.suspended_reason.as_deref(), Some("unpaid invoice"));
    assert_eq!(suspended.suspended_auto, Some(false));
    datastore.tenant_resume(tenant.id).await.unwrap();
    let resumed = datastore.tenant_fetch(tenant.id).await.unwrap();
    assert_eq!(resumed.state, TenantState::Active);
    assert!(resumed.suspended_reason.is_none());

    // failed is retry-eligible.
    datastore.tenant_set_failed(tenant.id, "induced").await.unwrap();
    datastore.tenant_set_provisioning(tenant.id).await.unwrap();
}

#[tokio::test]
async fn test_duplicate_tenant_identity_rejected() {
    let log = test_logger("duplicate_identity");
    let Some(datastore) = test_datastore(&log).await else { return };

    let server = create_server(&datastore, 9950, 9960, 10).await;
    let tenant = create_tenant(&datastore, &server).await;

    let duplicate = emporos_fleet::db::model::Tenant::new(
        Uuid::new_v4(),
        &tenant.name.parse().unwrap(),
        &tenant.domain.parse().unwrap(),
        emporos_common::api::external::StorePlatform::Prestashop,
        emporos_common::api::external::PlanTier::Standard,
    );
    let error = datastore.tenant_create(duplicate).await.unwrap_err();
    assert!(matches!(error, Error::ObjectAlreadyExists { .. }));
}
