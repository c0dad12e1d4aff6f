// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end pipeline behavior against simulated collaborators
//!
//! These tests drive the real worker and the real datastore; only the
//! external collaborators (container runtime, proxy, ACME, notifications)
//! are simulated.  They require `EMPOROS_TEST_DATABASE_URL` and skip
//! without it.

mod common;

use common::*;
use emporos_fleet::background::tasks::cert_retry::CertificateRefresh;
use emporos_fleet::background::BackgroundTask;
use emporos_fleet::db::model::{JobKind, JobState, ProvisioningJob, TenantState};
use emporos_fleet::secrets;
use std::sync::Arc;

#[tokio::test]
async fn test_provision_scenario_single_free_port() {
    let log = test_logger("provision_single_free_port");
    let Some(datastore) = test_datastore(&log).await else { return };

    // One free port in the entire range: the pipeline must land on 8001.
    let server = create_server(&datastore, 8001, 8001, 10).await;
    let tenant = create_tenant(&datastore, &server).await;
    let job = enqueue_provision(&datastore, &tenant, &server).await;

    let sim = sim_worker(&log, Arc::clone(&datastore), server.clone());
    assert!(sim.worker.run_once().await.unwrap());

    let tenant_after = datastore.tenant_fetch(tenant.id).await.unwrap();
    assert_eq!(tenant_after.state, TenantState::Active);
    assert_eq!(tenant_after.port.map(u16::from), Some(8001));
    assert!(tenant_after.error_message.is_none());

    let assignment =
        datastore.port_fetch_for_tenant(tenant.id).await.unwrap().unwrap();
    assert_eq!(assignment.server_id, server.id);
    assert_eq!(u16::from(assignment.port), 8001);

    // Exactly one environment, routed on the allocated port.
    assert_eq!(sim.runtime.running_count(), 1);
    let route = sim.proxy.route(tenant.id).unwrap();
    assert_eq!(route.port, 8001);
    assert_eq!(route.domain, tenant.domain);

    // The job is terminal history.
    let jobs = datastore.job_list_for_tenant(tenant.id).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, job.id);
    assert_eq!(jobs[0].state, JobState::Succeeded);

    // The persisted credentials unseal with the worker's master key and
    // match what the notification carried.
    let notices = sim.notifier.notices();
    assert_eq!(notices.len(), 1);
    let sealed = tenant_after.sealed_credentials.unwrap();
    let credentials =
        secrets::unseal_credentials(&TEST_MASTER_KEY, &tenant.id, &sealed)
            .unwrap();
    assert_eq!(credentials.admin_password, notices[0].admin_password);

    // The quota grant was persisted as part of finalization.
    let quota = datastore.quota_fetch(tenant.id).await.unwrap();
    assert!(quota.disk_bytes_limit > 0);
}

#[tokio::test]
async fn test_retry_after_container_start_failure() {
    let log = test_logger("retry_after_start_failure");
    let Some(datastore) = test_datastore(&log).await else { return };

    let server = create_server(&datastore, 8001, 8010, 10).await;
    let tenant = create_tenant(&datastore, &server).await;
    let sim = sim_worker(&log, Arc::clone(&datastore), server.clone());

    // First attempt: the container start blows up.
    sim.runtime.fail_next_up();
    enqueue_provision(&datastore, &tenant, &server).await;
    assert!(sim.worker.run_once().await.unwrap());

    let tenant_failed = datastore.tenant_fetch(tenant.id).await.unwrap();
    assert_eq!(tenant_failed.state, TenantState::Failed);
    assert!(tenant_failed.error_message.is_some());
    // Rollback: no environment, no port, no route.
    assert_eq!(sim.runtime.running_count(), 0);
    assert!(datastore
        .port_fetch_for_tenant(tenant.id)
        .await
        .unwrap()
        .is_none());
    assert_eq!(sim.proxy.route_count(), 0);

    // Second attempt tears down the leftovers and completes.
    enqueue_provision(&datastore, &tenant, &server).await;
    assert!(sim.worker.run_once().await.unwrap());

    let tenant_after = datastore.tenant_fetch(tenant.id).await.unwrap();
    assert_eq!(tenant_after.state, TenantState::Active);
    // The lowest port is free again, so the retry lands back on 8001.
    assert_eq!(tenant_after.port.map(u16::from), Some(8001));
    assert_eq!(sim.runtime.running_count(), 1);
    let route = sim.proxy.route(tenant.id).unwrap();
    assert_eq!(route.port, 8001);
}

#[tokio::test]
async fn test_rollback_completeness_on_health_failure() {
    let log = test_logger("rollback_on_health_failure");
    let Some(datastore) = test_datastore(&log).await else { return };

    let server = create_server(&datastore, 8001, 8010, 10).await;
    let tenant = create_tenant(&datastore, &server).await;
    let sim = sim_worker(&log, Arc::clone(&datastore), server.clone());

    // The environment starts but never becomes healthy.
    sim.runtime.set_unhealthy(tenant.id);
    enqueue_provision(&datastore, &tenant, &server).await;
    assert!(sim.worker.run_once().await.unwrap());

    let tenant_after = datastore.tenant_fetch(tenant.id).await.unwrap();
    assert_eq!(tenant_after.state, TenantState::Failed);
    assert!(tenant_after
        .error_message
        .as_deref()
        .unwrap()
        .contains("healthy"));
    assert_eq!(sim.runtime.running_count(), 0);
    assert!(datastore
        .port_fetch_for_tenant(tenant.id)
        .await
        .unwrap()
        .is_none());
    assert_eq!(sim.proxy.route_count(), 0);
    // The workspace is deliberately left behind for forensic inspection.
    assert!(sim
        .workspace_root
        .join(tenant.id.to_string())
        .as_std_path()
        .exists());

    let jobs = datastore.job_list_for_tenant(tenant.id).await.unwrap();
    assert_eq!(jobs[0].state, JobState::Failed);
}

#[tokio::test]
async fn test_invalid_proxy_route_is_never_applied() {
    let log = test_logger("invalid_route_never_applied");
    let Some(datastore) = test_datastore(&log).await else { return };

    let server = create_server(&datastore, 8001, 8010, 10).await;
    let tenant = create_tenant(&datastore, &server).await;
    let sim = sim_worker(&log, Arc::clone(&datastore), server.clone());

    sim.proxy.fail_next_syntax_check();
    enqueue_provision(&datastore, &tenant, &server).await;
    assert!(sim.worker.run_once().await.unwrap());

    let tenant_after = datastore.tenant_fetch(tenant.id).await.unwrap();
    assert_eq!(tenant_after.state, TenantState::Failed);
    assert_eq!(sim.proxy.route_count(), 0);
    assert_eq!(sim.runtime.running_count(), 0);
}

#[tokio::test]
async fn test_certificate_failure_is_not_fatal() {
    let log = test_logger("certificate_failure_nonfatal");
    let Some(datastore) = test_datastore(&log).await else { return };

    let server = create_server(&datastore, 8001, 8010, 10).await;
    let tenant = create_tenant(&datastore, &server).await;
    let sim = sim_worker(&log, Arc::clone(&datastore), server.clone());

    sim.certificates.set_fail_issuance(true);
    enqueue_provision(&datastore, &tenant, &server).await;
    assert!(sim.worker.run_once().await.unwrap());

    // Provisioning completed over plaintext routing.
    let tenant_after = datastore.tenant_fetch(tenant.id).await.unwrap();
    assert_eq!(tenant_after.state, TenantState::Active);
    assert!(!sim.certificates.issued_for(&tenant.domain));
    assert_eq!(sim.proxy.route_count(), 1);

    // Issuance is retried on a later cycle: once the CA cooperates, the
    // refresh task closes the gap.
    sim.certificates.set_fail_issuance(false);
    let mut refresh = CertificateRefresh::new(
        Arc::clone(&datastore),
        server.id,
        sim.certificates.clone(),
    );
    let summary = refresh.activate(&log).await;
    assert_eq!(summary["issued"], 1);
    assert!(sim.certificates.issued_for(&tenant.domain));
}

#[tokio::test]
async fn test_notification_failure_is_not_fatal() {
    let log = test_logger("notification_failure_nonfatal");
    let Some(datastore) = test_datastore(&log).await else { return };

    let server = create_server(&datastore, 8001, 8010, 10).await;
    let tenant = create_tenant(&datastore, &server).await;
    let sim = sim_worker(&log, Arc::clone(&datastore), server.clone());

    sim.notifier.set_fail_dispatch(true);
    enqueue_provision(&datastore, &tenant, &server).await;
    assert!(sim.worker.run_once().await.unwrap());

    let tenant_after = datastore.tenant_fetch(tenant.id).await.unwrap();
    assert_eq!(tenant_after.state, TenantState::Active);
    assert!(sim.notifier.notices().is_empty());
}

#[tokio::test]
async fn test_teardown_job_releases_everything() {
    let log = test_logger("teardown_releases_everything");
    let Some(datastore) = test_datastore(&log).await else { return };

    let server = create_server(&datastore, 8001, 8010, 10).await;
    let tenant = create_tenant(&datastore, &server).await;
    let sim = sim_worker(&log, Arc::clone(&datastore), server.clone());

    enqueue_provision(&datastore, &tenant, &server).await;
    assert!(sim.worker.run_once().await.unwrap());
    assert_eq!(sim.runtime.running_count(), 1);

    datastore
        .job_create(ProvisioningJob::new(
            tenant.id,
            server.id,
            JobKind::Teardown,
        ))
        .await
        .unwrap();
    assert!(sim.worker.run_once().await.unwrap());

    // Deletion was preceded by full resource teardown.
    assert_eq!(sim.runtime.running_count(), 0);
    assert_eq!(sim.proxy.route_count(), 0);
    assert!(datastore
        .port_fetch_for_tenant(tenant.id)
        .await
        .unwrap()
        .is_none());
    assert!(datastore.quota_fetch(tenant.id).await.is_err());
    assert!(datastore.tenant_fetch(tenant.id).await.is_err());
    assert!(!sim
        .workspace_root
        .join(tenant.id.to_string())
        .as_std_path()
        .exists());
}

#[tokio::test]
async fn test_empty_queue_reports_no_work() {
    let log = test_logger("empty_queue");
    let Some(datastore) = test_datastore(&log).await else { return };

    let server = create_server(&datastore, 8001, 8010, 10).await;
    let sim = sim_worker(&log, Arc::clone(&datastore), server);
    assert!(!sim.worker.run_once().await.unwrap());
}
