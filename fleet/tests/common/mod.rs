// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared setup for integration tests
//!
//! The database-backed tests need a PostgreSQL instance, taken from
//! `EMPOROS_TEST_DATABASE_URL`.  When the variable is unset the tests skip
//! (successfully) rather than fail, so the suite can run in environments
//! without a database.  All test data uses freshly generated identities, so
//! tests are safe to run concurrently against one shared database.

// Each test binary compiles its own copy of this module and uses a subset.
#![allow(dead_code)]

use async_bb8_diesel::AsyncSimpleConnection;
use camino::Utf8PathBuf;
use dropshot::{ConfigLogging, ConfigLoggingLevel};
use emporos_common::api::external::{DomainName, Name, PlanTier, StorePlatform};
use emporos_fleet::db::model::{
    JobKind, ProvisioningJob, Server, ServerUpdate, Tenant,
};
use emporos_fleet::db::{Config as DbConfig, DataStore, Pool};
use emporos_fleet::sim::{
    SimCertificateIssuer, SimNotifier, SimProxy, SimRuntime,
};
use emporos_fleet::worker::{Worker, WorkerSettings};
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const TEST_MASTER_KEY: [u8; 32] = [7u8; 32];

pub fn test_logger(name: &str) -> Logger {
    ConfigLogging::StderrTerminal { level: ConfigLoggingLevel::Warn }
        .to_logger(name.to_string())
        .expect("failed to create test logger")
}

/// A connected test database: the datastore plus a raw pool handle for the
/// occasional test that needs to manipulate rows directly (e.g. aging a
/// heartbeat).
pub struct TestDb {
    pub datastore: Arc<DataStore>,
    pub pool: Arc<Pool>,
}

impl TestDb {
    /// Runs raw SQL against the test database.
    pub async fn exec(&self, sql: &str) {
        let conn = self.pool.pool().get().await.expect("db connection");
        conn.batch_execute_async(sql).await.expect("raw SQL failed");
    }
}

/// Connects to the test database and applies the schema.  Returns `None`
/// (after printing why) when no test database is configured.
pub async fn test_db(log: &Logger) -> Option<TestDb> {
    let Ok(url) = std::env::var("EMPOROS_TEST_DATABASE_URL") else {
        eprintln!(
            "skipping: set EMPOROS_TEST_DATABASE_URL to run \
             database-backed tests"
        );
        return None;
    };
    let pool = Arc::new(Pool::new(log, &DbConfig { url }));
    let conn = pool
        .pool()
        .get()
        .await
        .expect("failed to connect to EMPOROS_TEST_DATABASE_URL");
    // Several test binaries may race to apply the schema; the advisory lock
    // serializes them.
    let ddl = format!(
        "SELECT pg_advisory_lock(183214);\n{}\nSELECT pg_advisory_unlock(183214);",
        include_str!("../../schema/dbinit.sql")
    );
    conn.batch_execute_async(&ddl).await.expect("failed to apply schema");
    drop(conn);
    Some(TestDb { datastore: Arc::new(DataStore::new(pool.clone())), pool })
}

/// Convenience wrapper for tests that only need the datastore.
pub async fn test_datastore(log: &Logger) -> Option<Arc<DataStore>> {
    Some(test_db(log).await?.datastore)
}

/// Registers a fresh test server with the given port range.  Registration
/// writes a fresh heartbeat, so the server is live.
pub async fn create_server(
    datastore: &DataStore,
    port_range_first: u16,
    port_range_last: u16,
    max_tenants: i32,
) -> Server {
    datastore
        .server_upsert(ServerUpdate::new(
            format!("test-{}", Uuid::new_v4().simple()),
            "127.0.0.1:1".to_string(),
            port_range_first,
            port_range_last,
            max_tenants,
        ))
        .await
        .expect("failed to register test server")
}

/// Creates a tenant assigned to `server`, in state `pending`.
pub async fn create_tenant(datastore: &DataStore, server: &Server) -> Tenant {
    let suffix = Uuid::new_v4().simple().to_string();
    let name: Name =
        format!("shop-{}", &suffix[..12]).parse().expect("valid name");
    let domain: DomainName = format!("shop-{}.example.com", &suffix[..12])
        .parse()
        .expect("valid domain");
    let tenant = datastore
        .tenant_create(Tenant::new(
            Uuid::new_v4(),
            &name,
            &domain,
            StorePlatform::Woocommerce,
            PlanTier::Starter,
        ))
        .await
        .expect("failed to create test tenant");
    datastore
        .tenant_set_assignment(tenant.id, server.id)
        .await
        .expect("failed to assign test tenant");
    tenant
}

pub async fn enqueue_provision(
    datastore: &DataStore,
    tenant: &Tenant,
    server: &Server,
) -> ProvisioningJob {
    datastore
        .job_create(ProvisioningJob::new(
            tenant.id,
            server.id,
            JobKind::Provision,
        ))
        .await
        .expect("failed to enqueue provisioning job")
}

/// A worker wired to simulated collaborators, plus handles to those
/// simulators for failure injection and inspection.
pub struct SimWorker {
    pub worker: Worker,
    pub runtime: Arc<SimRuntime>,
    pub proxy: Arc<SimProxy>,
    pub certificates: Arc<SimCertificateIssuer>,
    pub notifier: Arc<SimNotifier>,
    pub workspace_root: Utf8PathBuf,
    // Held so the workspace outlives the worker.
    _workspace_dir: camino_tempfile::Utf8TempDir,
}

pub fn sim_worker(
    log: &Logger,
    datastore: Arc<DataStore>,
    server: Server,
) -> SimWorker {
    let workspace_dir =
        camino_tempfile::tempdir().expect("failed to create temp workspace");
    let workspace_root = workspace_dir.path().to_owned();
    let runtime = Arc::new(SimRuntime::new());
    let proxy = Arc::new(SimProxy::new());
    let certificates = Arc::new(SimCertificateIssuer::new());
    let notifier = Arc::new(SimNotifier::new());
    let worker = Worker::new(
        log.new(slog::o!("component" => "test-worker")),
        datastore,
        server,
        WorkerSettings {
            workspace_root: workspace_root.clone(),
            master_key: TEST_MASTER_KEY,
            // Short enough that a deliberately-unhealthy environment fails
            // the test quickly, long enough to avoid flakes.
            health_timeout: Duration::from_secs(2),
            health_poll_interval: Duration::from_millis(50),
            dequeue_poll_interval: Duration::from_millis(50),
        },
        runtime.clone(),
        proxy.clone(),
        certificates.clone(),
        notifier.clone(),
    );
    SimWorker {
        worker,
        runtime,
        proxy,
        certificates,
        notifier,
        workspace_root,
        _workspace_dir: workspace_dir,
    }
}
