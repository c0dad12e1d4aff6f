// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Emporos fleet control plane
//!
//! Two processes share this library and coordinate exclusively through the
//! shared database:
//!
//! * `fleetd` — the central controller: intake and admin HTTP API, fleet
//!   status, and the stuck-job reaper.
//! * `fleet-worker` — one per worker host: registers its server record,
//!   heartbeats, consumes the host's job queue (running the provisioning
//!   pipeline), and runs the local periodic loops (quota monitor, runtime
//!   reconciler, certificate retry).

// The historic idiom of this codebase: diesel and slog macros are used
// crate-wide.
#[macro_use]
extern crate diesel;
#[macro_use]
extern crate slog;

pub mod app;
pub mod background;
pub mod config;
pub mod context;
pub mod db;
pub mod external_api;
pub mod interfaces;
pub mod pipeline;
pub mod secrets;
pub mod sim;
pub mod usage;
pub mod worker;

pub use config::Config;

use crate::app::Controller;
use crate::background::tasks::cert_retry::CertificateRefresh;
use crate::background::tasks::heartbeat::HeartbeatWriter;
use crate::background::tasks::job_reaper::JobReaper;
use crate::background::tasks::quota_monitor::QuotaMonitor;
use crate::background::tasks::reconciler::RuntimeReconciler;
use crate::context::ServerContext;
use crate::db::model::ServerUpdate;
use crate::external_api::http_entrypoints::external_api;
use crate::interfaces::backup::{
    BackupTool, CommandBackupTool, DisabledBackupTool,
};
use crate::interfaces::certificates::{CertificateIssuer, CommandIssuer};
use crate::interfaces::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::interfaces::proxy::{NginxProxy, ProxyPaths, ReverseProxy};
use crate::interfaces::runtime::{ComposeRuntime, ContainerRuntime};
use crate::worker::{Worker, WorkerSettings};
use std::sync::Arc;

/// Run the central controller until the HTTP server shuts down.
pub async fn run_server(config: &Config) -> Result<(), String> {
    let log = config
        .log
        .to_logger("fleetd")
        .map_err(|e| format!("initializing logger: {}", e))?;
    info!(log, "setting up fleetd");

    let pool = Arc::new(db::Pool::new(&log, &config.database));
    let datastore = Arc::new(db::DataStore::new(pool));

    let backup: Arc<dyn BackupTool> = match &config.backup_command {
        Some(bin) => Arc::new(CommandBackupTool::new(
            log.new(o!("component" => "backup")),
            bin.clone(),
        )),
        None => Arc::new(DisabledBackupTool),
    };

    let controller = Arc::new(Controller::new(
        log.new(o!("component" => "controller")),
        Arc::clone(&datastore),
        config.tunables.liveness_window(),
        config.tunables.probe_timeout(),
        backup,
    ));

    let mut driver = background::Driver::new();
    driver.register(
        "job_reaper",
        config.tunables.reaper_period(),
        Box::new(JobReaper::new(
            Arc::clone(&datastore),
            config.tunables.job_stale_after(),
            config.tunables.liveness_window(),
        )),
        &log,
    );

    let apictx = Arc::new(ServerContext::new(controller));
    let server = dropshot::HttpServerStarter::new(
        &config.dropshot,
        external_api(),
        apictx,
        &log.new(o!("component" => "dropshot_external")),
    )
    .map_err(|error| format!("initializing external server: {}", error))?
    .start();
    info!(log, "fleetd running"; "local_addr" => %server.local_addr());

    let result = server.await;
    // Tear down the background tasks along with the server.
    drop(driver);
    result
}

/// Run a pipeline worker forever.
pub async fn run_worker(config: &Config) -> Result<(), String> {
    let log = config
        .log
        .to_logger("fleet-worker")
        .map_err(|e| format!("initializing logger: {}", e))?;

    let worker_config = config
        .worker
        .as_ref()
        .ok_or_else(|| config::LoadError::MissingWorkerSection.to_string())?;
    let master_key =
        worker_config.master_key_bytes().map_err(|e| e.to_string())?;
    info!(log, "setting up fleet-worker"; "server" => &worker_config.name);

    let pool = Arc::new(db::Pool::new(&log, &config.database));
    let datastore = Arc::new(db::DataStore::new(pool));

    // Registration is an upsert, so restarting with changed capacity or a
    // changed port range simply updates the record.
    let server = datastore
        .server_upsert(ServerUpdate::new(
            worker_config.name.clone(),
            worker_config.address.clone(),
            worker_config.port_range_first,
            worker_config.port_range_last,
            worker_config.max_tenants,
        ))
        .await
        .map_err(|e| format!("registering server: {}", e))?;

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(ComposeRuntime::new(
        log.new(o!("component" => "runtime")),
        worker_config.compose_bin.clone(),
    ));
    let proxy: Arc<dyn ReverseProxy> = Arc::new(NginxProxy::new(
        log.new(o!("component" => "proxy")),
        ProxyPaths {
            sites_dir: worker_config.sites_dir.clone(),
            access_log_dir: worker_config.access_log_dir.clone(),
            acme_webroot: worker_config.acme_webroot.clone(),
        },
        worker_config.proxy_check_command.clone(),
        worker_config.proxy_reload_command.clone(),
    ));
    let certificates: Arc<dyn CertificateIssuer> = Arc::new(
        CommandIssuer::new(
            log.new(o!("component" => "certificates")),
            worker_config.certificate_command.clone(),
            worker_config.cert_root.clone(),
        ),
    );
    let notifier: Arc<dyn Notifier> = match &worker_config.notify_endpoint {
        Some(endpoint) => Arc::new(WebhookNotifier::new(
            log.new(o!("component" => "notifier")),
            endpoint.clone(),
        )),
        None => {
            Arc::new(LogNotifier::new(log.new(o!("component" => "notifier"))))
        }
    };

    let mut driver = background::Driver::new();
    driver.register(
        "heartbeat",
        config.tunables.heartbeat_period(),
        Box::new(HeartbeatWriter::new(Arc::clone(&datastore), server.id)),
        &log,
    );
    driver.register(
        "quota_monitor",
        config.tunables.quota_period(),
        Box::new(QuotaMonitor::new(
            Arc::clone(&datastore),
            server.id,
            worker_config.workspace_root.clone(),
            worker_config.access_log_dir.clone(),
            config.tunables.alert_cooldown(),
        )),
        &log,
    );
    driver.register(
        "runtime_reconciler",
        config.tunables.reconcile_period(),
        Box::new(RuntimeReconciler::new(
            Arc::clone(&datastore),
            server.id,
            Arc::clone(&runtime),
            worker_config.workspace_root.clone(),
        )),
        &log,
    );
    driver.register(
        "certificate_refresh",
        config.tunables.cert_retry_period(),
        Box::new(CertificateRefresh::new(
            Arc::clone(&datastore),
            server.id,
            Arc::clone(&certificates),
        )),
        &log,
    );

    let worker = Worker::new(
        log.new(o!("component" => "worker")),
        datastore,
        server,
        WorkerSettings {
            workspace_root: worker_config.workspace_root.clone(),
            master_key,
            health_timeout: config.tunables.health_timeout(),
            health_poll_interval: config.tunables.health_poll_interval(),
            dequeue_poll_interval: config.tunables.dequeue_poll_interval(),
        },
        runtime,
        proxy,
        certificates,
        notifier,
    );

    // The job loop runs until the process is killed; the driver's periodic
    // tasks run alongside it.
    worker.run().await;
    drop(driver);
    Ok(())
}
