// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated implementations of the external collaborators
//!
//! These stand in for the container runtime, reverse proxy, certificate
//! issuer, notification sink, and backup tool so that the full pipeline —
//! including rollback and retry behavior — can be exercised in-process
//! without Docker, nginx, or an ACME endpoint.  Failure injection is
//! explicit: tests arrange the next operation to fail and observe what the
//! pipeline does about it.

use crate::interfaces::backup::{BackupScope, BackupTool, SnapshotId};
use crate::interfaces::certificates::CertificateIssuer;
use crate::interfaces::notify::{Notifier, ProvisionedNotice};
use crate::interfaces::proxy::{ReverseProxy, RouteSpec};
use crate::interfaces::runtime::{ContainerRuntime, EnvironmentSpec};
use async_trait::async_trait;
use emporos_common::api::external::Error;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// State of one simulated tenant environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimEnvironment {
    pub running: bool,
    pub has_volumes: bool,
    /// bumped every time the environment is (re)started, so tests can tell a
    /// fresh environment from a leftover
    pub generation: u64,
}

/// Simulated container runtime.
#[derive(Default)]
pub struct SimRuntime {
    environments: Mutex<HashMap<Uuid, SimEnvironment>>,
    unhealthy: Mutex<HashSet<Uuid>>,
    fail_next_up: AtomicBool,
}

impl SimRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arrange for the next `ensure_up` to fail, leaving partial state
    /// behind the way an interrupted `up` would.
    pub fn fail_next_up(&self) {
        self.fail_next_up.store(true, Ordering::SeqCst);
    }

    /// Make health probes for this tenant fail until cleared.
    pub fn set_unhealthy(&self, tenant_id: Uuid) {
        self.unhealthy.lock().unwrap().insert(tenant_id);
    }

    pub fn clear_unhealthy(&self, tenant_id: Uuid) {
        self.unhealthy.lock().unwrap().remove(&tenant_id);
    }

    pub fn environment(&self, tenant_id: Uuid) -> Option<SimEnvironment> {
        self.environments.lock().unwrap().get(&tenant_id).cloned()
    }

    pub fn running_count(&self) -> usize {
        self.environments
            .lock()
            .unwrap()
            .values()
            .filter(|env| env.running)
            .count()
    }
}

#[async_trait]
impl ContainerRuntime for SimRuntime {
    async fn ensure_up(&self, env: &EnvironmentSpec) -> Result<(), Error> {
        let mut environments = self.environments.lock().unwrap();
        if self.fail_next_up.swap(false, Ordering::SeqCst) {
            // A failed `up` is not atomic: volumes may exist with no
            // container running.  Later attempts must cope.
            let entry = environments
                .entry(env.tenant_id)
                .or_insert(SimEnvironment {
                    running: false,
                    has_volumes: false,
                    generation: 0,
                });
            entry.has_volumes = true;
            entry.running = false;
            return Err(Error::unavail(
                "simulated container runtime failure on start",
            ));
        }
        let entry =
            environments.entry(env.tenant_id).or_insert(SimEnvironment {
                running: false,
                has_volumes: false,
                generation: 0,
            });
        entry.running = true;
        entry.has_volumes = true;
        entry.generation += 1;
        Ok(())
    }

    async fn stop(&self, env: &EnvironmentSpec) -> Result<(), Error> {
        let mut environments = self.environments.lock().unwrap();
        if let Some(entry) = environments.get_mut(&env.tenant_id) {
            entry.running = false;
        }
        Ok(())
    }

    async fn destroy(&self, env: &EnvironmentSpec) -> Result<(), Error> {
        // Destroying a non-existent environment is a no-op by contract.
        self.environments.lock().unwrap().remove(&env.tenant_id);
        Ok(())
    }

    async fn check_health(
        &self,
        env: &EnvironmentSpec,
        _port: u16,
    ) -> Result<(), Error> {
        if self.unhealthy.lock().unwrap().contains(&env.tenant_id) {
            return Err(Error::unavail("simulated health probe failure"));
        }
        match self.environments.lock().unwrap().get(&env.tenant_id) {
            Some(entry) if entry.running => Ok(()),
            _ => Err(Error::unavail("environment is not running")),
        }
    }
}

/// Simulated reverse proxy.
#[derive(Default)]
pub struct SimProxy {
    routes: Mutex<HashMap<Uuid, RouteSpec>>,
    fail_syntax_check: AtomicBool,
}

impl SimProxy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arrange for the next installed route to fail the syntax check.
    pub fn fail_next_syntax_check(&self) {
        self.fail_syntax_check.store(true, Ordering::SeqCst);
    }

    pub fn route(&self, tenant_id: Uuid) -> Option<RouteSpec> {
        self.routes.lock().unwrap().get(&tenant_id).cloned()
    }

    pub fn route_count(&self) -> usize {
        self.routes.lock().unwrap().len()
    }
}

#[async_trait]
impl ReverseProxy for SimProxy {
    async fn install_route(&self, route: &RouteSpec) -> Result<(), Error> {
        if self.fail_syntax_check.swap(false, Ordering::SeqCst) {
            // Contract: a route that fails validation is never activated.
            return Err(Error::unavail(
                "simulated proxy syntax check failure",
            ));
        }
        self.routes.lock().unwrap().insert(route.tenant_id, route.clone());
        Ok(())
    }

    async fn remove_route(&self, tenant_id: Uuid) -> Result<(), Error> {
        self.routes.lock().unwrap().remove(&tenant_id);
        Ok(())
    }
}

/// Simulated certificate issuer.
#[derive(Default)]
pub struct SimCertificateIssuer {
    issued: Mutex<HashSet<String>>,
    fail_issuance: AtomicBool,
}

impl SimCertificateIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every issuance attempt fail until cleared, as when the CA is
    /// unreachable or the domain's DNS does not point here yet.
    pub fn set_fail_issuance(&self, fail: bool) {
        self.fail_issuance.store(fail, Ordering::SeqCst);
    }

    pub fn issued_for(&self, domain: &str) -> bool {
        self.issued.lock().unwrap().contains(domain)
    }
}

#[async_trait]
impl CertificateIssuer for SimCertificateIssuer {
    async fn ensure_certificate(&self, domain: &str) -> Result<(), Error> {
        if self.fail_issuance.load(Ordering::SeqCst) {
            return Err(Error::unavail("simulated ACME failure"));
        }
        self.issued.lock().unwrap().insert(domain.to_string());
        Ok(())
    }

    async fn has_certificate(&self, domain: &str) -> Result<bool, Error> {
        Ok(self.issued.lock().unwrap().contains(domain))
    }
}

/// Simulated notification sink.
#[derive(Default)]
pub struct SimNotifier {
    notices: Mutex<Vec<ProvisionedNotice>>,
    fail_dispatch: AtomicBool,
}

impl SimNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_dispatch(&self, fail: bool) {
        self.fail_dispatch.store(fail, Ordering::SeqCst);
    }

    pub fn notices(&self) -> Vec<ProvisionedNotice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for SimNotifier {
    async fn notify_provisioned(
        &self,
        notice: &ProvisionedNotice,
    ) -> Result<(), Error> {
        if self.fail_dispatch.load(Ordering::SeqCst) {
            return Err(Error::unavail("simulated notification failure"));
        }
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

/// Simulated backup tool.
#[derive(Default)]
pub struct SimBackupTool {
    counter: AtomicU64,
    restores: Mutex<Vec<(Uuid, BackupScope, SnapshotId)>>,
}

impl SimBackupTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restores(&self) -> Vec<(Uuid, BackupScope, SnapshotId)> {
        self.restores.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackupTool for SimBackupTool {
    async fn backup(
        &self,
        tenant_id: Uuid,
        _scope: BackupScope,
    ) -> Result<SnapshotId, Error> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SnapshotId(format!("snap-{}-{}", tenant_id.simple(), n)))
    }

    async fn restore(
        &self,
        tenant_id: Uuid,
        scope: BackupScope,
        snapshot: &SnapshotId,
    ) -> Result<(), Error> {
        self.restores.lock().unwrap().push((
            tenant_id,
            scope,
            snapshot.clone(),
        ));
        Ok(())
    }
}
