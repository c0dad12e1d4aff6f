// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task reconciling runtime state with tenant lifecycle state
//!
//! Suspension and resumption are recorded by the controller as state
//! transitions in the database; the actual containers live on the worker
//! host.  This task closes the gap: suspended tenants get their environments
//! stopped (volumes preserved), active tenants get theirs ensured up.  Both
//! operations are idempotent, so the steady state is a cheap no-op cycle.

use crate::background::BackgroundTask;
use crate::db::model::TenantState;
use crate::db::DataStore;
use crate::interfaces::runtime::{ContainerRuntime, EnvironmentSpec};
use camino::Utf8PathBuf;
use futures::future::BoxFuture;
use futures::FutureExt;
use slog::Logger;
use std::sync::Arc;
use uuid::Uuid;

pub struct RuntimeReconciler {
    datastore: Arc<DataStore>,
    server_id: Uuid,
    runtime: Arc<dyn ContainerRuntime>,
    workspace_root: Utf8PathBuf,
}

impl RuntimeReconciler {
    pub fn new(
        datastore: Arc<DataStore>,
        server_id: Uuid,
        runtime: Arc<dyn ContainerRuntime>,
        workspace_root: Utf8PathBuf,
    ) -> Self {
        RuntimeReconciler { datastore, server_id, runtime, workspace_root }
    }

    fn environment_spec(&self, tenant_id: Uuid) -> EnvironmentSpec {
        EnvironmentSpec::new(
            tenant_id,
            self.workspace_root.join(tenant_id.to_string()),
        )
    }
}

impl BackgroundTask for RuntimeReconciler {
    fn activate<'a>(
        &'a mut self,
        log: &'a Logger,
    ) -> BoxFuture<'a, serde_json::Value> {
        async move {
            let mut stopped = 0;
            let mut ensured = 0;
            let mut errors = 0;

            let suspended = self
                .datastore
                .tenant_list_on_server(self.server_id, TenantState::Suspended)
                .await;
            match suspended {
                Ok(tenants) => {
                    for tenant in tenants {
                        match self
                            .runtime
                            .stop(&self.environment_spec(tenant.id))
                            .await
                        {
                            Ok(()) => stopped += 1,
                            Err(error) => {
                                errors += 1;
                                warn!(
                                    log,
                                    "failed to stop suspended tenant";
                                    "tenant_id" => %tenant.id,
                                    "error" => %error,
                                );
                            }
                        }
                    }
                }
                Err(error) => {
                    errors += 1;
                    error!(
                        log,
                        "failed to list suspended tenants";
                        "error" => %error,
                    );
                }
            }

            let active = self
                .datastore
                .tenant_list_on_server(self.server_id, TenantState::Active)
                .await;
            match active {
                Ok(tenants) => {
                    for tenant in tenants {
                        match self
                            .runtime
                            .ensure_up(&self.environment_spec(tenant.id))
                            .await
                        {
                            Ok(()) => ensured += 1,
                            Err(error) => {
                                errors += 1;
                                warn!(
                                    log,
                                    "failed to ensure active tenant running";
                                    "tenant_id" => %tenant.id,
                                    "error" => %error,
                                );
                            }
                        }
                    }
                }
                Err(error) => {
                    errors += 1;
                    error!(
                        log,
                        "failed to list active tenants";
                        "error" => %error,
                    );
                }
            }

            serde_json::json!({
                "suspended_stopped": stopped,
                "active_ensured": ensured,
                "errors": errors,
            })
        }
        .boxed()
    }
}
