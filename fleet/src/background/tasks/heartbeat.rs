// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task writing this worker's heartbeat
//!
//! The heartbeat row is the worker's only liveness signal: the controller
//! routes new tenants (and the status surface reports health) by heartbeat
//! age alone.  If this task stops writing, the server drops out of routing
//! after the freshness window even though its declared status is untouched.

use crate::background::BackgroundTask;
use crate::db::DataStore;
use futures::future::BoxFuture;
use futures::FutureExt;
use slog::Logger;
use std::sync::Arc;
use uuid::Uuid;

pub struct HeartbeatWriter {
    datastore: Arc<DataStore>,
    server_id: Uuid,
}

impl HeartbeatWriter {
    pub fn new(datastore: Arc<DataStore>, server_id: Uuid) -> Self {
        HeartbeatWriter { datastore, server_id }
    }
}

impl BackgroundTask for HeartbeatWriter {
    fn activate<'a>(
        &'a mut self,
        log: &'a Logger,
    ) -> BoxFuture<'a, serde_json::Value> {
        async move {
            match self.datastore.server_heartbeat(self.server_id).await {
                Ok(()) => serde_json::json!({ "status": "ok" }),
                Err(error) => {
                    // Failing to heartbeat is serious: after the freshness
                    // window this worker reads as dead.
                    error!(
                        log,
                        "failed to write heartbeat";
                        "error" => %error,
                    );
                    serde_json::json!({ "error": error.to_string() })
                }
            }
        }
        .boxed()
    }
}
