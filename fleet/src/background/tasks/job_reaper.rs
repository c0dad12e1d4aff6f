// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task resetting jobs abandoned by crashed workers
//!
//! There is no mid-pipeline cancellation: a worker that dies leaves its job
//! `running` forever.  This task applies the explicit staleness policy: a
//! running job claimed long enough ago, on a server whose heartbeat has gone
//! stale, is reset to `failed` so that a retry can be enqueued.  A job on a
//! live server is never touched, however long it has been running.

use crate::background::BackgroundTask;
use crate::db::DataStore;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use slog::Logger;
use std::sync::Arc;

pub struct JobReaper {
    datastore: Arc<DataStore>,
    /// how long a job must have been running before it is eligible
    stale_after: chrono::Duration,
    /// heartbeat freshness window; reuse of the routing threshold
    liveness_window: chrono::Duration,
}

impl JobReaper {
    pub fn new(
        datastore: Arc<DataStore>,
        stale_after: chrono::Duration,
        liveness_window: chrono::Duration,
    ) -> Self {
        JobReaper { datastore, stale_after, liveness_window }
    }
}

impl BackgroundTask for JobReaper {
    fn activate<'a>(
        &'a mut self,
        log: &'a Logger,
    ) -> BoxFuture<'a, serde_json::Value> {
        async move {
            let now = Utc::now();
            match self
                .datastore
                .jobs_reap_stuck(
                    now - self.stale_after,
                    now - self.liveness_window,
                )
                .await
            {
                Ok(0) => serde_json::json!({ "reaped": 0 }),
                Ok(reaped) => {
                    warn!(
                        log,
                        "reset jobs abandoned by crashed workers";
                        "count" => reaped,
                    );
                    serde_json::json!({ "reaped": reaped })
                }
                Err(error) => {
                    error!(
                        log,
                        "failed to reap stuck jobs";
                        "error" => %error,
                    );
                    serde_json::json!({ "error": error.to_string() })
                }
            }
        }
        .boxed()
    }
}
