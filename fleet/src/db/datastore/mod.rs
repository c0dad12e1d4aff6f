// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Primary control plane interface for database read and write operations
//!
//! The datastore is the only coordination point between the controller and
//! the worker processes: all cross-process invariants (port uniqueness, the
//! one-in-flight-job-per-tenant rule) are enforced here with storage-layer
//! unique constraints, never with in-process locks, because allocation may be
//! attempted from different worker processes concurrently.

mod job;
mod port;
mod quota;
mod server;
mod tenant;

use super::pool::DbConnection;
use super::Pool;
use async_bb8_diesel::ConnectionManager;
use emporos_common::api::external::Error;
use std::sync::Arc;

pub(crate) type DataStoreConnection<'a> =
    bb8::PooledConnection<'a, ConnectionManager<DbConnection>>;

pub struct DataStore {
    pool: Arc<Pool>,
}

impl DataStore {
    pub fn new(pool: Arc<Pool>) -> Self {
        DataStore { pool }
    }

    pub(crate) async fn pool_connection(
        &self,
    ) -> Result<DataStoreConnection<'_>, Error> {
        self.pool.pool().get().await.map_err(|err| {
            Error::unavail(&format!(
                "Failed to access database connection: {}",
                err
            ))
        })
    }
}
