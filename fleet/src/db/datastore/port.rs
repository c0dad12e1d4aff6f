// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`DataStore`] methods on [`PortAssignment`]s.
//!
//! Port allocation is optimistic: the caller scans for the lowest free port
//! in the server's range and tries to commit it.  The `(server_id, port)`
//! primary key arbitrates between concurrent allocators — the first
//! committer wins and the loser retries against the next candidate.  No
//! in-process lock is involved, so this is safe across worker processes.

use super::DataStore;
use crate::db::error::diesel_result_optional;
use crate::db::error::is_unique_violation;
use crate::db::error::public_error_from_diesel;
use crate::db::error::ErrorHandler;
use crate::db::model::{PortAssignment, Server, SqlU16};
use async_bb8_diesel::AsyncRunQueryDsl;
use diesel::prelude::*;
use emporos_common::api::external::CreateResult;
use emporos_common::api::external::DeleteResult;
use emporos_common::api::external::Error;
use emporos_common::api::external::ListResultVec;
use std::collections::BTreeSet;
use uuid::Uuid;

impl DataStore {
    /// Allocates the lowest free port on `server` to `tenant_id`.
    ///
    /// Idempotent: if the tenant already holds an assignment on this server
    /// it is returned unchanged, so a retried pipeline reuses its port.  An
    /// assignment left behind on a *different* server (a tenant re-routed
    /// after a failure) is released first.
    ///
    /// Range exhaustion surfaces as `InsufficientCapacity`: an operator
    /// problem, not a tenant-caused failure.
    pub async fn port_allocate(
        &self,
        server: &Server,
        tenant_id: Uuid,
    ) -> CreateResult<PortAssignment> {
        use crate::db::schema::port_assignment::dsl;
        let conn = self.pool_connection().await?;

        if let Some(existing) = diesel_result_optional(
            dsl::port_assignment
                .filter(dsl::tenant_id.eq(tenant_id))
                .select(PortAssignment::as_select())
                .first_async(&*conn)
                .await,
        )
        .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?
        {
            if existing.server_id == server.id {
                return Ok(existing);
            }
            diesel::delete(dsl::port_assignment)
                .filter(dsl::tenant_id.eq(tenant_id))
                .execute_async(&*conn)
                .await
                .map_err(|e| {
                    public_error_from_diesel(e, ErrorHandler::Server)
                })?;
        }

        // Upper bound on allocation attempts: every iteration either commits
        // or observes at least one port it did not know was taken, so the
        // range size bounds the loop.
        let range_len = server.port_range().count();
        for _ in 0..=range_len {
            let taken: Vec<SqlU16> = dsl::port_assignment
                .filter(dsl::server_id.eq(server.id))
                .select(dsl::port)
                .load_async(&*conn)
                .await
                .map_err(|e| {
                    public_error_from_diesel(e, ErrorHandler::Server)
                })?;
            let taken: BTreeSet<u16> =
                taken.into_iter().map(u16::from).collect();

            let Some(candidate) =
                server.port_range().find(|port| !taken.contains(port))
            else {
                return Err(Error::insufficient_capacity(
                    "no free ports on the assigned server",
                    &format!(
                        "port range {}-{} on server {} ({}) is exhausted",
                        server.port_range_first.0,
                        server.port_range_last.0,
                        server.name,
                        server.id,
                    ),
                ));
            };

            let result = diesel::insert_into(dsl::port_assignment)
                .values(PortAssignment::new(server.id, candidate, tenant_id))
                .returning(PortAssignment::as_returning())
                .get_result_async(&*conn)
                .await;
            match result {
                Ok(assignment) => return Ok(assignment),
                Err(e) if is_unique_violation(&e) => {
                    // Lost the race for this candidate; rescan and retry.
                    continue;
                }
                Err(e) => {
                    return Err(public_error_from_diesel(
                        e,
                        ErrorHandler::Server,
                    ))
                }
            }
        }

        Err(Error::insufficient_capacity(
            "no free ports on the assigned server",
            &format!(
                "gave up allocating a port on server {} after repeated \
                 conflicts",
                server.id
            ),
        ))
    }

    /// Releases a port.  Idempotent: releasing an already-free port is a
    /// no-op, not an error, so rollback can run against partially-rolled-back
    /// state.
    pub async fn port_release(
        &self,
        server_id: Uuid,
        port: u16,
    ) -> DeleteResult {
        use crate::db::schema::port_assignment::dsl;
        let conn = self.pool_connection().await?;
        diesel::delete(dsl::port_assignment)
            .filter(dsl::server_id.eq(server_id))
            .filter(dsl::port.eq(SqlU16(port)))
            .execute_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        Ok(())
    }

    /// Releases whatever port the tenant holds, if any.  Used by rollback and
    /// teardown, which may not know whether the allocation step ever ran.
    pub async fn port_release_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> DeleteResult {
        use crate::db::schema::port_assignment::dsl;
        let conn = self.pool_connection().await?;
        diesel::delete(dsl::port_assignment)
            .filter(dsl::tenant_id.eq(tenant_id))
            .execute_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        Ok(())
    }

    pub async fn port_fetch_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<PortAssignment>, Error> {
        use crate::db::schema::port_assignment::dsl;
        let conn = self.pool_connection().await?;
        diesel_result_optional(
            dsl::port_assignment
                .filter(dsl::tenant_id.eq(tenant_id))
                .select(PortAssignment::as_select())
                .first_async(&*conn)
                .await,
        )
        .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))
    }

    pub async fn port_list_for_server(
        &self,
        server_id: Uuid,
    ) -> ListResultVec<PortAssignment> {
        use crate::db::schema::port_assignment::dsl;
        let conn = self.pool_connection().await?;
        dsl::port_assignment
            .filter(dsl::server_id.eq(server_id))
            .order(dsl::port.asc())
            .select(PortAssignment::as_select())
            .load_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))
    }
}
