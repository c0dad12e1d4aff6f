// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`DataStore`] methods on [`Server`]s.

use super::DataStore;
use crate::db::error::public_error_from_diesel;
use crate::db::error::ErrorHandler;
use crate::db::model::{Server, ServerStatus, ServerUpdate, TenantState};
use async_bb8_diesel::AsyncRunQueryDsl;
use chrono::Utc;
use diesel::prelude::*;
use emporos_common::api::external::CreateResult;
use emporos_common::api::external::Error;
use emporos_common::api::external::ListResultVec;
use emporos_common::api::external::LookupResult;
use emporos_common::api::external::LookupType;
use emporos_common::api::external::ResourceType;
use emporos_common::api::external::UpdateResult;
use std::collections::BTreeMap;
use uuid::Uuid;

impl DataStore {
    /// Registers a worker host, updating the existing record (keyed by name)
    /// if the worker has registered before.  Registration never changes the
    /// operator-declared status of an existing record.
    pub async fn server_upsert(
        &self,
        server_update: ServerUpdate,
    ) -> CreateResult<Server> {
        use crate::db::schema::server::dsl;
        let name = server_update.name.clone();
        let conn = self.pool_connection().await?;
        diesel::insert_into(dsl::server)
            .values(server_update.clone().into_insertable())
            .on_conflict(dsl::name)
            .do_update()
            .set((
                dsl::time_modified.eq(Utc::now()),
                dsl::address.eq(server_update.address),
                dsl::port_range_first.eq(server_update.port_range_first),
                dsl::port_range_last.eq(server_update.port_range_last),
                dsl::max_tenants.eq(server_update.max_tenants),
                dsl::last_heartbeat.eq(Utc::now()),
            ))
            .returning(Server::as_returning())
            .get_result_async(&*conn)
            .await
            .map_err(|e| {
                public_error_from_diesel(
                    e,
                    ErrorHandler::Conflict(ResourceType::Server, &name),
                )
            })
    }

    /// Writes a heartbeat timestamp for the given server.  This is the only
    /// liveness signal; readers compare its age against the freshness window.
    pub async fn server_heartbeat(&self, server_id: Uuid) -> UpdateResult<()> {
        use crate::db::schema::server::dsl;
        let conn = self.pool_connection().await?;
        let updated = diesel::update(dsl::server)
            .filter(dsl::id.eq(server_id))
            .set(dsl::last_heartbeat.eq(Utc::now()))
            .execute_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        if updated == 0 {
            return Err(Error::not_found_by_id(
                ResourceType::Server,
                &server_id,
            ));
        }
        Ok(())
    }

    pub async fn server_fetch(&self, server_id: Uuid) -> LookupResult<Server> {
        use crate::db::schema::server::dsl;
        let conn = self.pool_connection().await?;
        dsl::server
            .filter(dsl::id.eq(server_id))
            .select(Server::as_select())
            .first_async(&*conn)
            .await
            .map_err(|e| {
                public_error_from_diesel(
                    e,
                    ErrorHandler::NotFoundByLookup(
                        ResourceType::Server,
                        LookupType::ById(server_id),
                    ),
                )
            })
    }

    pub async fn server_fetch_by_name(
        &self,
        name: &str,
    ) -> LookupResult<Server> {
        use crate::db::schema::server::dsl;
        let conn = self.pool_connection().await?;
        dsl::server
            .filter(dsl::name.eq(name.to_string()))
            .select(Server::as_select())
            .first_async(&*conn)
            .await
            .map_err(|e| {
                public_error_from_diesel(
                    e,
                    ErrorHandler::NotFoundByLookup(
                        ResourceType::Server,
                        LookupType::ByName(name.to_string()),
                    ),
                )
            })
    }

    /// Servers are never deleted, only marked; the full list is small.
    pub async fn server_list(&self) -> ListResultVec<Server> {
        use crate::db::schema::server::dsl;
        let conn = self.pool_connection().await?;
        dsl::server
            .order(dsl::name.asc())
            .select(Server::as_select())
            .load_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))
    }

    pub async fn server_set_status(
        &self,
        server_id: Uuid,
        status: ServerStatus,
    ) -> UpdateResult<()> {
        use crate::db::schema::server::dsl;
        let conn = self.pool_connection().await?;
        let updated = diesel::update(dsl::server)
            .filter(dsl::id.eq(server_id))
            .set((dsl::status.eq(status), dsl::time_modified.eq(Utc::now())))
            .execute_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        if updated == 0 {
            return Err(Error::not_found_by_id(
                ResourceType::Server,
                &server_id,
            ));
        }
        Ok(())
    }

    /// Returns, per server, the number of tenants currently holding
    /// resources there.  This is the capacity signal consulted by routing.
    pub async fn server_tenant_counts(
        &self,
    ) -> Result<BTreeMap<Uuid, i64>, Error> {
        use crate::db::schema::tenant::dsl;
        let conn = self.pool_connection().await?;
        let rows: Vec<(Option<Uuid>, i64)> = dsl::tenant
            .filter(dsl::time_deleted.is_null())
            .filter(dsl::state.eq_any(vec![
                TenantState::Provisioning,
                TenantState::Active,
                TenantState::Suspended,
            ]))
            .group_by(dsl::server_id)
            .select((dsl::server_id, diesel::dsl::count_star()))
            .load_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        Ok(rows
            .into_iter()
            .filter_map(|(server_id, count)| {
                server_id.map(|id| (id, count))
            })
            .collect())
    }
}
