// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`DataStore`] methods on [`Tenant`]s.

use super::DataStore;
use crate::db::error::public_error_from_diesel;
use crate::db::error::ErrorHandler;
use crate::db::model::{SqlU16, Tenant, TenantState};
use async_bb8_diesel::AsyncRunQueryDsl;
use chrono::Utc;
use diesel::prelude::*;
use emporos_common::api::external::CreateResult;
use emporos_common::api::external::DeleteResult;
use emporos_common::api::external::Error;
use emporos_common::api::external::ListResultVec;
use emporos_common::api::external::LookupResult;
use emporos_common::api::external::LookupType;
use emporos_common::api::external::ResourceType;
use emporos_common::api::external::UpdateResult;
use uuid::Uuid;

impl DataStore {
    /// Stores a new tenant.  Duplicate names or domains surface as
    /// `ObjectAlreadyExists` via the table's unique indexes; the intake path
    /// relies on this rather than a racy pre-check.
    pub async fn tenant_create(&self, new_tenant: Tenant) -> CreateResult<Tenant> {
        use crate::db::schema::tenant::dsl;
        let name = new_tenant.name.clone();
        let conn = self.pool_connection().await?;
        diesel::insert_into(dsl::tenant)
            .values(new_tenant)
            .returning(Tenant::as_returning())
            .get_result_async(&*conn)
            .await
            .map_err(|e| {
                public_error_from_diesel(
                    e,
                    ErrorHandler::Conflict(ResourceType::Tenant, &name),
                )
            })
    }

    pub async fn tenant_fetch(&self, tenant_id: Uuid) -> LookupResult<Tenant> {
        use crate::db::schema::tenant::dsl;
        let conn = self.pool_connection().await?;
        dsl::tenant
            .filter(dsl::id.eq(tenant_id))
            .filter(dsl::time_deleted.is_null())
            .select(Tenant::as_select())
            .first_async(&*conn)
            .await
            .map_err(|e| {
                public_error_from_diesel(
                    e,
                    ErrorHandler::NotFoundByLookup(
                        ResourceType::Tenant,
                        LookupType::ById(tenant_id),
                    ),
                )
            })
    }

    pub async fn tenant_list(&self) -> ListResultVec<Tenant> {
        use crate::db::schema::tenant::dsl;
        let conn = self.pool_connection().await?;
        dsl::tenant
            .filter(dsl::time_deleted.is_null())
            .order(dsl::time_created.desc())
            .limit(1000)
            .select(Tenant::as_select())
            .load_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))
    }

    /// Lists tenants on the given server in the given state.  The worker's
    /// periodic loops (quota monitor, suspension reconciler, certificate
    /// retry) are scoped to locally hosted tenants through this call.
    pub async fn tenant_list_on_server(
        &self,
        server_id: Uuid,
        state: TenantState,
    ) -> ListResultVec<Tenant> {
        use crate::db::schema::tenant::dsl;
        let conn = self.pool_connection().await?;
        dsl::tenant
            .filter(dsl::server_id.eq(server_id))
            .filter(dsl::state.eq(state))
            .filter(dsl::time_deleted.is_null())
            .select(Tenant::as_select())
            .load_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))
    }

    /// Moves a tenant into `provisioning`.  Legal only from `pending` (first
    /// attempt) or `failed` (retry); anything else means the caller raced an
    /// administrative action and the job should be abandoned.
    pub async fn tenant_set_provisioning(
        &self,
        tenant_id: Uuid,
    ) -> UpdateResult<()> {
        use crate::db::schema::tenant::dsl;
        let conn = self.pool_connection().await?;
        let updated = diesel::update(dsl::tenant)
            .filter(dsl::id.eq(tenant_id))
            .filter(dsl::time_deleted.is_null())
            .filter(
                dsl::state
                    .eq_any(vec![TenantState::Pending, TenantState::Failed]),
            )
            .set((
                dsl::state.eq(TenantState::Provisioning),
                dsl::error_message.eq(None::<String>),
                dsl::time_modified.eq(Utc::now()),
            ))
            .execute_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        if updated == 0 {
            return Err(Error::conflict(format!(
                "tenant {} is not eligible for provisioning",
                tenant_id
            )));
        }
        Ok(())
    }

    /// Records which server the tenant was routed to.
    pub async fn tenant_set_assignment(
        &self,
        tenant_id: Uuid,
        server_id: Uuid,
    ) -> UpdateResult<()> {
        use crate::db::schema::tenant::dsl;
        let conn = self.pool_connection().await?;
        diesel::update(dsl::tenant)
            .filter(dsl::id.eq(tenant_id))
            .filter(dsl::time_deleted.is_null())
            .set((
                dsl::server_id.eq(server_id),
                dsl::time_modified.eq(Utc::now()),
            ))
            .execute_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        Ok(())
    }

    /// Maintains the denormalized copy of the tenant's port.  The
    /// authoritative binding lives in `port_assignment`.
    pub async fn tenant_set_port(
        &self,
        tenant_id: Uuid,
        port: Option<SqlU16>,
    ) -> UpdateResult<()> {
        use crate::db::schema::tenant::dsl;
        let conn = self.pool_connection().await?;
        diesel::update(dsl::tenant)
            .filter(dsl::id.eq(tenant_id))
            .filter(dsl::time_deleted.is_null())
            .set((dsl::port.eq(port), dsl::time_modified.eq(Utc::now())))
            .execute_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        Ok(())
    }

    /// Marks a tenant `active`, persisting its sealed credentials.  Legal
    /// only from `provisioning`.
    pub async fn tenant_set_active(
        &self,
        tenant_id: Uuid,
        sealed_credentials: String,
    ) -> UpdateResult<()> {
        use crate::db::schema::tenant::dsl;
        let conn = self.pool_connection().await?;
        let updated = diesel::update(dsl::tenant)
            .filter(dsl::id.eq(tenant_id))
            .filter(dsl::time_deleted.is_null())
            .filter(dsl::state.eq(TenantState::Provisioning))
            .set((
                dsl::state.eq(TenantState::Active),
                dsl::sealed_credentials.eq(sealed_credentials),
                dsl::error_message.eq(None::<String>),
                dsl::suspended_reason.eq(None::<String>),
                dsl::suspended_auto.eq(None::<bool>),
                dsl::time_suspended.eq(None::<chrono::DateTime<Utc>>),
                dsl::time_modified.eq(Utc::now()),
            ))
            .execute_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        if updated == 0 {
            return Err(Error::conflict(format!(
                "tenant {} was not provisioning",
                tenant_id
            )));
        }
        Ok(())
    }

    /// Marks a tenant `failed` with the durable error detail an operator will
    /// consult.  No state precondition: after a rollback the system prefers a
    /// clearly-failed tenant over a silently-stuck one.
    pub async fn tenant_set_failed(
        &self,
        tenant_id: Uuid,
        error_message: &str,
    ) -> UpdateResult<()> {
        use crate::db::schema::tenant::dsl;
        let conn = self.pool_connection().await?;
        diesel::update(dsl::tenant)
            .filter(dsl::id.eq(tenant_id))
            .filter(dsl::time_deleted.is_null())
            .set((
                dsl::state.eq(TenantState::Failed),
                dsl::error_message.eq(error_message.to_string()),
                dsl::time_modified.eq(Utc::now()),
            ))
            .execute_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        Ok(())
    }

    pub async fn tenant_suspend(
        &self,
        tenant_id: Uuid,
        reason: &str,
        auto: bool,
    ) -> UpdateResult<()> {
        use crate::db::schema::tenant::dsl;
        let conn = self.pool_connection().await?;
        let updated = diesel::update(dsl::tenant)
            .filter(dsl::id.eq(tenant_id))
            .filter(dsl::time_deleted.is_null())
            .filter(dsl::state.eq(TenantState::Active))
            .set((
                dsl::state.eq(TenantState::Suspended),
                dsl::suspended_reason.eq(reason.to_string()),
                dsl::suspended_auto.eq(auto),
                dsl::time_suspended.eq(Utc::now()),
                dsl::time_modified.eq(Utc::now()),
            ))
            .execute_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        if updated == 0 {
            return Err(Error::conflict(format!(
                "tenant {} is not active and cannot be suspended",
                tenant_id
            )));
        }
        Ok(())
    }

    pub async fn tenant_resume(&self, tenant_id: Uuid) -> UpdateResult<()> {
        use crate::db::schema::tenant::dsl;
        let conn = self.pool_connection().await?;
        let updated = diesel::update(dsl::tenant)
            .filter(dsl::id.eq(tenant_id))
            .filter(dsl::time_deleted.is_null())
            .filter(dsl::state.eq(TenantState::Suspended))
            .set((
                dsl::state.eq(TenantState::Active),
                dsl::suspended_reason.eq(None::<String>),
                dsl::suspended_auto.eq(None::<bool>),
                dsl::time_suspended.eq(None::<chrono::DateTime<Utc>>),
                dsl::time_modified.eq(Utc::now()),
            ))
            .execute_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        if updated == 0 {
            return Err(Error::conflict(format!(
                "tenant {} is not suspended and cannot be resumed",
                tenant_id
            )));
        }
        Ok(())
    }

    /// Soft-deletes a tenant record.  Callers must have torn down every
    /// backing resource first; the worker's teardown path is the only
    /// non-test caller.
    pub async fn tenant_soft_delete(&self, tenant_id: Uuid) -> DeleteResult {
        use crate::db::schema::tenant::dsl;
        let conn = self.pool_connection().await?;
        diesel::update(dsl::tenant)
            .filter(dsl::id.eq(tenant_id))
            .filter(dsl::time_deleted.is_null())
            .set((
                dsl::time_deleted.eq(Utc::now()),
                dsl::time_modified.eq(Utc::now()),
            ))
            .execute_async(&*conn)
            .await
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        Ok(())
    }
}
