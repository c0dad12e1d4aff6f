// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP entrypoint functions for the controller's external API

use super::params;
use super::views;
use crate::context::ServerContext;
use crate::interfaces::backup::SnapshotId;
use dropshot::endpoint;
use dropshot::ApiDescription;
use dropshot::HttpError;
use dropshot::HttpResponseAccepted;
use dropshot::HttpResponseCreated;
use dropshot::HttpResponseOk;
use dropshot::HttpResponseUpdatedNoContent;
use dropshot::Path;
use dropshot::RequestContext;
use dropshot::TypedBody;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

type ApiContext = Arc<ServerContext>;

/// Returns a description of the external API.
pub fn external_api() -> ApiDescription<ApiContext> {
    fn register_endpoints(
        api: &mut ApiDescription<ApiContext>,
    ) -> Result<(), String> {
        api.register(tenant_list)?;
        api.register(tenant_create)?;
        api.register(tenant_view)?;
        api.register(tenant_delete)?;
        api.register(tenant_retry)?;
        api.register(tenant_suspend)?;
        api.register(tenant_resume)?;
        api.register(tenant_backup)?;
        api.register(tenant_restore)?;
        api.register(tenant_jobs)?;
        api.register(tenant_usage)?;
        api.register(tenant_alerts)?;
        api.register(server_list)?;
        api.register(fleet_status)?;
        Ok(())
    }

    let mut api = ApiDescription::new();
    if let Err(err) = register_endpoints(&mut api) {
        panic!("failed to register entrypoints: {}", err);
    }
    api
}

#[derive(Deserialize, JsonSchema)]
struct TenantPathParam {
    tenant_id: Uuid,
}

/// List tenants
#[endpoint {
    method = GET,
    path = "/tenants",
}]
async fn tenant_list(
    rqctx: RequestContext<ApiContext>,
) -> Result<HttpResponseOk<Vec<views::Tenant>>, HttpError> {
    let apictx = rqctx.context();
    let tenants = apictx.controller.tenant_list().await?;
    Ok(HttpResponseOk(tenants))
}

/// Intake: provision a new tenant store
///
/// Returns the accepted job id, or a typed rejection: a validation error, a
/// duplicate-identity error, or `AlreadyInFlight` — nothing is enqueued in
/// the rejection cases.
#[endpoint {
    method = POST,
    path = "/tenants",
}]
async fn tenant_create(
    rqctx: RequestContext<ApiContext>,
    new_tenant: TypedBody<params::TenantCreate>,
) -> Result<HttpResponseCreated<views::ProvisionAccepted>, HttpError> {
    let apictx = rqctx.context();
    let accepted =
        apictx.controller.tenant_provision(new_tenant.into_inner()).await?;
    Ok(HttpResponseCreated(accepted))
}

/// Fetch a tenant
#[endpoint {
    method = GET,
    path = "/tenants/{tenant_id}",
}]
async fn tenant_view(
    rqctx: RequestContext<ApiContext>,
    path_params: Path<TenantPathParam>,
) -> Result<HttpResponseOk<views::Tenant>, HttpError> {
    let apictx = rqctx.context();
    let tenant = apictx
        .controller
        .tenant_view(path_params.into_inner().tenant_id)
        .await?;
    Ok(HttpResponseOk(tenant))
}

/// Delete a tenant
///
/// Deletion is preceded by full resource teardown on the tenant's server;
/// the response carries the teardown job id when one was enqueued.
#[endpoint {
    method = DELETE,
    path = "/tenants/{tenant_id}",
}]
async fn tenant_delete(
    rqctx: RequestContext<ApiContext>,
    path_params: Path<TenantPathParam>,
) -> Result<HttpResponseAccepted<views::TeardownAccepted>, HttpError> {
    let apictx = rqctx.context();
    let accepted = apictx
        .controller
        .tenant_destroy(path_params.into_inner().tenant_id)
        .await?;
    Ok(HttpResponseAccepted(accepted))
}

/// Retry provisioning for a failed tenant
#[endpoint {
    method = POST,
    path = "/tenants/{tenant_id}/retry",
}]
async fn tenant_retry(
    rqctx: RequestContext<ApiContext>,
    path_params: Path<TenantPathParam>,
) -> Result<HttpResponseAccepted<views::ProvisionAccepted>, HttpError> {
    let apictx = rqctx.context();
    let accepted = apictx
        .controller
        .tenant_retry(path_params.into_inner().tenant_id)
        .await?;
    Ok(HttpResponseAccepted(accepted))
}

/// Suspend an active tenant
#[endpoint {
    method = POST,
    path = "/tenants/{tenant_id}/suspend",
}]
async fn tenant_suspend(
    rqctx: RequestContext<ApiContext>,
    path_params: Path<TenantPathParam>,
    body: TypedBody<params::TenantSuspend>,
) -> Result<HttpResponseUpdatedNoContent, HttpError> {
    let apictx = rqctx.context();
    apictx
        .controller
        .tenant_suspend(
            path_params.into_inner().tenant_id,
            &body.into_inner().reason,
        )
        .await?;
    Ok(HttpResponseUpdatedNoContent())
}

/// Resume a suspended tenant
#[endpoint {
    method = POST,
    path = "/tenants/{tenant_id}/resume",
}]
async fn tenant_resume(
    rqctx: RequestContext<ApiContext>,
    path_params: Path<TenantPathParam>,
) -> Result<HttpResponseUpdatedNoContent, HttpError> {
    let apictx = rqctx.context();
    apictx
        .controller
        .tenant_resume(path_params.into_inner().tenant_id)
        .await?;
    Ok(HttpResponseUpdatedNoContent())
}

/// Run the backup tool for a tenant
#[endpoint {
    method = POST,
    path = "/tenants/{tenant_id}/backup",
}]
async fn tenant_backup(
    rqctx: RequestContext<ApiContext>,
    path_params: Path<TenantPathParam>,
    body: TypedBody<params::BackupRequest>,
) -> Result<HttpResponseOk<views::Snapshot>, HttpError> {
    let apictx = rqctx.context();
    let snapshot = apictx
        .controller
        .tenant_backup(
            path_params.into_inner().tenant_id,
            body.into_inner().scope,
        )
        .await?;
    Ok(HttpResponseOk(views::Snapshot { snapshot: snapshot.0 }))
}

/// Run the restore tool for a tenant
#[endpoint {
    method = POST,
    path = "/tenants/{tenant_id}/restore",
}]
async fn tenant_restore(
    rqctx: RequestContext<ApiContext>,
    path_params: Path<TenantPathParam>,
    body: TypedBody<params::RestoreRequest>,
) -> Result<HttpResponseUpdatedNoContent, HttpError> {
    let apictx = rqctx.context();
    let body = body.into_inner();
    apictx
        .controller
        .tenant_restore(
            path_params.into_inner().tenant_id,
            body.scope,
            &SnapshotId(body.snapshot),
        )
        .await?;
    Ok(HttpResponseUpdatedNoContent())
}

/// List a tenant's provisioning jobs, newest first
#[endpoint {
    method = GET,
    path = "/tenants/{tenant_id}/jobs",
}]
async fn tenant_jobs(
    rqctx: RequestContext<ApiContext>,
    path_params: Path<TenantPathParam>,
) -> Result<HttpResponseOk<Vec<views::Job>>, HttpError> {
    let apictx = rqctx.context();
    let jobs = apictx
        .controller
        .tenant_jobs(path_params.into_inner().tenant_id)
        .await?;
    Ok(HttpResponseOk(jobs))
}

/// List a tenant's recent usage samples
#[endpoint {
    method = GET,
    path = "/tenants/{tenant_id}/usage",
}]
async fn tenant_usage(
    rqctx: RequestContext<ApiContext>,
    path_params: Path<TenantPathParam>,
) -> Result<HttpResponseOk<Vec<views::UsageSample>>, HttpError> {
    let apictx = rqctx.context();
    let samples = apictx
        .controller
        .tenant_usage(path_params.into_inner().tenant_id)
        .await?;
    Ok(HttpResponseOk(samples))
}

/// List a tenant's quota alerts, newest first
#[endpoint {
    method = GET,
    path = "/tenants/{tenant_id}/alerts",
}]
async fn tenant_alerts(
    rqctx: RequestContext<ApiContext>,
    path_params: Path<TenantPathParam>,
) -> Result<HttpResponseOk<Vec<views::QuotaAlert>>, HttpError> {
    let apictx = rqctx.context();
    let alerts = apictx
        .controller
        .tenant_alerts(path_params.into_inner().tenant_id)
        .await?;
    Ok(HttpResponseOk(alerts))
}

/// List worker servers with liveness and capacity
#[endpoint {
    method = GET,
    path = "/servers",
}]
async fn server_list(
    rqctx: RequestContext<ApiContext>,
) -> Result<HttpResponseOk<Vec<views::Server>>, HttpError> {
    let apictx = rqctx.context();
    let servers = apictx.controller.server_list().await?;
    Ok(HttpResponseOk(servers))
}

/// Aggregate fleet health for the status surface
#[endpoint {
    method = GET,
    path = "/fleet/status",
}]
async fn fleet_status(
    rqctx: RequestContext<ApiContext>,
) -> Result<HttpResponseOk<views::FleetStatus>, HttpError> {
    let apictx = rqctx.context();
    let status = apictx.controller.fleet_status().await?;
    Ok(HttpResponseOk(status))
}
