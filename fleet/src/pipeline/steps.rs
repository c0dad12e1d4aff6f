// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The provisioning steps, in their fixed execution order
//!
//! Each step is individually idempotent; see the notes on each for how it
//! copes with leftovers from a previous attempt.

use super::compose::render_compose;
use super::{ProvisionContext, Step, StepMode};
use crate::interfaces::notify::ProvisionedNotice;
use crate::interfaces::proxy::RouteSpec;
use crate::secrets;
use crate::secrets::TenantCredentials;
use async_trait::async_trait;
use emporos_common::api::external::{Error, StorePlatform};
use emporos_common::backoff;
use std::sync::Arc;

/// The pipeline, in order.  This table is the single source of truth for
/// what provisioning does.
pub fn provision_steps() -> Vec<Arc<dyn Step<ProvisionContext>>> {
    vec![
        Arc::new(WorkspaceStep),
        Arc::new(CredentialsStep),
        Arc::new(PortStep),
        Arc::new(ComposeStep),
        Arc::new(RuntimeStep),
        Arc::new(ProxyStep),
        Arc::new(CertificateStep),
        Arc::new(HealthStep),
        Arc::new(FinalizeStep),
        Arc::new(NotifyStep),
    ]
}

fn io_unavail(what: &str, err: std::io::Error) -> Error {
    Error::unavail(&format!("{}: {}", what, err))
}

/// Step 1: ensure the tenant workspace exists.
///
/// A leftover workspace from a partial attempt is not an error: any running
/// containers are torn down first and the directory is reused.  There is no
/// undo — on rollback the workspace is deliberately left behind for forensic
/// inspection (the next retry cleans it).
struct WorkspaceStep;

#[async_trait]
impl Step<ProvisionContext> for WorkspaceStep {
    fn name(&self) -> &'static str {
        "workspace"
    }

    async fn execute(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        let workspace = ctx.workspace_dir();
        if tokio::fs::metadata(&workspace).await.is_ok() {
            info!(
                ctx.log,
                "workspace already exists; tearing down leftover containers";
                "workspace" => %workspace,
            );
            ctx.runtime.destroy(&ctx.environment_spec()).await?;
        }
        tokio::fs::create_dir_all(workspace.join("logs"))
            .await
            .map_err(|e| io_unavail("failed to create tenant workspace", e))?;
        Ok(())
    }
}

/// Step 2: generate credentials.
///
/// Regenerated on every attempt — credentials from a failed attempt may have
/// leaked into logs and are never reused.
struct CredentialsStep;

#[async_trait]
impl Step<ProvisionContext> for CredentialsStep {
    fn name(&self) -> &'static str {
        "credentials"
    }

    async fn execute(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        ctx.set_credentials(TenantCredentials::generate());
        Ok(())
    }
}

/// Step 3: allocate a port.
///
/// The datastore returns the tenant's existing assignment when it already
/// holds one on this server, so a retry reuses its port.
struct PortStep;

#[async_trait]
impl Step<ProvisionContext> for PortStep {
    fn name(&self) -> &'static str {
        "port"
    }

    async fn execute(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        let assignment =
            ctx.datastore.port_allocate(&ctx.server, ctx.tenant.id).await?;
        ctx.set_port(assignment.port.into());
        ctx.datastore
            .tenant_set_port(ctx.tenant.id, Some(assignment.port))
            .await?;
        Ok(())
    }

    async fn undo(&self, ctx: &ProvisionContext) -> Result<(), anyhow::Error> {
        ctx.datastore.port_release_for_tenant(ctx.tenant.id).await?;
        ctx.datastore.tenant_set_port(ctx.tenant.id, None).await?;
        Ok(())
    }
}

/// Step 4: render the runtime definition with per-plan ceilings injected.
struct ComposeStep;

#[async_trait]
impl Step<ProvisionContext> for ComposeStep {
    fn name(&self) -> &'static str {
        "compose"
    }

    async fn execute(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        let env = ctx.environment_spec();
        let plan: emporos_common::api::external::PlanTier =
            ctx.tenant.plan.into();
        let platform: StorePlatform = ctx.tenant.platform.into();
        let rendered = render_compose(
            ctx.tenant.id,
            platform,
            &plan.limits(),
            ctx.port()?,
            ctx.credentials()?,
        );
        // Write-then-rename keeps a crashed worker from leaving a truncated
        // definition for the next attempt to trip over.
        let tmp = env.compose_file.with_extension("yml.tmp");
        tokio::fs::write(&tmp, rendered)
            .await
            .map_err(|e| io_unavail("failed to write compose file", e))?;
        tokio::fs::rename(&tmp, &env.compose_file)
            .await
            .map_err(|e| io_unavail("failed to move compose file", e))?;
        Ok(())
    }
}

/// Step 5: start the runtime environment.
///
/// This is the idempotency linchpin: containers from a previous attempt are
/// stopped and removed — including their volumes — before the fresh start,
/// so exactly one environment exists afterward no matter how many attempts
/// came before.
struct RuntimeStep;

#[async_trait]
impl Step<ProvisionContext> for RuntimeStep {
    fn name(&self) -> &'static str {
        "runtime"
    }

    async fn execute(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        let env = ctx.environment_spec();
        ctx.runtime.destroy(&env).await?;
        ctx.runtime.ensure_up(&env).await
    }

    async fn undo(&self, ctx: &ProvisionContext) -> Result<(), anyhow::Error> {
        ctx.runtime.destroy(&ctx.environment_spec()).await?;
        Ok(())
    }
}

/// Step 6: configure the reverse-proxy route.
///
/// The proxy implementation syntax-checks the generated route before
/// activating it; a route that fails the check is never applied.
struct ProxyStep;

#[async_trait]
impl Step<ProvisionContext> for ProxyStep {
    fn name(&self) -> &'static str {
        "proxy"
    }

    async fn execute(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        ctx.proxy
            .install_route(&RouteSpec {
                tenant_id: ctx.tenant.id,
                domain: ctx.tenant.domain.clone(),
                port: ctx.port()?,
            })
            .await
    }

    async fn undo(&self, ctx: &ProvisionContext) -> Result<(), anyhow::Error> {
        ctx.proxy.remove_route(ctx.tenant.id).await?;
        Ok(())
    }
}

/// Step 7: attempt certificate issuance.  Best-effort: on failure the route
/// stays reachable over plaintext and the worker's certificate-retry cycle
/// picks the domain up later.
struct CertificateStep;

#[async_trait]
impl Step<ProvisionContext> for CertificateStep {
    fn name(&self) -> &'static str {
        "certificate"
    }

    fn mode(&self) -> StepMode {
        StepMode::BestEffort
    }

    async fn execute(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        ctx.certificates.ensure_certificate(&ctx.tenant.domain).await
    }
}

/// Step 8: poll the environment's health surface, bounded by the configured
/// deadline.  Exhausting the deadline is fatal and triggers rollback.
struct HealthStep;

#[async_trait]
impl Step<ProvisionContext> for HealthStep {
    fn name(&self) -> &'static str {
        "health"
    }

    async fn execute(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        let env = ctx.environment_spec();
        let port = ctx.port()?;
        let policy = backoff::poll_policy(
            ctx.health_poll_interval,
            ctx.health_timeout,
        );
        let runtime = &ctx.runtime;
        let env = &env;
        let log = &ctx.log;
        backoff::retry_notify(
            policy,
            || async move {
                runtime
                    .check_health(env, port)
                    .await
                    .map_err(backoff::BackoffError::transient)
            },
            |error, delay| {
                debug!(
                    log,
                    "environment not healthy yet";
                    "error" => %error,
                    "retry_after" => ?delay,
                );
            },
        )
        .await
        .map_err(|last_error| {
            Error::unavail(&format!(
                "environment failed to become healthy within {:?}: {}",
                ctx.health_timeout, last_error
            ))
        })?;
        Ok(())
    }
}

/// Step 9: persist the quota grant and sealed credentials and mark the
/// tenant active.
struct FinalizeStep;

#[async_trait]
impl Step<ProvisionContext> for FinalizeStep {
    fn name(&self) -> &'static str {
        "finalize"
    }

    async fn execute(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        ctx.datastore
            .quota_ensure(ctx.tenant.id, ctx.tenant.plan.into())
            .await?;
        let sealed = secrets::seal_credentials(
            &ctx.master_key,
            &ctx.tenant.id,
            ctx.credentials()?,
        )?;
        ctx.datastore.tenant_set_active(ctx.tenant.id, sealed).await
    }

    async fn undo(&self, ctx: &ProvisionContext) -> Result<(), anyhow::Error> {
        ctx.datastore.quota_release(ctx.tenant.id).await?;
        Ok(())
    }
}

/// Step 10: dispatch the completion notification.  Fire-and-forget: failure
/// is logged at the executor boundary and never rolls back provisioning.
struct NotifyStep;

#[async_trait]
impl Step<ProvisionContext> for NotifyStep {
    fn name(&self) -> &'static str {
        "notify"
    }

    fn mode(&self) -> StepMode {
        StepMode::BestEffort
    }

    async fn execute(&self, ctx: &ProvisionContext) -> Result<(), Error> {
        let credentials = ctx.credentials()?;
        let platform: StorePlatform = ctx.tenant.platform.into();
        let admin_path = match platform {
            StorePlatform::Woocommerce => "wp-admin",
            StorePlatform::Prestashop => "admin",
            StorePlatform::Medusa => "app",
        };
        ctx.notifier
            .notify_provisioned(&ProvisionedNotice {
                tenant_id: ctx.tenant.id,
                store_url: format!("http://{}/", ctx.tenant.domain),
                admin_url: format!(
                    "http://{}/{}/",
                    ctx.tenant.domain, admin_path
                ),
                admin_user: credentials.admin_user.clone(),
                admin_password: credentials.admin_password.clone(),
            })
            .await
    }
}
