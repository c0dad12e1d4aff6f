// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to the host's reverse proxy.
//!
//! One route file per tenant, at a deterministic path keyed by tenant id.
//! Activation is syntax-check-then-reload: a route that fails the check is
//! removed before any reload, so a syntactically invalid write is never
//! applied.

use super::run_command;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use emporos_common::api::external::Error;
use slog::Logger;
use std::time::Duration;
use uuid::Uuid;

/// Everything needed to route one tenant's domain to its environment.
#[derive(Clone, Debug)]
pub struct RouteSpec {
    pub tenant_id: Uuid,
    pub domain: String,
    pub port: u16,
}

#[async_trait]
pub trait ReverseProxy: Send + Sync {
    /// Install and activate the route.  Must not activate a route that fails
    /// the syntax check.
    async fn install_route(&self, route: &RouteSpec) -> Result<(), Error>;

    /// Remove the route.  Idempotent: removing an absent route is a no-op.
    async fn remove_route(&self, tenant_id: Uuid) -> Result<(), Error>;
}

/// Filesystem locations the rendered route refers to.
#[derive(Clone, Debug)]
pub struct ProxyPaths {
    /// directory of per-tenant route files included by the main proxy config
    pub sites_dir: Utf8PathBuf,
    /// directory receiving per-tenant access logs (bandwidth accounting
    /// reads these back)
    pub access_log_dir: Utf8PathBuf,
    /// webroot served for ACME http-01 challenges
    pub acme_webroot: Utf8PathBuf,
}

/// Renders the per-tenant server block.
///
/// Plaintext on purpose: certificate issuance is best-effort and the route
/// must remain reachable over plain HTTP when issuance has not (yet)
/// succeeded.  The ACME challenge location is what lets issuance complete
/// against this same route later.
pub fn render_route(route: &RouteSpec, paths: &ProxyPaths) -> String {
    format!(
        "# Managed by emporos; do not edit.  Tenant {tenant_id}.\n\
         server {{\n\
         \x20   listen 80;\n\
         \x20   server_name {domain};\n\
         \n\
         \x20   access_log {access_log_dir}/{tenant_id}.access.log;\n\
         \n\
         \x20   location /.well-known/acme-challenge/ {{\n\
         \x20       root {acme_webroot};\n\
         \x20   }}\n\
         \n\
         \x20   location / {{\n\
         \x20       proxy_pass http://127.0.0.1:{port};\n\
         \x20       proxy_set_header Host $host;\n\
         \x20       proxy_set_header X-Real-IP $remote_addr;\n\
         \x20       proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n\
         \x20   }}\n\
         }}\n",
        tenant_id = route.tenant_id,
        domain = route.domain,
        port = route.port,
        access_log_dir = paths.access_log_dir,
        acme_webroot = paths.acme_webroot,
    )
}

/// Reverse proxy implementation for an nginx-compatible proxy on this host.
pub struct NginxProxy {
    log: Logger,
    paths: ProxyPaths,
    check_command: Vec<String>,
    reload_command: Vec<String>,
    command_timeout: Duration,
}

impl NginxProxy {
    pub fn new(
        log: Logger,
        paths: ProxyPaths,
        check_command: Vec<String>,
        reload_command: Vec<String>,
    ) -> Self {
        NginxProxy {
            log,
            paths,
            check_command,
            reload_command,
            command_timeout: Duration::from_secs(30),
        }
    }

    fn route_path(&self, tenant_id: Uuid) -> Utf8PathBuf {
        self.paths.sites_dir.join(format!("{}.conf", tenant_id))
    }
}

#[async_trait]
impl ReverseProxy for NginxProxy {
    async fn install_route(&self, route: &RouteSpec) -> Result<(), Error> {
        let path = self.route_path(route.tenant_id);
        let contents = render_route(route, &self.paths);

        // Write-then-rename so the proxy never sees a half-written file on a
        // concurrent reload.
        let tmp_path = self.paths.sites_dir.join(format!(
            "{}.conf.tmp",
            route.tenant_id
        ));
        tokio::fs::write(&tmp_path, contents).await.map_err(|e| {
            Error::unavail(&format!(
                "failed to write route file {}: {}",
                tmp_path, e
            ))
        })?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            Error::unavail(&format!(
                "failed to move route file into place at {}: {}",
                path, e
            ))
        })?;

        if let Err(check_error) =
            run_command(&self.log, &self.check_command, self.command_timeout)
                .await
        {
            // The route failed validation.  Pull it back out before anything
            // reloads the proxy; the invalid config must never be applied.
            if let Err(remove_error) = tokio::fs::remove_file(&path).await {
                error!(
                    self.log,
                    "failed to remove route file that failed validation";
                    "path" => %path,
                    "error" => %remove_error,
                );
            }
            return Err(check_error);
        }

        run_command(&self.log, &self.reload_command, self.command_timeout)
            .await?;
        Ok(())
    }

    async fn remove_route(&self, tenant_id: Uuid) -> Result<(), Error> {
        let path = self.route_path(tenant_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(());
            }
            Err(e) => {
                return Err(Error::unavail(&format!(
                    "failed to remove route file {}: {}",
                    path, e
                )));
            }
        }
        run_command(&self.log, &self.reload_command, self.command_timeout)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_render_route() {
        let tenant_id = Uuid::new_v4();
        let route = RouteSpec {
            tenant_id,
            domain: "shop.example.com".to_string(),
            port: 8001,
        };
        let paths = ProxyPaths {
            sites_dir: "/etc/nginx/conf.d".into(),
            access_log_dir: "/var/log/emporos".into(),
            acme_webroot: "/var/www/acme".into(),
        };
        let rendered = render_route(&route, &paths);
        assert!(rendered.contains("server_name shop.example.com;"));
        assert!(rendered.contains("proxy_pass http://127.0.0.1:8001;"));
        assert!(rendered
            .contains(&format!("/var/log/emporos/{}.access.log", tenant_id)));
        assert!(rendered.contains("location /.well-known/acme-challenge/"));
        // The route listens for plaintext; TLS is activated separately once
        // issuance succeeds.
        assert!(rendered.contains("listen 80;"));
    }
}
