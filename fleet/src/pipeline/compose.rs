// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Rendering of the per-tenant runtime definition (compose file)
//!
//! The definition is derived entirely from the tenant's platform, plan, and
//! allocated port, so re-rendering is idempotent: the same inputs always
//! produce the same file.

use crate::secrets::TenantCredentials;
use emporos_common::api::external::{PlanLimits, StorePlatform};
use std::fmt::Write;
use uuid::Uuid;

/// Container images and wiring for one platform.
struct PlatformRuntime {
    app_image: &'static str,
    /// port the storefront container listens on
    app_port: u16,
    db_image: &'static str,
    /// environment variables for the app container; `{user}`, `{password}`
    /// and `{name}` refer to the database credentials/name
    app_env: &'static [(&'static str, &'static str)],
    db_env: &'static [(&'static str, &'static str)],
}

const DB_NAME: &str = "store";

fn platform_runtime(platform: StorePlatform) -> PlatformRuntime {
    match platform {
        StorePlatform::Woocommerce => PlatformRuntime {
            app_image: "wordpress:6.4-apache",
            app_port: 80,
            db_image: "mariadb:11",
            app_env: &[
                ("WORDPRESS_DB_HOST", "db"),
                ("WORDPRESS_DB_USER", "{user}"),
                ("WORDPRESS_DB_PASSWORD", "{password}"),
                ("WORDPRESS_DB_NAME", "{name}"),
            ],
            db_env: &[
                ("MARIADB_RANDOM_ROOT_PASSWORD", "yes"),
                ("MARIADB_DATABASE", "{name}"),
                ("MARIADB_USER", "{user}"),
                ("MARIADB_PASSWORD", "{password}"),
            ],
        },
        StorePlatform::Prestashop => PlatformRuntime {
            app_image: "prestashop/prestashop:8-apache",
            app_port: 80,
            db_image: "mariadb:11",
            app_env: &[
                ("DB_SERVER", "db"),
                ("DB_USER", "{user}"),
                ("DB_PASSWD", "{password}"),
                ("DB_NAME", "{name}"),
            ],
            db_env: &[
                ("MARIADB_RANDOM_ROOT_PASSWORD", "yes"),
                ("MARIADB_DATABASE", "{name}"),
                ("MARIADB_USER", "{user}"),
                ("MARIADB_PASSWORD", "{password}"),
            ],
        },
        StorePlatform::Medusa => PlatformRuntime {
            app_image: "medusajs/medusa:latest",
            app_port: 9000,
            db_image: "postgres:16",
            app_env: &[(
                "DATABASE_URL",
                "postgres://{user}:{password}@db:5432/{name}",
            )],
            db_env: &[
                ("POSTGRES_DB", "{name}"),
                ("POSTGRES_USER", "{user}"),
                ("POSTGRES_PASSWORD", "{password}"),
            ],
        },
    }
}

fn substitute(template: &str, credentials: &TenantCredentials) -> String {
    template
        .replace("{user}", &credentials.db_user)
        .replace("{password}", &credentials.db_password)
        .replace("{name}", DB_NAME)
}

/// Renders the compose definition for one tenant environment.  The listen
/// address is loopback-only: the reverse proxy is the sole public entry
/// point.
pub fn render_compose(
    tenant_id: Uuid,
    platform: StorePlatform,
    limits: &PlanLimits,
    port: u16,
    credentials: &TenantCredentials,
) -> String {
    let runtime = platform_runtime(platform);
    let cpus = format!("{:.2}", limits.cpu_millis as f64 / 1000.0);
    let mut out = String::new();

    writeln!(out, "# Managed by emporos; do not edit.  Tenant {}.", tenant_id)
        .unwrap();
    writeln!(out, "services:").unwrap();

    writeln!(out, "  store:").unwrap();
    writeln!(out, "    image: {}", runtime.app_image).unwrap();
    writeln!(out, "    restart: unless-stopped").unwrap();
    writeln!(out, "    depends_on:").unwrap();
    writeln!(out, "      - db").unwrap();
    writeln!(out, "    ports:").unwrap();
    writeln!(out, "      - \"127.0.0.1:{}:{}\"", port, runtime.app_port)
        .unwrap();
    writeln!(out, "    environment:").unwrap();
    for (key, value) in runtime.app_env {
        writeln!(out, "      {}: \"{}\"", key, substitute(value, credentials))
            .unwrap();
    }
    writeln!(out, "    volumes:").unwrap();
    writeln!(out, "      - store-data:/var/www/html").unwrap();
    writeln!(out, "    mem_limit: {}m", limits.memory_mib).unwrap();
    writeln!(out, "    cpus: {}", cpus).unwrap();

    writeln!(out, "  db:").unwrap();
    writeln!(out, "    image: {}", runtime.db_image).unwrap();
    writeln!(out, "    restart: unless-stopped").unwrap();
    writeln!(out, "    environment:").unwrap();
    for (key, value) in runtime.db_env {
        writeln!(out, "      {}: \"{}\"", key, substitute(value, credentials))
            .unwrap();
    }
    writeln!(out, "    volumes:").unwrap();
    writeln!(out, "      - db-data:/var/lib/store-db").unwrap();
    writeln!(out, "    mem_limit: {}m", limits.memory_mib).unwrap();
    writeln!(out, "    cpus: {}", cpus).unwrap();

    writeln!(out, "volumes:").unwrap();
    writeln!(out, "  store-data:").unwrap();
    writeln!(out, "  db-data:").unwrap();

    out
}

#[cfg(test)]
mod test {
    use super::*;
    use emporos_common::api::external::PlanTier;

    #[test]
    fn test_render_injects_port_and_limits() {
        let credentials = TenantCredentials::generate();
        let limits = PlanTier::Starter.limits();
        let rendered = render_compose(
            Uuid::new_v4(),
            StorePlatform::Woocommerce,
            &limits,
            8001,
            &credentials,
        );
        assert!(rendered.contains("\"127.0.0.1:8001:80\""));
        assert!(rendered.contains("mem_limit: 1024m"));
        assert!(rendered.contains("cpus: 1.00"));
        assert!(rendered
            .contains(&format!("WORDPRESS_DB_PASSWORD: \"{}\"",
                credentials.db_password)));
    }

    #[test]
    fn test_render_is_deterministic() {
        let credentials = TenantCredentials::generate();
        let limits = PlanTier::Premium.limits();
        let tenant_id = Uuid::new_v4();
        let a = render_compose(
            tenant_id,
            StorePlatform::Medusa,
            &limits,
            8100,
            &credentials,
        );
        let b = render_compose(
            tenant_id,
            StorePlatform::Medusa,
            &limits,
            8100,
            &credentials,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_medusa_uses_postgres() {
        let credentials = TenantCredentials::generate();
        let limits = PlanTier::Standard.limits();
        let rendered = render_compose(
            Uuid::new_v4(),
            StorePlatform::Medusa,
            &limits,
            9001,
            &credentials,
        );
        assert!(rendered.contains("image: postgres:16"));
        assert!(rendered.contains("\"127.0.0.1:9001:9000\""));
    }
}
