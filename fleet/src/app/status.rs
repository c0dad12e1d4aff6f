// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fleet health for the external status surface
//!
//! Health is derived from the same heartbeat signal that gates routing.  The
//! one addition is a fallback active probe: when a server's heartbeat is
//! stale we attempt a direct TCP reachability check, so a crashed heartbeat
//! writer on an otherwise-running host does not silently read as dead — and
//! a dead host does not read as healthy merely because its row says
//! `active`.

use super::Controller;
use crate::db::model::Server;
use crate::external_api::views;
use chrono::Utc;
use emporos_common::api::external::Error;
use std::collections::BTreeMap;
use uuid::Uuid;

impl Controller {
    pub async fn fleet_status(&self) -> Result<views::FleetStatus, Error> {
        let now = Utc::now();
        let servers = self.datastore().server_list().await?;
        let counts = self.datastore().server_tenant_counts().await?;

        let mut server_views = Vec::with_capacity(servers.len());
        for server in &servers {
            server_views
                .push(self.server_status_view(server, &counts, now).await);
        }

        let total_servers = server_views.len();
        let healthy_servers = server_views
            .iter()
            .filter(|view| view.live || view.probe_reachable == Some(true))
            .count();
        // Servers an operator has deliberately taken out of service don't
        // make the fleet "degraded"; dead ones that should be serving do.
        let degraded = server_views.iter().any(|view| {
            view.status == emporos_common::api::external::ServerStatus::Active
                && !view.live
                && view.probe_reachable != Some(true)
        });

        Ok(views::FleetStatus {
            servers: server_views,
            total_servers,
            healthy_servers,
            degraded,
        })
    }

    pub async fn server_list(&self) -> Result<Vec<views::Server>, Error> {
        Ok(self.fleet_status().await?.servers)
    }

    async fn server_status_view(
        &self,
        server: &Server,
        counts: &BTreeMap<Uuid, i64>,
        now: chrono::DateTime<Utc>,
    ) -> views::Server {
        let live = server.is_live(now, self.liveness_window);
        // The probe is a fallback only: heartbeat data is authoritative
        // while fresh.
        let probe_reachable = if live {
            None
        } else {
            Some(self.probe_server(server).await)
        };
        views::Server {
            id: server.id,
            name: server.name.clone(),
            address: server.address.clone(),
            status: server.status.into(),
            live,
            probe_reachable,
            tenants: counts.get(&server.id).copied().unwrap_or(0),
            max_tenants: server.max_tenants,
            port_range_first: server.port_range_first.into(),
            port_range_last: server.port_range_last.into(),
            last_heartbeat: server.last_heartbeat,
        }
    }

    /// Direct reachability check against the worker's registered address.
    async fn probe_server(&self, server: &Server) -> bool {
        let connect = tokio::net::TcpStream::connect(server.address.clone());
        match tokio::time::timeout(self.probe_timeout, connect).await {
            Ok(Ok(_)) => {
                // Reachable but not heartbeating: report it, loudly enough
                // for an operator to notice the wedged heartbeat writer.
                warn!(
                    self.log,
                    "server is reachable but its heartbeat is stale";
                    "server" => &server.name,
                    "address" => &server.address,
                );
                true
            }
            _ => {
                debug!(
                    self.log,
                    "server reachability probe failed";
                    "server" => &server.name,
                    "address" => &server.address,
                );
                false
            }
        }
    }
}
