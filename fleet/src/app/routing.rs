// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Target-server selection for new tenants
//!
//! A server is eligible only when all three hold: its declared status is
//! `active`, its heartbeat is fresh (liveness gates routing — declared
//! status alone is never enough), and its resource-holding tenant count is
//! below its declared maximum.  Among eligible servers the least-loaded one
//! wins; a caller-supplied hint is honored when the hinted server is itself
//! eligible.

use crate::db::model::{Server, ServerStatus};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

pub fn pick_server<'a>(
    servers: &'a [Server],
    tenant_counts: &BTreeMap<Uuid, i64>,
    now: DateTime<Utc>,
    liveness_window: chrono::Duration,
    hint: Option<&str>,
) -> Option<&'a Server> {
    let count_of =
        |server: &Server| tenant_counts.get(&server.id).copied().unwrap_or(0);
    let eligible = |server: &Server| {
        server.status == ServerStatus::Active
            && server.is_live(now, liveness_window)
            && count_of(server) < i64::from(server.max_tenants)
    };

    if let Some(hint) = hint {
        if let Some(hinted) =
            servers.iter().find(|server| server.name == hint)
        {
            if eligible(hinted) {
                return Some(hinted);
            }
            // An ineligible hint falls through to normal selection rather
            // than failing the request.
        }
    }

    servers
        .iter()
        .filter(|server| eligible(server))
        .min_by_key(|server| (count_of(server), server.name.clone()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::model::{ServerUpdate, SqlU16};
    use chrono::Duration;

    fn make_server(
        name: &str,
        max_tenants: i32,
        heartbeat_age_secs: i64,
        status: ServerStatus,
        now: DateTime<Utc>,
    ) -> Server {
        let mut server = ServerUpdate::new(
            name.to_string(),
            "192.0.2.10:12701".to_string(),
            8000,
            8099,
            max_tenants,
        )
        .into_insertable();
        server.status = status;
        server.last_heartbeat = now - Duration::seconds(heartbeat_age_secs);
        server
    }

    fn window() -> Duration {
        Duration::seconds(45)
    }

    #[test]
    fn test_stale_heartbeat_excludes_server() {
        let now = Utc::now();
        // Declared active, but the heartbeat is past the freshness window:
        // never routed to.
        let servers =
            vec![make_server("a", 10, 120, ServerStatus::Active, now)];
        let counts = BTreeMap::new();
        assert!(
            pick_server(&servers, &counts, now, window(), None).is_none()
        );
    }

    #[test]
    fn test_declared_status_gates_routing() {
        let now = Utc::now();
        let servers = vec![
            make_server("a", 10, 1, ServerStatus::Maintenance, now),
            make_server("b", 10, 1, ServerStatus::Offline, now),
        ];
        let counts = BTreeMap::new();
        assert!(
            pick_server(&servers, &counts, now, window(), None).is_none()
        );
    }

    #[test]
    fn test_capacity_limit_excludes_full_server() {
        let now = Utc::now();
        let servers = vec![
            make_server("full", 2, 1, ServerStatus::Active, now),
            make_server("free", 2, 1, ServerStatus::Active, now),
        ];
        let mut counts = BTreeMap::new();
        counts.insert(servers[0].id, 2);
        counts.insert(servers[1].id, 1);
        let picked =
            pick_server(&servers, &counts, now, window(), None).unwrap();
        assert_eq!(picked.name, "free");
    }

    #[test]
    fn test_least_loaded_wins() {
        let now = Utc::now();
        let servers = vec![
            make_server("a", 10, 1, ServerStatus::Active, now),
            make_server("b", 10, 1, ServerStatus::Active, now),
        ];
        let mut counts = BTreeMap::new();
        counts.insert(servers[0].id, 5);
        counts.insert(servers[1].id, 2);
        let picked =
            pick_server(&servers, &counts, now, window(), None).unwrap();
        assert_eq!(picked.name, "b");
    }

    #[test]
    fn test_hint_honored_when_eligible() {
        let now = Utc::now();
        let servers = vec![
            make_server("a", 10, 1, ServerStatus::Active, now),
            make_server("b", 10, 1, ServerStatus::Active, now),
        ];
        let mut counts = BTreeMap::new();
        counts.insert(servers[0].id, 0);
        counts.insert(servers[1].id, 9);
        // "b" is far more loaded, but the hint asks for it explicitly.
        let picked =
            pick_server(&servers, &counts, now, window(), Some("b")).unwrap();
        assert_eq!(picked.name, "b");
    }

    #[test]
    fn test_stale_hint_falls_through() {
        let now = Utc::now();
        let servers = vec![
            make_server("a", 10, 1, ServerStatus::Active, now),
            make_server("b", 10, 300, ServerStatus::Active, now),
        ];
        let counts = BTreeMap::new();
        let picked =
            pick_server(&servers, &counts, now, window(), Some("b")).unwrap();
        assert_eq!(picked.name, "a");
    }

    #[test]
    fn test_port_range_accessor() {
        let now = Utc::now();
        let server = make_server("a", 10, 1, ServerStatus::Active, now);
        assert_eq!(server.port_range_first, SqlU16(8000));
        assert_eq!(server.port_range().count(), 100);
    }
}
