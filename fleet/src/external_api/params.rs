// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Params define the request bodies of HTTP endpoints for creating and
//! modifying resources.

use crate::interfaces::backup::BackupScope;
use emporos_common::api::external::{
    DomainName, Name, PlanTier, StorePlatform,
};
use schemars::JsonSchema;
use serde::Deserialize;

/// Intake request: provision a new tenant store.
///
/// Malformed names and domains are rejected during deserialization, before
/// anything is recorded or enqueued.
#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct TenantCreate {
    pub name: Name,
    pub domain: DomainName,
    pub platform: StorePlatform,
    pub plan: PlanTier,
    /// optional target-server hint; honored when that server is live with
    /// free capacity
    #[serde(default)]
    pub server: Option<Name>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct TenantSuspend {
    pub reason: String,
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct BackupRequest {
    pub scope: BackupScope,
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct RestoreRequest {
    pub scope: BackupScope,
    pub snapshot: String,
}
