// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types shared by every component of the emporos control plane.
//!
//! Nothing in this crate touches the database or the network.  The types here
//! are the currency that the datastore, the provisioning pipeline, and the
//! HTTP surface all trade in.

pub mod api;
pub mod backoff;
