// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementations of specific background tasks

pub mod cert_retry;
pub mod heartbeat;
pub mod job_reaper;
pub mod quota_monitor;
pub mod reconciler;
