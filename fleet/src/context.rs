// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared state used by API request handlers

use crate::app::Controller;
use std::sync::Arc;

/// Shared state available to all API request handlers
pub struct ServerContext {
    pub controller: Arc<Controller>,
}

impl ServerContext {
    pub fn new(controller: Arc<Controller>) -> Self {
        ServerContext { controller }
    }
}
