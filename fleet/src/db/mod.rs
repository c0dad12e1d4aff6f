// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities for working with the control plane database

pub mod datastore;
pub mod error;
pub mod model;
pub mod pool;
pub(crate) mod schema;

pub use datastore::DataStore;
pub use pool::Pool;

use serde::Deserialize;

/// Database configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// database connection string, e.g.
    /// `postgresql://emporos@127.0.0.1:5432/emporos`
    pub url: String,
}
