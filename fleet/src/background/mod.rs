// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background tasks and the driver that periodically activates them

mod driver;
pub mod tasks;

pub use driver::BackgroundTask;
pub use driver::Driver;
pub use driver::LastResult;
pub use driver::TaskName;
