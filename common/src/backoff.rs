// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Module providing utilities for retrying operations with exponential backoff.

use std::time::Duration;

pub use ::backoff::future::{retry, retry_notify};
pub use ::backoff::Error as BackoffError;
pub use ::backoff::{backoff::Backoff, ExponentialBackoff, Notify};

/// Return a backoff policy for querying internal services which may not be up
/// for a relatively long amount of time.
pub fn internal_service_policy() -> ::backoff::ExponentialBackoff {
    const INITIAL_INTERVAL: Duration = Duration::from_millis(250);
    const MAX_INTERVAL: Duration = Duration::from_secs(60);
    policy_with_max(INITIAL_INTERVAL, MAX_INTERVAL, None)
}

/// Return a backoff policy for polling a condition that is expected to become
/// true within `deadline`.  Once `deadline` has elapsed the retry loop gives
/// up and surfaces the last error to the caller.
pub fn poll_policy(
    poll_interval: Duration,
    deadline: Duration,
) -> ::backoff::ExponentialBackoff {
    policy_with_max(poll_interval, poll_interval * 4, Some(deadline))
}

fn policy_with_max(
    initial_interval: Duration,
    max_interval: Duration,
    max_elapsed_time: Option<Duration>,
) -> ::backoff::ExponentialBackoff {
    let current_interval = initial_interval;
    ::backoff::ExponentialBackoff {
        current_interval,
        initial_interval,
        multiplier: 2.0,
        max_interval,
        max_elapsed_time,
        ..::backoff::ExponentialBackoff::default()
    }
}
