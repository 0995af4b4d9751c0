/*
    Copyright 2025 MydriaTech AB

    Licensed under the Apache License 2.0 with Free world makers exception
    1.0.0 (the "License"); you may not use this file except in compliance with
    the License. You should have obtained a copy of the License with the source
    or binary distribution in file named

        LICENSE-Apache-2.0-with-FWM-Exception-1.0.0

    Unless required by applicable law or agreed to in writing, software
    distributed under the License is distributed on an "AS IS" BASIS,
    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
    See the License for the specific language governing permissions and
    limitations under the License.
*/

//! Bounded retries with a fixed delay.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of [retry_with_fixed_delay].
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// An attempt succeeded.
    Done(T),
    /// Every attempt failed. Holds the error of the last attempt.
    Exhausted(E),
    /// Cancelled before an attempt succeeded.
    Cancelled,
}

/// Run `operation` up to `attempts` times with `delay` between attempts.
///
/// Waiting between attempts ends early on cancellation.
pub async fn retry_with_fixed_delay<T, E, F, Fut>(
    attempts: u32,
    delay: Duration,
    cancellation_token: &CancellationToken,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        if cancellation_token.is_cancelled() {
            return RetryOutcome::Cancelled;
        }
        attempt += 1;
        let res = tokio::select! {
            _ = cancellation_token.cancelled() => return RetryOutcome::Cancelled,
            res = operation() => res,
        };
        match res {
            Ok(value) => return RetryOutcome::Done(value),
            Err(e) if attempt >= attempts => return RetryOutcome::Exhausted(e),
            Err(e) => {
                log::debug!("Attempt {attempt}/{attempts} failed: {e}");
                tokio::select! {
                    _ = cancellation_token.cancelled() => return RetryOutcome::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
