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

//! Tracking of outstanding work that must finish before shutdown completes.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use tokio::sync::Notify;

/// The `CompletionCounter` allows async functions to wait until every handed
/// out [CompletionGuard] has been dropped.
pub struct CompletionCounter {
    outstanding: AtomicUsize,
    notify: Notify,
}

impl CompletionCounter {
    /// Return a new instance.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            outstanding: AtomicUsize::default(),
            notify: Notify::new(),
        })
    }

    /// Register a new unit of outstanding work.
    ///
    /// The work is considered done when the returned guard is dropped.
    pub fn guard(self: &Arc<Self>) -> CompletionGuard {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        CompletionGuard {
            counter: Arc::clone(self),
        }
    }

    /// Number of outstanding units of work.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Wait until there is no outstanding work.
    pub async fn wait_for_zero(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking to not miss a wakeup.
            notified.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn done(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }
}

/// Marks one unit of outstanding work in a [CompletionCounter].
pub struct CompletionGuard {
    counter: Arc<CompletionCounter>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.counter.done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_wait_without_work() {
        let counter = CompletionCounter::new();
        timeout(Duration::from_millis(100), counter.wait_for_zero())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_guards_dropped_in_other_tasks() {
        let counter = CompletionCounter::new();
        for i in 0..4u64 {
            let guard = counter.guard();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10 * i)).await;
                drop(guard);
            });
        }
        assert_eq!(counter.outstanding(), 4);
        timeout(Duration::from_secs(5), counter.wait_for_zero())
            .await
            .unwrap();
        assert_eq!(counter.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_reuse_after_drain() {
        let counter = CompletionCounter::new();
        drop(counter.guard());
        timeout(Duration::from_secs(5), counter.wait_for_zero())
            .await
            .unwrap();
        // A new round of work can start without resetting the counter
        let guard = counter.guard();
        assert!(
            timeout(Duration::from_millis(50), counter.wait_for_zero())
                .await
                .is_err()
        );
        drop(guard);
        timeout(Duration::from_secs(5), counter.wait_for_zero())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_blocks_while_outstanding() {
        let counter = CompletionCounter::new();
        let _guard = counter.guard();
        assert!(
            timeout(Duration::from_millis(50), counter.wait_for_zero())
                .await
                .is_err()
        );
    }
}
