// This file is part of TRINCI.
//
// Copyright (C) 2021 Affidaty Spa.
//
// TRINCI is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TRINCI is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TRINCI. If not, see <https://www.gnu.org/licenses/>.

//! Background loops.
//!
//! Every periodic activity of the node is a `Task`: the runner calls `tick`
//! and sleeps for the returned duration. A failed tick is logged and retried
//! after `TASK_ERROR_RETRY`. Stopping cancels the loop at its next await
//! point, so cancellation never surfaces as a tick error.

use crate::Result;
use async_std::task::{self, JoinHandle};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

/// Wait before retrying a failed tick.
pub const TASK_ERROR_RETRY: Duration = Duration::from_secs(1);

#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> String;

    /// Runs one iteration. Returns the time to wait before the next one.
    async fn tick(&self) -> Result<Duration>;
}

/// Handle of a running task.
pub struct TaskHandle {
    name: String,
    handle: Option<JoinHandle<()>>,
}

/// Starts `task` on the async-std executor.
pub fn spawn(task: Arc<dyn Task>) -> TaskHandle {
    let name = task.name();
    debug!("Starting {} task", name);
    let handle = task::spawn(async move {
        loop {
            let wait = match task.tick().await {
                Ok(wait) => wait,
                Err(err) => {
                    error!("{} task error: {}", task.name(), err.to_string_full());
                    TASK_ERROR_RETRY
                }
            };
            task::sleep(wait).await;
        }
    });
    TaskHandle {
        name,
        handle: Some(handle),
    }
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancels the loop and waits for it to be dropped.
    pub async fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.cancel().await;
            debug!("{} task stopped", self.name);
        }
    }

    pub fn stop_sync(self) {
        task::block_on(self.stop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, ErrorKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountTask {
        count: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Task for CountTask {
        fn name(&self) -> String {
            "count".to_string()
        }

        async fn tick(&self) -> Result<Duration> {
            self.count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::new_ext(ErrorKind::Other, "boom"));
            }
            Ok(Duration::from_millis(10))
        }
    }

    fn create_task(fail: bool) -> Arc<CountTask> {
        Arc::new(CountTask {
            count: AtomicUsize::new(0),
            fail,
        })
    }

    #[test]
    fn ticks_until_stopped() {
        let count = create_task(false);
        let handle = spawn(count.clone());
        assert_eq!(handle.name(), "count");

        std::thread::sleep(Duration::from_millis(200));
        handle.stop_sync();
        let stopped_at = count.count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(100));

        assert!(stopped_at > 2);
        assert_eq!(count.count.load(Ordering::SeqCst), stopped_at);
    }

    #[test]
    fn failed_tick_backs_off() {
        let count = create_task(true);
        let handle = spawn(count.clone());

        std::thread::sleep(Duration::from_millis(500));
        handle.stop_sync();

        assert_eq!(count.count.load(Ordering::SeqCst), 1);
    }
}
