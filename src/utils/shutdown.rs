/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// One-way flag threads can sleep on, set once on shutdown.
#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (triggered, cond) = &*self.inner;
        *triggered.lock().unwrap() = true;
        cond.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock().unwrap()
    }

    /// Sleeps for `timeout` unless triggered first. Returns whether the flag
    /// is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (triggered, cond) = &*self.inner;
        let mut triggered = triggered.lock().unwrap();
        while !*triggered {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            triggered = cond.wait_timeout(triggered, deadline - now).unwrap().0;
        }
        *triggered
    }
}
