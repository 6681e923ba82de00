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

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use public::counter::{Counter, CounterType, CounterValue, RefCountable};
use public::queue::{self, Receiver};

use crate::common::{FlowKey, FlowRecord};
use crate::config::Config;
use crate::store::{CounterStore, StoreConnector};
use crate::utils::{backoff::Backoff, shutdown::Shutdown};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerStatus {
    Running = 0,
    Finished = 1,
    // gave up after too many consecutive store failures
    Failed = 2,
}

impl From<u8> for WorkerStatus {
    fn from(v: u8) -> Self {
        match v {
            1 => WorkerStatus::Finished,
            2 => WorkerStatus::Failed,
            _ => WorkerStatus::Running,
        }
    }
}

#[derive(Default)]
pub struct WorkerCounter {
    pub rx: AtomicU64,
    pub increments: AtomicU64,
    pub bytes: AtomicU64,
    pub store_errors: AtomicU64,
    pub reconnects: AtomicU64,
    pub dropped_records: AtomicU64,
    pub dropped_bytes: AtomicU64,
    status: AtomicU8,
}

impl WorkerCounter {
    pub fn status(&self) -> WorkerStatus {
        self.status.load(Ordering::Acquire).into()
    }

    fn set_status(&self, status: WorkerStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    fn drop_pending(&self, records: u64, bytes: u64) {
        self.dropped_records.fetch_add(records, Ordering::Relaxed);
        self.dropped_bytes.fetch_add(bytes, Ordering::Relaxed);
    }
}

impl RefCountable for WorkerCounter {
    fn get_counters(&self) -> Vec<Counter> {
        let counted = |name: &'static str, v: &AtomicU64| -> Counter {
            (
                name,
                CounterType::Counted,
                CounterValue::Unsigned(v.load(Ordering::Relaxed)),
            )
        };
        vec![
            counted("rx", &self.rx),
            counted("increments", &self.increments),
            counted("bytes", &self.bytes),
            counted("store-errors", &self.store_errors),
            counted("reconnects", &self.reconnects),
            counted("dropped-records", &self.dropped_records),
            counted("dropped-bytes", &self.dropped_bytes),
            (
                "failed",
                CounterType::Gauged,
                CounterValue::Unsigned((self.status() == WorkerStatus::Failed) as u64),
            ),
        ]
    }
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub pop_timeout: Duration,
    pub batch_size: usize,
    pub drain_on_shutdown: bool,
    pub max_consecutive_failures: u32,
    pub reconnect_backoff: Duration,
    pub reconnect_backoff_max: Duration,
}

impl From<&Config> for WorkerConfig {
    fn from(c: &Config) -> Self {
        Self {
            pop_timeout: c.pop_timeout,
            batch_size: c.worker_batch_size,
            drain_on_shutdown: c.drain_on_shutdown,
            max_consecutive_failures: c.store.max_consecutive_failures,
            reconnect_backoff: c.store.reconnect_backoff,
            reconnect_backoff_max: c.store.reconnect_backoff_max,
        }
    }
}

// increments not yet written, with the number of records behind each
#[derive(Default)]
struct Pending {
    records: u64,
    bytes: u64,
}

enum Flush {
    Done,
    GaveUp,
    Interrupted,
}

/// Pops flow records, sums their byte lengths per address pair and adds the
/// sums to the counter store.
pub struct AggregationWorker {
    id: usize,
    input: Receiver<FlowRecord>,
    connector: Arc<dyn StoreConnector>,
    config: WorkerConfig,
    shutdown: Shutdown,
    counter: Arc<WorkerCounter>,

    store: Option<Box<dyn CounterStore>>,
    connected_once: bool,
    consecutive_failures: u32,
    backoff: Backoff,
    pending: HashMap<FlowKey, Pending>,
}

impl AggregationWorker {
    pub fn new(
        id: usize,
        input: Receiver<FlowRecord>,
        connector: Arc<dyn StoreConnector>,
        config: WorkerConfig,
        shutdown: Shutdown,
    ) -> Self {
        let backoff = Backoff::new(config.reconnect_backoff, config.reconnect_backoff_max);
        Self {
            id,
            input,
            connector,
            config,
            shutdown,
            counter: Arc::new(WorkerCounter::default()),
            store: None,
            connected_once: false,
            consecutive_failures: 0,
            backoff,
            pending: HashMap::new(),
        }
    }

    pub fn counter(&self) -> &Arc<WorkerCounter> {
        &self.counter
    }

    pub fn spawn(mut self) -> io::Result<JoinHandle<WorkerStatus>> {
        thread::Builder::new()
            .name(format!("store-worker-{}", self.id))
            .spawn(move || {
                let status = self.run();
                self.counter.set_status(status);
                status
            })
    }

    pub fn run(&mut self) -> WorkerStatus {
        info!(
            "store worker {} started, store {}",
            self.id,
            self.connector.endpoint()
        );
        let status = self.process();
        // releases the store connection
        self.store = None;
        match status {
            WorkerStatus::Failed => error!(
                "store worker {} gave up after {} consecutive store failures",
                self.id, self.consecutive_failures
            ),
            _ => info!("store worker {} stopped", self.id),
        }
        status
    }

    fn process(&mut self) -> WorkerStatus {
        match self.connect_with_retry() {
            Flush::Done => (),
            Flush::GaveUp => return WorkerStatus::Failed,
            Flush::Interrupted => return WorkerStatus::Finished,
        }

        let mut batch = Vec::with_capacity(self.config.batch_size);
        loop {
            if self.shutdown.is_triggered() && !self.config.drain_on_shutdown {
                return WorkerStatus::Finished;
            }
            batch.clear();
            match self.input.recv_all(&mut batch, Some(self.config.pop_timeout)) {
                Ok(()) => {
                    self.counter
                        .rx
                        .fetch_add(batch.len() as u64, Ordering::Relaxed);
                    for record in batch.drain(..) {
                        let p = self.pending.entry(record.key()).or_default();
                        p.records += 1;
                        p.bytes += record.byte_length as u64;
                    }
                    match self.flush() {
                        Flush::Done => (),
                        Flush::GaveUp => return WorkerStatus::Failed,
                        Flush::Interrupted => return WorkerStatus::Finished,
                    }
                }
                Err(queue::Error::Timeout) => {
                    if self.shutdown.is_triggered() {
                        return WorkerStatus::Finished;
                    }
                }
                Err(_) => {
                    debug!("store worker {} input queue terminated", self.id);
                    return WorkerStatus::Finished;
                }
            }
        }
    }

    // counts a failure and sleeps before the next attempt
    fn fail(&mut self) -> Flush {
        self.counter.store_errors.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.config.max_consecutive_failures {
            self.discard_pending();
            return Flush::GaveUp;
        }
        if self.shutdown.wait_timeout(self.backoff.next()) {
            self.discard_pending();
            return Flush::Interrupted;
        }
        Flush::Done
    }

    fn discard_pending(&mut self) {
        for (_, p) in self.pending.drain() {
            self.counter.drop_pending(p.records, p.bytes);
        }
    }

    fn connect_with_retry(&mut self) -> Flush {
        while self.store.is_none() {
            match self.connector.connect() {
                Ok(store) => {
                    if self.connected_once {
                        self.counter.reconnects.fetch_add(1, Ordering::Relaxed);
                        info!("store worker {} reconnected", self.id);
                    }
                    self.connected_once = true;
                    self.store = Some(store);
                }
                Err(e) => {
                    warn!("store worker {}: {}", self.id, e);
                    match self.fail() {
                        Flush::Done => (),
                        other => return other,
                    }
                }
            }
        }
        Flush::Done
    }

    fn flush(&mut self) -> Flush {
        let keys: Vec<FlowKey> = self.pending.keys().copied().collect();
        for key in keys {
            match self.connect_with_retry() {
                Flush::Done => (),
                other => return other,
            }
            let Some(store) = self.store.as_mut() else {
                continue;
            };
            let Some(pending) = self.pending.remove(&key) else {
                continue;
            };
            match store.increment(&key, pending.bytes) {
                Ok(_) => {
                    self.counter.increments.fetch_add(1, Ordering::Relaxed);
                    self.counter
                        .bytes
                        .fetch_add(pending.bytes, Ordering::Relaxed);
                    self.consecutive_failures = 0;
                    self.backoff.reset();
                }
                Err(e) => {
                    warn!("store worker {}: {}", self.id, e);
                    self.counter.drop_pending(pending.records, pending.bytes);
                    self.store = None;
                    match self.fail() {
                        Flush::Done => (),
                        other => return other,
                    }
                }
            }
        }
        Flush::Done
    }
}
