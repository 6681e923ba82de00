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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use public::counter::{Countable, RefCountable};
use public::queue::{bounded, CounterSnapshot, StatsHandle};

use crate::capture::{self, CaptureCounter, CaptureEnd, CaptureProducer, PacketSource};
use crate::common::FlowRecord;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::StoreConnector;
use crate::utils::{
    shutdown::Shutdown,
    stats::{Collector, StatsOption},
};
use crate::worker::{AggregationWorker, WorkerConfig, WorkerCounter, WorkerStatus};

const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Init,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Signal(i32),
    CaptureEnded(CaptureEnd),
    CaptureFailed,
    WorkersExhausted,
    Requested,
}

struct Control {
    state: State,
    reason: Option<StopReason>,
}

/// Requests shutdown of a running sniffer from any thread.
#[derive(Clone)]
pub struct StopHandle {
    control: Arc<(Mutex<Control>, Condvar)>,
}

impl StopHandle {
    fn new() -> Self {
        Self {
            control: Arc::new((
                Mutex::new(Control {
                    state: State::Init,
                    reason: None,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Moves a running sniffer to `ShuttingDown`. Returns false and does
    /// nothing in any other state.
    pub fn notify(&self, reason: StopReason) -> bool {
        let (control, cond) = &*self.control;
        let mut control = control.lock().unwrap();
        if control.state != State::Running {
            return false;
        }
        info!("shutdown requested: {:?}", reason);
        control.state = State::ShuttingDown;
        control.reason = Some(reason);
        cond.notify_all();
        true
    }

    pub fn state(&self) -> State {
        self.control.0.lock().unwrap().state
    }

    fn set_state(&self, state: State) {
        let (control, cond) = &*self.control;
        control.lock().unwrap().state = state;
        cond.notify_all();
    }

    fn reason(&self) -> Option<StopReason> {
        self.control.0.lock().unwrap().reason
    }

    // returns the stop reason once the state left Running
    fn wait_timeout(&self, timeout: Duration) -> Option<StopReason> {
        let (control, cond) = &*self.control;
        let mut control = control.lock().unwrap();
        if control.state == State::Running {
            control = cond.wait_timeout(control, timeout).unwrap().0;
        }
        match control.state {
            State::Running => None,
            _ => Some(control.reason.unwrap_or(StopReason::Requested)),
        }
    }
}

/// Owns the capture thread, the flow record queue and the store workers.
pub struct Sniffer {
    config: Config,
    connector: Arc<dyn StoreConnector>,
    control: StopHandle,

    capture_running: Arc<AtomicBool>,
    shutdown: Shutdown,
    queue: Option<StatsHandle<FlowRecord>>,
    capture_counter: Arc<CaptureCounter>,
    capture_thread: Option<JoinHandle<capture::Result<CaptureEnd>>>,
    worker_counters: Vec<Arc<WorkerCounter>>,
    worker_threads: Vec<JoinHandle<WorkerStatus>>,
    stats_collector: Collector,
}

impl Sniffer {
    pub fn new(config: Config, connector: Arc<dyn StoreConnector>) -> Self {
        let stats_collector = Collector::new(config.stats_interval);
        Self {
            config,
            connector,
            control: StopHandle::new(),
            capture_running: Arc::new(AtomicBool::new(false)),
            shutdown: Shutdown::new(),
            queue: None,
            capture_counter: Arc::new(CaptureCounter::default()),
            capture_thread: None,
            worker_counters: vec![],
            worker_threads: vec![],
            stats_collector,
        }
    }

    pub fn state(&self) -> State {
        self.control.state()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.control.clone()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.control.reason()
    }

    pub fn queue_counter(&self) -> Option<CounterSnapshot> {
        self.queue.as_ref().map(|q| q.counter())
    }

    pub fn capture_counter(&self) -> &Arc<CaptureCounter> {
        &self.capture_counter
    }

    pub fn worker_counters(&self) -> &[Arc<WorkerCounter>] {
        &self.worker_counters
    }

    /// Starts the store workers, then the capture thread reading `source`.
    pub fn start(&mut self, source: Box<dyn PacketSource>) -> Result<()> {
        let state = self.state();
        if state != State::Init {
            return Err(Error::InvalidState(state));
        }
        self.control.set_state(State::Running);

        let (sender, receiver, stats) =
            bounded(self.config.queue_size, self.config.queue_full_policy);
        self.stats_collector.register_countable(
            "queue",
            Countable::Owned(Box::new(stats.clone())),
            vec![StatsOption::Tag("module", "flow-record".to_owned())],
        );
        self.queue = Some(stats);

        let worker_number = self.config.worker_count();
        let worker_config = WorkerConfig::from(&self.config);
        for id in 0..worker_number {
            let worker = AggregationWorker::new(
                id,
                receiver.clone(),
                self.connector.clone(),
                worker_config.clone(),
                self.shutdown.clone(),
            );
            let counter = worker.counter().clone();
            self.stats_collector.register_countable(
                "store-worker",
                Countable::Ref(Arc::downgrade(&counter) as Weak<dyn RefCountable>),
                vec![StatsOption::Tag("index", id.to_string())],
            );
            match worker.spawn() {
                Ok(handle) => {
                    self.worker_counters.push(counter);
                    self.worker_threads.push(handle);
                }
                Err(e) => {
                    let _ = self.stop();
                    return Err(Error::ThreadSpawn {
                        name: format!("store-worker-{}", id),
                        source: e,
                    });
                }
            }
        }
        drop(receiver);
        info!(
            "started {} store workers, queue size {} policy {:?}",
            worker_number, self.config.queue_size, self.config.queue_full_policy
        );

        self.stats_collector.register_countable(
            "capture",
            Countable::Ref(Arc::downgrade(&self.capture_counter) as Weak<dyn RefCountable>),
            vec![],
        );
        self.stats_collector.start();

        self.capture_running.store(true, Ordering::Relaxed);
        let mut producer = CaptureProducer::new(
            source,
            sender,
            self.config.packet_count,
            self.capture_running.clone(),
            self.capture_counter.clone(),
        );
        let control = self.control.clone();
        let spawned = thread::Builder::new()
            .name("capture".to_owned())
            .spawn(move || {
                let result = producer.run();
                // closes the capture source and the queue's sending side
                drop(producer);
                match &result {
                    Ok(end) => {
                        control.notify(StopReason::CaptureEnded(*end));
                    }
                    Err(e) => {
                        error!("capture failed: {}", e);
                        control.notify(StopReason::CaptureFailed);
                    }
                }
                result
            });
        match spawned {
            Ok(handle) => self.capture_thread = Some(handle),
            Err(e) => {
                let _ = self.stop();
                return Err(Error::ThreadSpawn {
                    name: "capture".to_owned(),
                    source: e,
                });
            }
        }
        Ok(())
    }

    /// Blocks until shutdown is requested and returns why. Requests
    /// shutdown itself once every store worker has exited.
    pub fn wait(&self) -> StopReason {
        loop {
            if let Some(reason) = self.control.wait_timeout(LIVENESS_CHECK_INTERVAL) {
                return reason;
            }
            if !self.worker_threads.is_empty()
                && self.worker_threads.iter().all(|t| t.is_finished())
            {
                warn!("all store workers exited");
                self.control.notify(StopReason::WorkersExhausted);
            }
        }
    }

    /// Tears the pipeline down. Calling it again is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        match self.state() {
            State::Stopped => return Ok(()),
            State::Init => {
                self.control.set_state(State::Stopped);
                return Ok(());
            }
            State::Running => {
                self.control.notify(StopReason::Requested);
            }
            State::ShuttingDown => (),
        }
        info!("sniffer stopping");

        self.capture_running.store(false, Ordering::Relaxed);
        if let Some(queue) = self.queue.as_ref() {
            if !self.config.drain_on_shutdown && !queue.is_empty() {
                info!("discarding {} queued flow records", queue.len());
            }
            queue.close();
        }
        self.shutdown.trigger();

        let mut result = Ok(());
        if let Some(handle) = self.capture_thread.take() {
            match handle.join() {
                Ok(Ok(end)) => info!("capture thread exited: {:?}", end),
                Ok(Err(e)) => result = Err(Error::Capture(e)),
                Err(_) => result = Err(Error::ThreadPanicked("capture".to_owned())),
            }
        }

        let mut failed = 0;
        for (id, handle) in self.worker_threads.drain(..).enumerate() {
            match handle.join() {
                Ok(WorkerStatus::Failed) => failed += 1,
                Ok(_) => (),
                Err(_) => {
                    failed += 1;
                    error!("store worker {} panicked", id);
                }
            }
        }
        if result.is_ok() && failed > 0 && failed == self.worker_counters.len() {
            result = Err(Error::WorkersExhausted(failed));
        }

        self.stats_collector.stop();
        self.control.set_state(State::Stopped);
        info!("sniffer stopped");
        result
    }
}

impl Drop for Sniffer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("sniffer stopped with error: {}", e);
        }
    }
}
