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

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};

use public::counter::{Counter, CounterType, CounterValue, RefCountable};
use public::queue::{self, Sender};

use super::{Error, PacketSource, Result};
use crate::common::FlowRecord;

#[derive(Default)]
pub struct CaptureCounter {
    // frames delivered by the capture source
    pub rx: AtomicU64,
    pub pushed: AtomicU64,
    pub invalid: AtomicU64,
    pub dropped: AtomicU64,
}

impl RefCountable for CaptureCounter {
    fn get_counters(&self) -> Vec<Counter> {
        vec![
            (
                "rx",
                CounterType::Counted,
                CounterValue::Unsigned(self.rx.load(Ordering::Relaxed)),
            ),
            (
                "pushed",
                CounterType::Counted,
                CounterValue::Unsigned(self.pushed.load(Ordering::Relaxed)),
            ),
            (
                "invalid",
                CounterType::Counted,
                CounterValue::Unsigned(self.invalid.load(Ordering::Relaxed)),
            ),
            (
                "dropped",
                CounterType::Counted,
                CounterValue::Unsigned(self.dropped.load(Ordering::Relaxed)),
            ),
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureEnd {
    LimitReached,
    SourceFinished,
    QueueClosed,
    Stopped,
}

pub struct CaptureProducer {
    source: Box<dyn PacketSource>,
    output: Sender<FlowRecord>,
    packet_limit: u64,
    running: Arc<AtomicBool>,
    counter: Arc<CaptureCounter>,
}

impl CaptureProducer {
    pub fn new(
        source: Box<dyn PacketSource>,
        output: Sender<FlowRecord>,
        packet_limit: u64,
        running: Arc<AtomicBool>,
        counter: Arc<CaptureCounter>,
    ) -> Self {
        Self {
            source,
            output,
            packet_limit,
            running,
            counter,
        }
    }

    /// Reads frames until the packet limit, the end of the source, the
    /// queue closing or `running` being cleared. The source is released when
    /// the producer is dropped.
    pub fn run(&mut self) -> Result<CaptureEnd> {
        let mut received = 0u64;
        while self.running.load(Ordering::Relaxed) {
            if self.packet_limit > 0 && received >= self.packet_limit {
                info!("capture reached packet limit {}", self.packet_limit);
                return Ok(CaptureEnd::LimitReached);
            }
            let record = match self.source.next_frame() {
                Ok(frame) => {
                    received += 1;
                    self.counter.rx.fetch_add(1, Ordering::Relaxed);
                    FlowRecord::parse(frame)
                }
                Err(Error::Timeout) => continue,
                Err(Error::Finished) => {
                    info!("capture source finished after {} frames", received);
                    return Ok(CaptureEnd::SourceFinished);
                }
                Err(e) => return Err(e),
            };
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    self.counter.invalid.fetch_add(1, Ordering::Relaxed);
                    debug!("skip frame: {}", e);
                    continue;
                }
            };
            match self.output.send(record) {
                Ok(()) => {
                    self.counter.pushed.fetch_add(1, Ordering::Relaxed);
                }
                Err(queue::Error::Full(_)) => {
                    self.counter.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    warn!("flow record queue closed, capture stops");
                    return Ok(CaptureEnd::QueueClosed);
                }
            }
        }
        Ok(CaptureEnd::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use super::*;
    use crate::common::flow_record::tests::ipv4_frame;
    use public::queue::{bounded, FullPolicy};

    enum Step {
        Frame(Vec<u8>),
        Timeout,
        Fail,
    }

    /// Replays scripted steps then reports `Finished`, or keeps timing out
    /// when `endless` is set.
    struct ScriptedSource {
        steps: VecDeque<Step>,
        current: Vec<u8>,
        endless: bool,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>, endless: bool) -> Self {
            Self {
                steps: steps.into(),
                current: vec![],
                endless,
            }
        }
    }

    impl PacketSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<&[u8]> {
            match self.steps.pop_front() {
                Some(Step::Frame(f)) => {
                    self.current = f;
                    Ok(&self.current)
                }
                Some(Step::Timeout) => Err(Error::Timeout),
                Some(Step::Fail) => Err(Error::Pcap("device went down".into())),
                None if self.endless => {
                    std::thread::sleep(Duration::from_millis(1));
                    Err(Error::Timeout)
                }
                None => Err(Error::Finished),
            }
        }
    }

    fn producer(
        steps: Vec<Step>,
        limit: u64,
        queue_size: usize,
    ) -> (CaptureProducer, queue::Receiver<FlowRecord>, Arc<CaptureCounter>) {
        let (s, r, _) = bounded(queue_size, FullPolicy::Drop);
        let counter = Arc::new(CaptureCounter::default());
        let p = CaptureProducer::new(
            Box::new(ScriptedSource::new(steps, false)),
            s,
            limit,
            Arc::new(AtomicBool::new(true)),
            counter.clone(),
        );
        (p, r, counter)
    }

    #[test]
    fn push_valid_skip_invalid() {
        let steps = vec![
            Step::Frame(ipv4_frame([10, 0, 0, 1], [10, 0, 0, 2], 100)),
            Step::Timeout,
            Step::Frame(vec![0u8; 10]),
            Step::Frame(ipv4_frame([10, 0, 0, 3], [10, 0, 0, 4], 60)),
        ];
        let (mut p, r, counter) = producer(steps, 0, 16);
        assert_eq!(p.run().unwrap(), CaptureEnd::SourceFinished);
        assert_eq!(counter.rx.load(Ordering::Relaxed), 3);
        assert_eq!(counter.pushed.load(Ordering::Relaxed), 2);
        assert_eq!(counter.invalid.load(Ordering::Relaxed), 1);
        let first = r.recv(Some(Duration::ZERO)).unwrap();
        assert_eq!(first.byte_length, 100);
        let second = r.recv(Some(Duration::ZERO)).unwrap();
        assert_eq!(second.src, "10.0.0.3".parse::<std::net::Ipv4Addr>().unwrap());
    }

    #[test]
    fn limit_counts_delivered_frames() {
        let steps = vec![
            Step::Frame(vec![0u8; 4]),
            Step::Frame(ipv4_frame([1, 1, 1, 1], [2, 2, 2, 2], 40)),
            Step::Frame(ipv4_frame([1, 1, 1, 1], [2, 2, 2, 2], 40)),
        ];
        let (mut p, _r, counter) = producer(steps, 2, 16);
        assert_eq!(p.run().unwrap(), CaptureEnd::LimitReached);
        assert_eq!(counter.rx.load(Ordering::Relaxed), 2);
        assert_eq!(counter.pushed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn full_queue_counts_drop() {
        let steps = (0..5)
            .map(|_| Step::Frame(ipv4_frame([1, 1, 1, 1], [2, 2, 2, 2], 40)))
            .collect();
        let (mut p, _r, counter) = producer(steps, 0, 2);
        assert_eq!(p.run().unwrap(), CaptureEnd::SourceFinished);
        assert_eq!(counter.pushed.load(Ordering::Relaxed), 2);
        assert_eq!(counter.dropped.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn closed_queue_stops_capture() {
        let steps = vec![Step::Frame(ipv4_frame([1, 1, 1, 1], [2, 2, 2, 2], 40))];
        let (mut p, r, _) = producer(steps, 0, 4);
        r.close();
        assert_eq!(p.run().unwrap(), CaptureEnd::QueueClosed);
    }

    #[test]
    fn read_error_is_fatal() {
        let (mut p, _r, _) = producer(vec![Step::Timeout, Step::Fail], 0, 4);
        assert!(matches!(p.run(), Err(Error::Pcap(_))));
    }

    #[test]
    fn cleared_running_flag_stops_on_timeout() {
        let (s, _r, _) = bounded(4, FullPolicy::Drop);
        let running = Arc::new(AtomicBool::new(true));
        let mut p = CaptureProducer::new(
            Box::new(ScriptedSource::new(vec![], true)),
            s,
            0,
            running.clone(),
            Arc::new(CaptureCounter::default()),
        );
        let h = std::thread::spawn(move || p.run());
        std::thread::sleep(Duration::from_millis(20));
        running.store(false, Ordering::Relaxed);
        assert_eq!(h.join().unwrap().unwrap(), CaptureEnd::Stopped);
    }
}
