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

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc, Condvar, Mutex, MutexGuard,
};
use std::time::{Duration, Instant};

use super::{Error, FullPolicy};
use crate::counter as stats;

pub fn bounded<T>(size: usize, policy: FullPolicy) -> (Sender<T>, Receiver<T>, StatsHandle<T>) {
    assert!(size > 0, "queue size must be positive");
    let inner = Arc::new(Inner {
        policy,
        ring: Mutex::new(Ring::with_capacity(size)),
        not_empty: Condvar::new(),
        not_full: Condvar::new(),
        senders: AtomicUsize::new(1),
        receivers: AtomicUsize::new(1),
        counter: Counter::default(),
    });
    (
        Sender {
            inner: inner.clone(),
        },
        Receiver {
            inner: inner.clone(),
        },
        StatsHandle { inner },
    )
}

#[derive(Debug, Default)]
struct Counter {
    input: AtomicU64,
    output: AtomicU64,
    dropped: AtomicU64,
    blocked: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub input: u64,
    pub output: u64,
    pub dropped: u64,
    pub blocked: u64,
    pub pending: u64,
}

// fixed size ring, `head` is the next slot to read
struct Ring<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
    closed: bool,
}

impl<T> Ring<T> {
    fn with_capacity(size: usize) -> Self {
        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, || None);
        Self {
            slots,
            head: 0,
            len: 0,
            closed: false,
        }
    }

    fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    fn push(&mut self, msg: T) {
        assert!(!self.is_full());
        let tail = (self.head + self.len) % self.slots.len();
        self.slots[tail] = Some(msg);
        self.len += 1;
    }

    fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let msg = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        msg
    }
}

struct Inner<T> {
    policy: FullPolicy,

    ring: Mutex<Ring<T>>,
    not_empty: Condvar,
    not_full: Condvar,

    senders: AtomicUsize,
    receivers: AtomicUsize,

    counter: Counter,
}

impl<T> Inner<T> {
    fn close(&self) {
        {
            let mut ring = self.ring.lock().unwrap();
            if ring.closed {
                return;
            }
            ring.closed = true;
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn terminated(&self) -> bool {
        self.ring.lock().unwrap().closed
    }

    fn send(&self, msg: T) -> Result<(), Error<T>> {
        let mut ring = self.ring.lock().unwrap();
        if ring.closed {
            return Err(Error::Terminated(Some(msg)));
        }
        if ring.is_full() {
            match self.policy {
                FullPolicy::Drop => {
                    self.counter.dropped.fetch_add(1, Ordering::Relaxed);
                    return Err(Error::Full(Some(msg)));
                }
                FullPolicy::Block => {
                    self.counter.blocked.fetch_add(1, Ordering::Relaxed);
                    while ring.is_full() && !ring.closed {
                        ring = self.not_full.wait(ring).unwrap();
                    }
                    if ring.closed {
                        return Err(Error::Terminated(Some(msg)));
                    }
                }
            }
        }
        ring.push(msg);
        self.counter.input.fetch_add(1, Ordering::Relaxed);
        drop(ring);
        self.not_empty.notify_one();
        Ok(())
    }

    // one wait step on an empty ring, the caller loops until data shows up
    fn wait_for_data<'a>(
        &'a self,
        ring: MutexGuard<'a, Ring<T>>,
        deadline: Option<Instant>,
    ) -> Result<MutexGuard<'a, Ring<T>>, Error<T>> {
        if ring.closed {
            return Err(Error::Terminated(None));
        }
        match deadline {
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    return Err(Error::Timeout);
                }
                Ok(self.not_empty.wait_timeout(ring, d - now).unwrap().0)
            }
            None => Ok(self.not_empty.wait(ring).unwrap()),
        }
    }

    fn recv(&self, timeout: Option<Duration>) -> Result<T, Error<T>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut ring = self.ring.lock().unwrap();
        loop {
            let popped = ring.pop();
            if let Some(msg) = popped {
                drop(ring);
                self.counter.output.fetch_add(1, Ordering::Relaxed);
                self.not_full.notify_one();
                return Ok(msg);
            }
            ring = self.wait_for_data(ring, deadline)?;
        }
    }

    fn recv_all(&self, msgs: &mut Vec<T>, timeout: Option<Duration>) -> Result<(), Error<T>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let max_recv = msgs.capacity();
        let mut ring = self.ring.lock().unwrap();
        loop {
            if ring.len > 0 {
                while msgs.len() < max_recv {
                    match ring.pop() {
                        Some(msg) => msgs.push(msg),
                        None => break,
                    }
                }
                drop(ring);
                self.counter
                    .output
                    .fetch_add(msgs.len() as u64, Ordering::Relaxed);
                self.not_full.notify_all();
                return Ok(());
            }
            ring = self.wait_for_data(ring, deadline)?;
        }
    }

    fn snapshot(&self) -> CounterSnapshot {
        let pending = self.ring.lock().unwrap().len as u64;
        CounterSnapshot {
            input: self.counter.input.load(Ordering::Relaxed),
            output: self.counter.output.load(Ordering::Relaxed),
            dropped: self.counter.dropped.load(Ordering::Relaxed),
            blocked: self.counter.blocked.load(Ordering::Relaxed),
            pending,
        }
    }
}

pub struct Sender<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Sender<T> {
    pub fn terminated(&self) -> bool {
        self.inner.terminated()
    }

    /// Enqueues `msg` according to the queue's `FullPolicy`.
    ///
    /// On failure the message is handed back inside the error.
    pub fn send(&self, msg: T) -> Result<(), Error<T>> {
        self.inner.send(msg)
    }

    pub fn close(&self) {
        self.inner.close()
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.inner.senders.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        // last sender to drop
        if self.inner.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.close();
        }
    }
}

pub struct Receiver<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Receiver<T> {
    pub fn terminated(&self) -> bool {
        self.inner.terminated()
    }

    /// Waits up to `timeout` for one message, forever on `None`.
    ///
    /// A closed queue keeps handing out what it still holds and returns
    /// `Error::Terminated` only once it is empty.
    pub fn recv(&self, timeout: Option<Duration>) -> Result<T, Error<T>> {
        self.inner.recv(timeout)
    }

    // Clears anything in msgs, and receive at most msgs.capacity() messages
    pub fn recv_all(&self, msgs: &mut Vec<T>, timeout: Option<Duration>) -> Result<(), Error<T>> {
        assert!(msgs.capacity() > 0);
        msgs.clear();
        self.inner.recv_all(msgs, timeout)
    }

    pub fn close(&self) {
        self.inner.close()
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.inner.receivers.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        // nobody left to consume, stop accepting
        if self.inner.receivers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.close();
        }
    }
}

impl<T> Iterator for Receiver<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv(None).ok()
    }
}

pub struct StatsHandle<T> {
    inner: Arc<Inner<T>>,
}

impl<T> StatsHandle<T> {
    pub fn len(&self) -> usize {
        self.inner.ring.lock().unwrap().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counter(&self) -> CounterSnapshot {
        self.inner.snapshot()
    }

    pub fn close(&self) {
        self.inner.close()
    }

    pub fn terminated(&self) -> bool {
        self.inner.terminated()
    }
}

impl<T> Clone for StatsHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send> stats::OwnedCountable for StatsHandle<T> {
    fn get_counters(&self) -> Vec<stats::Counter> {
        let snapshot = self.inner.snapshot();
        vec![
            (
                "in",
                stats::CounterType::Counted,
                stats::CounterValue::Unsigned(snapshot.input),
            ),
            (
                "out",
                stats::CounterType::Counted,
                stats::CounterValue::Unsigned(snapshot.output),
            ),
            (
                "dropped",
                stats::CounterType::Counted,
                stats::CounterValue::Unsigned(snapshot.dropped),
            ),
            (
                "blocked",
                stats::CounterType::Counted,
                stats::CounterValue::Unsigned(snapshot.blocked),
            ),
            (
                "pending",
                stats::CounterType::Gauged,
                stats::CounterValue::Unsigned(snapshot.pending),
            ),
        ]
    }

    fn closed(&self) -> bool {
        self.inner.terminated()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fmt;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    use super::*;

    #[derive(Debug)]
    struct CountedU64(u64, Arc<AtomicUsize>);

    impl CountedU64 {
        fn new(id: u64, c: Arc<AtomicUsize>) -> Self {
            c.fetch_add(1, Ordering::Relaxed);
            Self(id, c)
        }
    }

    impl Drop for CountedU64 {
        fn drop(&mut self) {
            self.1.fetch_sub(1, Ordering::Relaxed);
        }
    }

    impl PartialEq for CountedU64 {
        fn eq(&self, other: &CountedU64) -> bool {
            self.0 == other.0
        }
    }

    impl PartialEq<u64> for CountedU64 {
        fn eq(&self, other: &u64) -> bool {
            self.0 == *other
        }
    }

    impl fmt::Display for CountedU64 {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    #[test]
    fn one_element_send_receive() {
        let c = Arc::new(AtomicUsize::new(0));

        {
            let (s, r, _) = bounded(2, FullPolicy::Drop);
            let h = thread::spawn(move || {
                let co: CountedU64 = r.recv(None).unwrap();
                assert_eq!(co, 42, "expected: 42, result: {}", co);
            });
            s.send(CountedU64::new(42, c.clone())).unwrap();

            h.join().unwrap();
        }

        let c = c.load(Ordering::Acquire);
        assert_eq!(c, 0, "new/drop count mismatch: new - drop = {}", c);
    }

    #[test]
    fn fifo_order_across_wrap() {
        let (s, r, _) = bounded(3, FullPolicy::Drop);
        for round in 0..5u64 {
            s.send(round * 10).unwrap();
            s.send(round * 10 + 1).unwrap();
            assert_eq!(r.recv(None).unwrap(), round * 10);
            assert_eq!(r.recv(None).unwrap(), round * 10 + 1);
        }
    }

    #[test]
    fn multiple_consumers_receive_each_message_once() {
        let (s, r, stats) = bounded::<u64>(16, FullPolicy::Block);
        let producers = 4;
        let per_producer = 1000u64;
        let mut producer_handles = vec![];
        for p in 0..producers {
            let sender = s.clone();
            producer_handles.push(thread::spawn(move || {
                for i in 0..per_producer {
                    sender.send(p * per_producer + i).unwrap();
                }
            }));
        }
        drop(s);

        let mut consumer_handles = vec![];
        for _ in 0..4 {
            let receiver = r.clone();
            consumer_handles.push(thread::spawn(move || {
                let mut seen = vec![];
                while let Ok(v) = receiver.recv(Some(Duration::from_secs(5))) {
                    seen.push(v);
                }
                seen
            }));
        }
        drop(r);

        for h in producer_handles {
            h.join().unwrap();
        }
        let mut all = vec![];
        for h in consumer_handles {
            all.extend(h.join().unwrap());
        }
        let total = producers * per_producer;
        assert_eq!(all.len() as u64, total);
        let unique: HashSet<u64> = all.into_iter().collect();
        assert_eq!(unique.len() as u64, total);

        let snapshot = stats.counter();
        assert_eq!(snapshot.input, total);
        assert_eq!(snapshot.output, total);
        assert_eq!(snapshot.dropped, 0);
        assert_eq!(snapshot.pending, 0);
    }

    #[test]
    fn drop_policy_counts_overflow() {
        let (s, r, stats) = bounded(2, FullPolicy::Drop);
        let mut accepted = 0;
        for i in 0..5u64 {
            match s.send(i) {
                Ok(_) => accepted += 1,
                Err(Error::Full(Some(v))) => assert_eq!(v, i),
                Err(e) => panic!("unexpected error {}", e),
            }
        }
        assert_eq!(accepted, 2);
        assert_eq!(stats.len(), 2);

        assert_eq!(r.recv(None).unwrap(), 0);
        assert_eq!(r.recv(None).unwrap(), 1);

        let snapshot = stats.counter();
        assert_eq!(snapshot.input, 2);
        assert_eq!(snapshot.output, 2);
        assert_eq!(snapshot.dropped, 3);
        assert_eq!(snapshot.input + snapshot.dropped, 5);
        assert_eq!(snapshot.pending, 0);
    }

    #[test]
    fn block_policy_waits_for_space() {
        let (s, r, stats) = bounded(1, FullPolicy::Block);
        s.send(1u64).unwrap();

        let sent = Arc::new(AtomicBool::new(false));
        let sent_cl = sent.clone();
        let h = thread::spawn(move || {
            s.send(2).unwrap();
            sent_cl.store(true, Ordering::Release);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!sent.load(Ordering::Acquire));
        assert_eq!(stats.len(), 1);

        assert_eq!(r.recv(None).unwrap(), 1);
        h.join().unwrap();
        assert!(sent.load(Ordering::Acquire));
        assert_eq!(r.recv(Some(Duration::from_millis(100))).unwrap(), 2);
        assert_eq!(stats.counter().blocked, 1);
        assert_eq!(stats.counter().dropped, 0);
    }

    #[test]
    fn block_policy_released_by_close() {
        let (s, _r, stats) = bounded(1, FullPolicy::Block);
        s.send(1u64).unwrap();

        let h = thread::spawn(move || s.send(2));
        thread::sleep(Duration::from_millis(20));
        stats.close();

        assert_eq!(h.join().unwrap(), Err(Error::Terminated(Some(2))));
    }

    #[test]
    fn timeout_and_terminate() {
        let c = Arc::new(AtomicUsize::new(0));

        {
            let (s, r, _) = bounded(4, FullPolicy::Drop);
            let phase = Arc::new(AtomicUsize::new(0));
            let rphase = phase.clone();

            let h = thread::spawn(move || {
                let phase = rphase;

                let e: Error<CountedU64> = r.recv(Some(Duration::from_millis(10))).err().unwrap();
                assert_eq!(e, Error::Timeout);

                phase.store(1, Ordering::Release);
                while phase.load(Ordering::Acquire) < 2 {
                    thread::yield_now();
                }

                let mut co = Vec::with_capacity(100);
                r.recv_all(&mut co, Some(Duration::from_millis(100)))
                    .unwrap();
                assert_eq!(co, vec![42, 43], "expected: [42, 43], result: {:?}", co);

                let e: Error<CountedU64> = r.recv(Some(Duration::from_millis(10))).err().unwrap();
                assert_eq!(e, Error::Terminated(None));
            });

            while phase.load(Ordering::Acquire) < 1 {
                thread::yield_now();
            }

            s.send(CountedU64::new(42, c.clone())).unwrap();
            s.send(CountedU64::new(43, c.clone())).unwrap();
            s.close();
            match s.send(CountedU64::new(44, c.clone())) {
                Err(Error::Terminated(Some(m))) => assert_eq!(m, 44),
                other => panic!("expected terminated, got {:?}", other.err()),
            }
            phase.store(2, Ordering::Release);

            h.join().unwrap();
        }

        let c = c.load(Ordering::Acquire);
        assert_eq!(c, 0, "new/drop count mismatch: new - drop = {}", c);
    }

    #[test]
    fn recv_all_respects_capacity() {
        let (s, r, _) = bounded(8, FullPolicy::Drop);
        for i in 0..5u64 {
            s.send(i).unwrap();
        }
        let mut batch = Vec::with_capacity(3);
        r.recv_all(&mut batch, None).unwrap();
        assert_eq!(batch, vec![0, 1, 2]);
        r.recv_all(&mut batch, None).unwrap();
        assert_eq!(batch, vec![3, 4]);
        assert_eq!(
            r.recv_all(&mut batch, Some(Duration::from_millis(5))),
            Err(Error::Timeout)
        );
    }

    #[test]
    fn close_is_idempotent_and_drains() {
        let (s, r, stats) = bounded(4, FullPolicy::Drop);
        s.send(7u64).unwrap();
        stats.close();
        stats.close();
        r.close();
        assert!(s.terminated());
        assert_eq!(r.recv(Some(Duration::from_millis(5))).unwrap(), 7);
        assert_eq!(r.recv(None), Err(Error::Terminated(None)));
    }

    #[test]
    fn last_sender_drop_closes() {
        let (s, r, _) = bounded(4, FullPolicy::Drop);
        let s2 = s.clone();
        s.send(1u64).unwrap();
        drop(s);
        assert!(!r.terminated());
        s2.send(2).unwrap();
        drop(s2);
        assert!(r.terminated());
        assert_eq!(r.collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn pending_messages_dropped_with_queue() {
        let c = Arc::new(AtomicUsize::new(0));
        {
            let (s, r, _) = bounded(4, FullPolicy::Drop);
            for i in 0..3 {
                s.send(CountedU64::new(i, c.clone())).unwrap();
            }
            let _ = r.recv(None).unwrap();
        }
        let c = c.load(Ordering::Acquire);
        assert_eq!(c, 0, "new/drop count mismatch: new - drop = {}", c);
    }

    #[test]
    fn occupancy_bounded_under_load() {
        for policy in [FullPolicy::Block, FullPolicy::Drop] {
            let (s, r, stats) = bounded::<u64>(4, policy);
            let producer = thread::spawn(move || {
                for i in 0..20000 {
                    let _ = s.send(i);
                }
            });
            let sampler_stats = stats.clone();
            let sampler = thread::spawn(move || {
                let mut max = 0;
                while !sampler_stats.terminated() || !sampler_stats.is_empty() {
                    max = max.max(sampler_stats.len());
                    thread::yield_now();
                }
                max
            });
            let mut received = 0u64;
            while r.recv(Some(Duration::from_secs(5))).is_ok() {
                received += 1;
            }
            producer.join().unwrap();
            assert!(sampler.join().unwrap() <= 4);

            let snapshot = stats.counter();
            assert_eq!(snapshot.output, received);
            assert_eq!(snapshot.input + snapshot.dropped, 20000);
            if policy == FullPolicy::Block {
                assert_eq!(snapshot.dropped, 0);
            }
        }
    }

    #[test]
    #[should_panic]
    fn zero_sized_queue() {
        let _ = bounded::<u64>(0, FullPolicy::Block);
    }
}
