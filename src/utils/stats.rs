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

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{info, warn};

pub use public::counter::*;

pub enum StatsOption {
    Tag(&'static str, String),
}

struct Source {
    module: &'static str,
    countable: Countable,
    tags: Vec<(&'static str, String)>,
}

impl PartialEq for Source {
    fn eq(&self, other: &Source) -> bool {
        self.module == other.module && self.tags == other.tags
    }
}

impl Eq for Source {}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.module)?;
        for (k, v) in self.tags.iter() {
            write!(f, " {}={}", k, v)?;
        }
        Ok(())
    }
}

/// Logs the counters of every registered source once per interval, and a
/// last time when stopped.
pub struct Collector {
    interval: Duration,
    sources: Arc<Mutex<Vec<Source>>>,

    running: Arc<(Mutex<bool>, Condvar)>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Collector {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            sources: Arc::new(Mutex::new(vec![])),
            running: Arc::new((Mutex::new(false), Condvar::new())),
            thread: Mutex::new(None),
        }
    }

    pub fn register_countable(
        &self,
        module: &'static str,
        countable: Countable,
        options: Vec<StatsOption>,
    ) {
        let mut source = Source {
            module,
            countable,
            tags: vec![],
        };
        for option in options {
            match option {
                StatsOption::Tag(k, v) if !source.tags.iter().any(|(key, _)| key == &k) => {
                    source.tags.push((k, v))
                }
                _ => warn!("ignored duplicated tag for module {}", source.module),
            }
        }
        let mut sources = self.sources.lock().unwrap();
        sources.retain(|s| {
            let closed = s.countable.closed();
            let equals = s == &source;
            if !closed && equals {
                warn!(
                    "Found duplicated counter source {}, please check if the old one is correctly closed.",
                    source
                );
            }
            !closed && !equals
        });
        sources.push(source);
    }

    // closed sources are still reported in the final round
    fn report(sources: &Mutex<Vec<Source>>, retain_closed: bool) {
        let mut sources = sources.lock().unwrap();
        for source in sources.iter() {
            let points = source.countable.get_counters();
            if !points.is_empty() {
                info!("[stats] {}: {}", source, format_counters(&points));
            }
        }
        if !retain_closed {
            sources.retain(|s| !s.countable.closed());
        }
    }

    pub fn start(&self) {
        {
            let (started, _) = &*self.running;
            let mut started = started.lock().unwrap();
            if *started {
                return;
            }
            *started = true;
        }
        if self.interval.is_zero() {
            info!("periodic stats disabled");
            return;
        }

        let running = self.running.clone();
        let sources = self.sources.clone();
        let interval = self.interval;
        let thread = thread::Builder::new()
            .name("stats-collector".to_owned())
            .spawn(move || loop {
                let (running, timer) = &*running;
                let mut running = running.lock().unwrap();
                if !*running {
                    break;
                }
                running = timer.wait_timeout(running, interval).unwrap().0;
                if !*running {
                    break;
                }
                drop(running);
                Self::report(&sources, false);
            });
        match thread {
            Ok(t) => *self.thread.lock().unwrap() = Some(t),
            Err(e) => warn!("start stats collector failed: {}", e),
        }
    }

    pub fn stop(&self) {
        {
            let (running, timer) = &*self.running;
            let mut running = running.lock().unwrap();
            if !*running {
                return;
            }
            *running = false;
            timer.notify_one();
        }
        if let Some(t) = self.thread.lock().unwrap().take() {
            let _ = t.join();
        }
        Self::report(&self.sources, true);
    }

    pub fn source_count(&self) -> usize {
        self.sources.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use super::*;

    struct Probe {
        polled: AtomicU64,
        closed: Arc<AtomicBool>,
    }

    impl OwnedCountable for Probe {
        fn get_counters(&self) -> Vec<Counter> {
            let n = self.polled.fetch_add(1, Ordering::Relaxed) + 1;
            vec![("polled", CounterType::Counted, CounterValue::Unsigned(n))]
        }

        fn closed(&self) -> bool {
            self.closed.load(Ordering::Relaxed)
        }
    }

    fn probe(closed: Arc<AtomicBool>) -> Countable {
        Countable::Owned(Box::new(Probe {
            polled: AtomicU64::new(0),
            closed,
        }))
    }

    #[test]
    fn duplicated_source_replaced() {
        let c = Collector::new(Duration::ZERO);
        let closed = Arc::new(AtomicBool::new(false));
        c.register_countable(
            "queue",
            probe(closed.clone()),
            vec![StatsOption::Tag("index", "0".into())],
        );
        c.register_countable(
            "queue",
            probe(closed.clone()),
            vec![StatsOption::Tag("index", "0".into())],
        );
        c.register_countable(
            "queue",
            probe(closed.clone()),
            vec![StatsOption::Tag("index", "1".into())],
        );
        assert_eq!(c.source_count(), 2);
    }

    #[test]
    fn periodic_report_drops_closed_sources() {
        let c = Collector::new(Duration::from_millis(10));
        let closed = Arc::new(AtomicBool::new(false));
        c.register_countable("capture", probe(closed.clone()), vec![]);
        c.start();
        closed.store(true, Ordering::Relaxed);
        let mut waited = 0;
        while c.source_count() > 0 && waited < 500 {
            thread::sleep(Duration::from_millis(10));
            waited += 1;
        }
        assert_eq!(c.source_count(), 0);
        c.stop();
        c.stop();
    }
}
