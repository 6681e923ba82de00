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

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use sysinfo::{System, SystemExt};
use thiserror::Error;

use public::queue::FullPolicy;

const DEFAULT_SNAP_LEN: u32 = 128;
const DEFAULT_QUEUE_SIZE: usize = 65536;
const DEFAULT_BATCH_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("yaml config invalid: {0}")]
    YamlConfigInvalid(String),
    #[error("config value invalid: {0}")]
    ValueInvalid(String),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct StoreConfig {
    pub address: String,
    pub port: u16,
    pub key_prefix: String,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub io_timeout: Duration,
    // consecutive connect or increment failures before a worker gives up
    pub max_consecutive_failures: u32,
    #[serde(with = "humantime_serde")]
    pub reconnect_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub reconnect_backoff_max: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".into(),
            port: 6379,
            key_prefix: "".into(),
            connect_timeout: Duration::from_secs(1),
            io_timeout: Duration::from_secs(1),
            max_consecutive_failures: 5,
            reconnect_backoff: Duration::from_millis(100),
            reconnect_backoff_max: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    // empty for the first device libpcap reports
    pub interface: String,
    // 0 for unbounded
    pub packet_count: u64,
    pub filter: String,
    pub snap_len: u32,
    pub promiscuous: bool,
    #[serde(with = "humantime_serde")]
    pub capture_timeout: Duration,
    pub queue_size: usize,
    pub queue_full_policy: FullPolicy,
    #[serde(with = "humantime_serde")]
    pub pop_timeout: Duration,
    // 0 for cpu count - 1
    pub worker_number: usize,
    pub worker_batch_size: usize,
    pub drain_on_shutdown: bool,
    #[serde(with = "humantime_serde")]
    pub stats_interval: Duration,
    pub log_file: String,
    pub log_level: String,
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: "".into(),
            packet_count: 0,
            filter: "".into(),
            snap_len: DEFAULT_SNAP_LEN,
            promiscuous: false,
            capture_timeout: Duration::from_millis(100),
            queue_size: DEFAULT_QUEUE_SIZE,
            queue_full_policy: FullPolicy::Drop,
            pop_timeout: Duration::from_millis(200),
            worker_number: 0,
            worker_batch_size: DEFAULT_BATCH_SIZE,
            drain_on_shutdown: true,
            stats_interval: Duration::from_secs(10),
            log_file: "".into(),
            log_level: "info".into(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    pub fn load_from_file<T: AsRef<Path>>(path: T) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::YamlConfigInvalid(format!("read {} failed: {}", path.as_ref().display(), e))
        })?;
        Self::load(&contents)
    }

    pub fn load<C: AsRef<str>>(contents: C) -> Result<Self, ConfigError> {
        let contents = contents.as_ref();
        if contents.trim().is_empty() {
            // parsing empty string leads to EOF error
            return Ok(Self::default());
        }
        let mut cfg: Self = serde_yaml::from_str(contents)
            .map_err(|e| ConfigError::YamlConfigInvalid(e.to_string()))?;

        // convert relative path to absolute
        if !cfg.log_file.is_empty() && Path::new(&cfg.log_file).is_relative() {
            let Ok(mut pb) = env::current_dir() else {
                return Err(ConfigError::YamlConfigInvalid("get cwd failed".to_owned()));
            };
            pb.push(&cfg.log_file);
            match pb.to_str() {
                Some(s) => cfg.log_file = s.to_owned(),
                None => {
                    return Err(ConfigError::YamlConfigInvalid(format!(
                        "invalid log path {}",
                        cfg.log_file
                    )))
                }
            }
        }
        Ok(cfg)
    }

    /// Command line values win over the config file. Returns the file's
    /// filter when the command line expression replaced it.
    pub fn merge_command_line(
        &mut self,
        interface: Option<String>,
        packet_count: Option<u64>,
        expression: &[String],
    ) -> Option<String> {
        if let Some(interface) = interface {
            self.interface = interface;
        }
        if let Some(count) = packet_count {
            self.packet_count = count;
        }
        if expression.is_empty() {
            return None;
        }
        let replaced = std::mem::replace(&mut self.filter, expression.join(" "));
        if replaced.is_empty() {
            None
        } else {
            Some(replaced)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_size == 0 {
            return Err(ConfigError::ValueInvalid("queue-size must be positive".into()));
        }
        if self.worker_batch_size == 0 {
            return Err(ConfigError::ValueInvalid(
                "worker-batch-size must be positive".into(),
            ));
        }
        if self.pop_timeout.is_zero() {
            return Err(ConfigError::ValueInvalid("pop-timeout must be positive".into()));
        }
        if self.snap_len == 0 {
            return Err(ConfigError::ValueInvalid("snap-len must be positive".into()));
        }
        if self.store.max_consecutive_failures == 0 {
            return Err(ConfigError::ValueInvalid(
                "store.max-consecutive-failures must be positive".into(),
            ));
        }
        if self.store.reconnect_backoff_max < self.store.reconnect_backoff {
            return Err(ConfigError::ValueInvalid(format!(
                "store.reconnect-backoff-max {:?} is less than store.reconnect-backoff {:?}",
                self.store.reconnect_backoff_max, self.store.reconnect_backoff
            )));
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        if self.worker_number > 0 {
            return self.worker_number;
        }
        let mut sys = System::new();
        sys.refresh_cpu();
        Self::workers_for_cpus(sys.cpus().len())
    }

    // one cpu is left to the capture thread
    fn workers_for_cpus(cpus: usize) -> usize {
        cpus.saturating_sub(1).max(1)
    }
}
