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

mod redis;

pub use self::redis::{RedisConnector, RedisStore};

use thiserror::Error;

use crate::common::FlowKey;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connect to counter store {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("increment {key} failed: {reason}")]
    Increment { key: String, reason: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// One connection to the counter store. Dropping it disconnects.
pub trait CounterStore: Send {
    /// Adds `amount` to the counter of `key` and returns the new total.
    fn increment(&mut self, key: &FlowKey, amount: u64) -> Result<u64>;
}

pub trait StoreConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn CounterStore>>;

    fn endpoint(&self) -> String;
}

pub fn store_key(prefix: &str, key: &FlowKey) -> String {
    format!("{}{}", prefix, key)
}
