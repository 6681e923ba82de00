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

mod bounded_queue;

pub use bounded_queue::{bounded, CounterSnapshot, Receiver, Sender, StatsHandle};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum Error<T> {
    #[error("the queue receiving operation has timed out")]
    Timeout,
    #[error("the queue is full, message dropped")]
    Full(Option<T>),
    #[error("the queue has terminated")]
    Terminated(Option<T>),
}

/// What a sender does when the queue holds `capacity` messages.
///
/// `Block` parks the sender until a receiver frees a slot or the queue is
/// closed, so nothing is lost but the producer stalls with its consumers.
/// `Drop` hands the message back in `Error::Full` at once and counts it in
/// the `dropped` counter, so the producer never stalls.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FullPolicy {
    Block,
    #[default]
    Drop,
}
