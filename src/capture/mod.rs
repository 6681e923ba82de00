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

mod error;
mod libpcap;
mod producer;

pub use error::{Error, Result};
pub use libpcap::{lib_version, Libpcap};
pub use producer::{CaptureCounter, CaptureEnd, CaptureProducer};

/// A source of raw ethernet frames.
///
/// `next_frame` returns `Error::Timeout` when nothing arrived within the
/// source's read timeout and `Error::Finished` once no more frames will come.
/// Any other error is fatal for the capture.
pub trait PacketSource: Send {
    fn next_frame(&mut self) -> Result<&[u8]>;
}
