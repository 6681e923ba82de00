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

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // no frame arrived within the capture read timeout
    #[error("capture read timeout")]
    Timeout,
    #[error("capture source finished")]
    Finished,
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("invalid capture filter {expression:?}: {reason}")]
    FilterInvalid { expression: String, reason: String },
    #[error("device {device} has link type {link_type}, only ethernet is supported")]
    UnsupportedLinkType { device: String, link_type: String },
    #[error("capture error: {0}")]
    Pcap(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
