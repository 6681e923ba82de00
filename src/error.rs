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

use crate::{capture, config::ConfigError, sniffer::State, store};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Capture(#[from] capture::Error),
    #[error(transparent)]
    Store(#[from] store::Error),
    #[error("sniffer cannot start in state {0:?}")]
    InvalidState(State),
    #[error("spawn thread {name} failed: {source}")]
    ThreadSpawn {
        name: String,
        source: std::io::Error,
    },
    #[error("thread {0} panicked")]
    ThreadPanicked(String),
    #[error("all {0} store workers failed")]
    WorkersExhausted(usize),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
