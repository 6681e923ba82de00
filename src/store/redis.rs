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

use std::time::Duration;

use log::debug;
use redis::{Client, Connection};

use super::{store_key, CounterStore, Error, Result, StoreConnector};
use crate::common::FlowKey;
use crate::config::StoreConfig;

pub struct RedisConnector {
    client: Client,
    endpoint: String,
    key_prefix: String,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl RedisConnector {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let endpoint = format!("{}:{}", config.address, config.port);
        let client = Client::open(format!("redis://{}/", endpoint)).map_err(|e| Error::Connect {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            client,
            endpoint,
            key_prefix: config.key_prefix.clone(),
            connect_timeout: config.connect_timeout,
            io_timeout: config.io_timeout,
        })
    }
}

impl StoreConnector for RedisConnector {
    fn connect(&self) -> Result<Box<dyn CounterStore>> {
        let connect_error = |e: redis::RedisError| Error::Connect {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        };
        let conn = self
            .client
            .get_connection_with_timeout(self.connect_timeout)
            .map_err(connect_error)?;
        conn.set_read_timeout(Some(self.io_timeout))
            .map_err(connect_error)?;
        conn.set_write_timeout(Some(self.io_timeout))
            .map_err(connect_error)?;
        debug!("connected to redis {}", self.endpoint);
        Ok(Box::new(RedisStore {
            conn,
            key_prefix: self.key_prefix.clone(),
        }))
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

pub struct RedisStore {
    conn: Connection,
    key_prefix: String,
}

impl CounterStore for RedisStore {
    fn increment(&mut self, key: &FlowKey, amount: u64) -> Result<u64> {
        let key = store_key(&self.key_prefix, key);
        redis::cmd("INCRBY")
            .arg(&key)
            .arg(amount)
            .query::<u64>(&mut self.conn)
            .map_err(|e| Error::Increment {
                key,
                reason: e.to_string(),
            })
    }
}
