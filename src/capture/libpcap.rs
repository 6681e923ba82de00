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

use std::ffi::CStr;
use std::time::Duration;

use log::{debug, info};
use pcap::{Active, Capture, Device, Linktype};

use super::{Error, PacketSource, Result};

/// Version string of the linked libpcap.
pub fn lib_version() -> String {
    // libpcap returns a static nul terminated string
    unsafe { CStr::from_ptr(pcap_sys::pcap_lib_version()) }
        .to_string_lossy()
        .into_owned()
}

pub struct Libpcap {
    device: String,
    capture: Capture<Active>,
}

impl Libpcap {
    /// Opens `device` for live capture, or the first device libpcap reports
    /// when `device` is empty.
    pub fn open(device: &str, snap_len: u32, promisc: bool, timeout: Duration) -> Result<Self> {
        let device = if device.is_empty() {
            Self::default_device()?
        } else {
            device.to_owned()
        };
        let capture = Capture::from_device(device.as_str())
            .and_then(|c| {
                c.promisc(promisc)
                    .snaplen(snap_len.min(i32::MAX as u32) as i32)
                    .timeout(timeout.as_millis().clamp(1, i32::MAX as u128) as i32)
                    .open()
            })
            .map_err(|e| Error::DeviceUnavailable(format!("{}: {}", device, e)))?;

        let link_type = capture.get_datalink();
        if link_type != Linktype::ETHERNET {
            return Err(Error::UnsupportedLinkType {
                link_type: link_type
                    .get_name()
                    .unwrap_or_else(|_| format!("{}", link_type.0)),
                device,
            });
        }
        info!(
            "capture opened on {} snaplen={} promisc={} timeout={:?}",
            device, snap_len, promisc, timeout
        );
        Ok(Self { device, capture })
    }

    fn default_device() -> Result<String> {
        let devices = Device::list().map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
        match devices.into_iter().next() {
            Some(d) => {
                debug!("use default capture device {}", d.name);
                Ok(d.name)
            }
            None => Err(Error::DeviceUnavailable("no capture device found".to_owned())),
        }
    }

    pub fn set_filter(&mut self, expression: &str) -> Result<()> {
        if expression.is_empty() {
            return Ok(());
        }
        self.capture
            .filter(expression, true)
            .map_err(|e| Error::FilterInvalid {
                expression: expression.to_owned(),
                reason: e.to_string(),
            })?;
        info!("capture filter on {} set to {:?}", self.device, expression);
        Ok(())
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

impl PacketSource for Libpcap {
    fn next_frame(&mut self) -> Result<&[u8]> {
        match self.capture.next_packet() {
            Ok(packet) => Ok(packet.data),
            Err(pcap::Error::TimeoutExpired) => Err(Error::Timeout),
            Err(pcap::Error::NoMorePackets) => Err(Error::Finished),
            Err(e) => Err(Error::Pcap(e.to_string())),
        }
    }
}
