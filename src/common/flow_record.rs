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

use std::{
    fmt,
    hash::{Hash, Hasher},
    net::Ipv4Addr,
};

use thiserror::Error;

use public::{
    bytes::{read_ipv4_addr, read_u16_be},
    consts::*,
};

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("not an ipv4 frame, ether type {0:#06x}")]
    NotIpv4(u16),
    #[error("unexpected ip version {0}")]
    BadVersion(u8),
}

/// Address pair a counter is kept for. Direction matters, `a -> b` and
/// `b -> a` are two different flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FlowKey {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Hash for FlowKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let key = ((u32::from(self.src) as u64) << 32) + u32::from(self.dst) as u64;
        key.hash(state)
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.src, self.dst)
    }
}

/// What is kept from one captured packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowRecord {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    // ip total length in host order
    pub byte_length: u16,
}

impl FlowRecord {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, byte_length: u16) -> Self {
        Self {
            src,
            dst,
            byte_length,
        }
    }

    pub fn key(&self) -> FlowKey {
        FlowKey {
            src: self.src,
            dst: self.dst,
        }
    }

    /// Reads the record out of an ethernet frame, accepting at most one
    /// 802.1Q tag in front of the IPv4 header.
    pub fn parse(frame: &[u8]) -> Result<Self, DecodeError> {
        if frame.len() < IPV4_PACKET_SIZE {
            return Err(DecodeError::TooShort(frame.len()));
        }
        let mut offset = 0;
        let mut eth_type = read_u16_be(&frame[FIELD_OFFSET_ETH_TYPE..]);
        if eth_type == ETH_TYPE_DOT1Q {
            offset = VLAN_HEADER_SIZE;
            if frame.len() < IPV4_PACKET_SIZE + offset {
                return Err(DecodeError::TooShort(frame.len()));
            }
            eth_type = read_u16_be(&frame[FIELD_OFFSET_ETH_TYPE + offset..]);
        }
        if eth_type != ETH_TYPE_IPV4 {
            return Err(DecodeError::NotIpv4(eth_type));
        }
        let version = frame[FIELD_OFFSET_VERSION_IHL + offset] >> 4;
        if version != 4 {
            return Err(DecodeError::BadVersion(version));
        }
        Ok(Self::new(
            read_ipv4_addr(&frame[FIELD_OFFSET_SIP + offset..]),
            read_ipv4_addr(&frame[FIELD_OFFSET_DIP + offset..]),
            read_u16_be(&frame[FIELD_OFFSET_TOTAL_LEN + offset..]),
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn ipv4_frame(src: [u8; 4], dst: [u8; 4], total_len: u16) -> Vec<u8> {
        let mut frame = vec![0u8; IPV4_PACKET_SIZE];
        frame[FIELD_OFFSET_ETH_TYPE..FIELD_OFFSET_ETH_TYPE + 2]
            .copy_from_slice(&ETH_TYPE_IPV4.to_be_bytes());
        frame[FIELD_OFFSET_VERSION_IHL] = 0x45;
        frame[FIELD_OFFSET_TOTAL_LEN..FIELD_OFFSET_TOTAL_LEN + 2]
            .copy_from_slice(&total_len.to_be_bytes());
        frame[FIELD_OFFSET_SIP..FIELD_OFFSET_SIP + 4].copy_from_slice(&src);
        frame[FIELD_OFFSET_DIP..FIELD_OFFSET_DIP + 4].copy_from_slice(&dst);
        frame
    }

    #[test]
    fn parse_ipv4() {
        let frame = ipv4_frame([10, 0, 0, 1], [10, 0, 0, 2], 1500);
        let record = FlowRecord::parse(&frame).unwrap();
        assert_eq!(record.src, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(record.dst, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(record.byte_length, 1500);
    }

    #[test]
    fn parse_vlan_tagged() {
        let plain = ipv4_frame([192, 168, 1, 7], [8, 8, 8, 8], 60);
        let mut frame = plain[..FIELD_OFFSET_ETH_TYPE].to_vec();
        frame.extend_from_slice(&ETH_TYPE_DOT1Q.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x64]);
        frame.extend_from_slice(&plain[FIELD_OFFSET_ETH_TYPE..]);

        let record = FlowRecord::parse(&frame).unwrap();
        assert_eq!(record.key().to_string(), "192.168.1.7,8.8.8.8");
        assert_eq!(record.byte_length, 60);
    }

    #[test]
    fn parse_rejects_other_frames() {
        let frame = ipv4_frame([10, 0, 0, 1], [10, 0, 0, 2], 100);
        assert_eq!(
            FlowRecord::parse(&frame[..20]),
            Err(DecodeError::TooShort(20))
        );

        let mut arp = frame.clone();
        arp[FIELD_OFFSET_ETH_TYPE..FIELD_OFFSET_ETH_TYPE + 2].copy_from_slice(&[0x08, 0x06]);
        assert_eq!(FlowRecord::parse(&arp), Err(DecodeError::NotIpv4(0x0806)));

        let mut v6 = frame.clone();
        v6[FIELD_OFFSET_VERSION_IHL] = 0x60;
        assert_eq!(FlowRecord::parse(&v6), Err(DecodeError::BadVersion(6)));
    }

    #[test]
    fn key_direction_matters() {
        let a = FlowRecord::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 1);
        let b = FlowRecord::new(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 1), 1);
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key().to_string(), "10.0.0.1,10.0.0.2");
        assert_eq!(b.key().to_string(), "10.0.0.2,10.0.0.1");
    }
}
