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

// callers check the slice length, a short slice is a bug
pub fn read_u16_be(bs: &[u8]) -> u16 {
    assert!(bs.len() >= 2);
    u16::from_be_bytes([bs[0], bs[1]])
}

pub fn read_ipv4_addr(bs: &[u8]) -> std::net::Ipv4Addr {
    assert!(bs.len() >= 4);
    std::net::Ipv4Addr::new(bs[0], bs[1], bs[2], bs[3])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_big_endian() {
        let bs = [0x12, 0x34, 0x56];
        assert_eq!(read_u16_be(&bs), 0x1234);
        assert_eq!(read_u16_be(&bs[1..]), 0x3456);
        assert_eq!(
            read_ipv4_addr(&[10, 0, 0, 1]),
            std::net::Ipv4Addr::new(10, 0, 0, 1)
        );
    }

    #[test]
    #[should_panic]
    fn read_short_slice() {
        read_ipv4_addr(&[1, 2, 3]);
    }
}
