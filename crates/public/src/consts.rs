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

pub const MAC_ADDR_LEN: usize = 6;
pub const ETH_TYPE_LEN: usize = 2;
pub const ETH_HEADER_SIZE: usize = MAC_ADDR_LEN * 2 + ETH_TYPE_LEN;
pub const VLAN_HEADER_SIZE: usize = 4;
pub const IPV4_HEADER_SIZE: usize = 20;

// min packet size
pub const IPV4_PACKET_SIZE: usize = ETH_HEADER_SIZE + IPV4_HEADER_SIZE; // 34

pub const ETH_TYPE_IPV4: u16 = 0x0800;
pub const ETH_TYPE_DOT1Q: u16 = 0x8100;

pub const FIELD_OFFSET_ETH_TYPE: usize = 12;
// offsets below assume no DOT1Q tag, add VLAN_HEADER_SIZE when tagged
pub const FIELD_OFFSET_VERSION_IHL: usize = 14;
pub const FIELD_OFFSET_TOTAL_LEN: usize = 16;
pub const FIELD_OFFSET_SIP: usize = 26;
pub const FIELD_OFFSET_DIP: usize = 30;
