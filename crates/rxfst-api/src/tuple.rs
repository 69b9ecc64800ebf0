// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The flow tuple: the 5-tuple identity of a receive flow.

use super::ip::Ipv4Addr;
use super::ip::Ipv6Addr;
use super::ip::Protocol;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// Number of 32-bit words in the flattened tuple representation.
pub const TUPLE_WORDS: usize = 10;

/// The fixed prefix occupying the upper 96 bits of an IPv4 flow's
/// addresses: the IPv4-mapped IPv6 prefix `::ffff:0:0/96`, expressed
/// as address words, most significant first.
pub const IPV4_MAPPED_PREFIX: [u32; 3] = [0x0000_0000, 0x0000_0000, 0x0000_FFFF];

/// The identity of a receive flow.
///
/// Addresses are held as four 32-bit words, most significant first,
/// which natively accommodates IPv4 addresses mapped into IPv6 the way
/// the flow search hardware expects them. An IPv4 tuple always carries
/// the [`IPV4_MAPPED_PREFIX`] in its upper address words; the
/// constructors enforce this, so field-wise equality of two tuples is
/// equality of flows.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct FlowTuple {
    src_ip: [u32; 4],
    dst_ip: [u32; 4],
    src_port: u16,
    dst_port: u16,
    proto: u8,
    ipv4: bool,
}

impl FlowTuple {
    /// Build the tuple of an IPv4 flow. The upper 96 bits of each
    /// address are set to the IPv4-mapped prefix.
    pub fn new_v4(
        src: Ipv4Addr,
        src_port: u16,
        dst: Ipv4Addr,
        dst_port: u16,
        proto: Protocol,
    ) -> Self {
        let p = IPV4_MAPPED_PREFIX;
        Self {
            src_ip: [p[0], p[1], p[2], u32::from(src)],
            dst_ip: [p[0], p[1], p[2], u32::from(dst)],
            src_port,
            dst_port,
            proto: proto.into(),
            ipv4: true,
        }
    }

    /// Build the tuple of an IPv6 flow.
    pub fn new_v6(
        src: Ipv6Addr,
        src_port: u16,
        dst: Ipv6Addr,
        dst_port: u16,
        proto: Protocol,
    ) -> Self {
        Self {
            src_ip: src.words(),
            dst_ip: dst.words(),
            src_port,
            dst_port,
            proto: proto.into(),
            ipv4: false,
        }
    }

    /// Rebuild a tuple from its flattened words, as read back out of a
    /// table slot.
    pub fn from_words(words: [u32; TUPLE_WORDS], ipv4: bool) -> Self {
        Self {
            src_ip: [words[0], words[1], words[2], words[3]],
            dst_ip: [words[4], words[5], words[6], words[7]],
            src_port: (words[8] & 0xFFFF) as u16,
            dst_port: (words[8] >> 16) as u16,
            proto: (words[9] & 0xFF) as u8,
            ipv4,
        }
    }

    /// The flattened identity of the tuple: eight address words
    /// (source then destination, most significant first), the combined
    /// ports word with the destination port in the upper half, and the
    /// protocol word. This ordering matches the address/port/protocol
    /// dwords of the shared search entry.
    pub fn words(&self) -> [u32; TUPLE_WORDS] {
        [
            self.src_ip[0],
            self.src_ip[1],
            self.src_ip[2],
            self.src_ip[3],
            self.dst_ip[0],
            self.dst_ip[1],
            self.dst_ip[2],
            self.dst_ip[3],
            (u32::from(self.dst_port) << 16) | u32::from(self.src_port),
            u32::from(self.proto),
        ]
    }

    pub fn src_ip_words(&self) -> [u32; 4] {
        self.src_ip
    }

    pub fn dst_ip_words(&self) -> [u32; 4] {
        self.dst_ip
    }

    pub fn src_port(&self) -> u16 {
        self.src_port
    }

    pub fn dst_port(&self) -> u16 {
        self.dst_port
    }

    pub fn protocol(&self) -> Protocol {
        Protocol::from(self.proto)
    }

    pub fn is_ipv4(&self) -> bool {
        self.ipv4
    }
}

impl Display for FlowTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let proto = self.protocol();

        if self.ipv4 {
            let sip = Ipv4Addr::from(self.src_ip[3]);
            let dip = Ipv4Addr::from(self.dst_ip[3]);
            write!(
                f,
                "{proto}:{sip}:{}:{dip}:{}",
                self.src_port, self.dst_port
            )
        } else {
            write!(
                f,
                "{proto}:[{:08x}:{:08x}:{:08x}:{:08x}]:{}:\
                 [{:08x}:{:08x}:{:08x}:{:08x}]:{}",
                self.src_ip[0],
                self.src_ip[1],
                self.src_ip[2],
                self.src_ip[3],
                self.src_port,
                self.dst_ip[0],
                self.dst_ip[1],
                self.dst_ip[2],
                self.dst_ip[3],
                self.dst_port,
            )
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn v4(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn v4_mapped_prefix() {
        let t = FlowTuple::new_v4(
            v4("1.2.3.4"),
            1000,
            v4("5.6.7.8"),
            2000,
            Protocol::TCP,
        );
        assert_eq!(
            t.words(),
            [
                0,
                0,
                0x0000_FFFF,
                0x0102_0304,
                0,
                0,
                0x0000_FFFF,
                0x0506_0708,
                (2000 << 16) | 1000,
                6,
            ]
        );
        assert!(t.is_ipv4());
    }

    #[test]
    fn words_round_trip() {
        let t = FlowTuple::new_v6(
            "fe80::1:2".parse().unwrap(),
            53,
            "2001:db8::9".parse().unwrap(),
            49152,
            Protocol::UDP,
        );
        assert_eq!(FlowTuple::from_words(t.words(), false), t);
    }

    #[test]
    fn field_equality() {
        let a = FlowTuple::new_v4(
            v4("10.0.0.1"),
            10,
            v4("10.0.0.2"),
            20,
            Protocol::UDP,
        );
        let b = FlowTuple::new_v4(
            v4("10.0.0.1"),
            10,
            v4("10.0.0.2"),
            20,
            Protocol::UDP,
        );
        let c = FlowTuple::new_v4(
            v4("10.0.0.1"),
            11,
            v4("10.0.0.2"),
            20,
            Protocol::UDP,
        );
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
