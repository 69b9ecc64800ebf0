// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The keyed flow hash.
//!
//! The hardware classifies a flow by a truncated Toeplitz hash of its
//! tuple under a secret 320-bit key, and the host must reproduce that
//! value bit for bit to probe the same slots the hardware does. A
//! bit-serial Toeplitz is far too slow for the receive path, so the
//! key is expanded once, at attach, into a per-byte-position cache of
//! partial hashes; computing a hash is then 37 table lookups and XORs.

use crate::api::FlowTuple;
use crate::api::HASH_KEY_LEN;
use crate::api::HashKey;
use alloc::vec;
use alloc::vec::Vec;

/// Bits of the key that participate in the hash. The remaining five
/// bits of the 320-bit key are never consumed by the window walk.
pub const HASH_KEY_BITS: u32 = 315;

/// Right shift applied to the hash accumulator before masking; a
/// documented constant of the paired hardware.
pub const FLOW_HASH_SHIFT: u32 = 12;

// Rotating the key left by this amount exposes the participating 315
// bits at byte boundaries.
const KEY_SHIFT: u32 = 5;

// Bytes of serialized tuple that feed the hash: eight address words,
// the combined-ports word, and the protocol byte.
const HASH_DATA_BYTES: usize = 37;

// The serialization buffer is padded out to the key length.
const HASH_INPUT_BYTES: usize = HASH_KEY_LEN;

/// Hashes flow tuples to table indices, exactly as the paired
/// hardware does for the same key.
pub struct TupleHasher {
    mask: u32,
    // key_cache[i][v]: the partial hash contributed by byte value `v`
    // at data byte position `i`.
    cache: Vec<[u32; 256]>,
}

impl TupleHasher {
    /// Derive the key cache for `key` and a table of `max_entries`
    /// slots. `max_entries` must be a power of two.
    pub fn new(key: &HashKey, max_entries: u32) -> Self {
        debug_assert!(max_entries.is_power_of_two());
        let shifted = shifted_key(key.bytes());
        Self { mask: max_entries - 1, cache: build_cache(&shifted) }
    }

    /// Hash `tuple` to its base table index. Pure: identical key and
    /// tuple always yield the identical value, and the value is
    /// always in `[0, max_entries)`.
    pub fn hash(&self, tuple: &FlowTuple) -> u32 {
        (self.hash32(tuple) >> FLOW_HASH_SHIFT) & self.mask
    }

    /// The full 32-bit keyed hash of `tuple`, before truncation.
    pub fn hash32(&self, tuple: &FlowTuple) -> u32 {
        let data = hash_input(tuple);
        let mut hash = 0;

        // Data bytes are consumed from the last toward the first;
        // cache row i holds the key window for the i-th byte consumed.
        for i in 0..HASH_DATA_BYTES {
            hash ^= self.cache[i][usize::from(data[HASH_DATA_BYTES - 1 - i])];
        }

        hash
    }
}

/// The key as the cache builder wants it: rotated so the 315
/// participating bits sit at byte boundaries, then byte-reversed so
/// the window walk reads forward.
fn shifted_key(key: &[u8; HASH_KEY_LEN]) -> [u8; HASH_KEY_LEN] {
    let mut shifted = [0u8; HASH_KEY_LEN];
    for i in 0..HASH_KEY_LEN {
        let next = if i + 1 < HASH_KEY_LEN { key[i + 1] } else { 0 };
        shifted[i] = (key[i] << KEY_SHIFT) | (next >> (8 - KEY_SHIFT));
    }
    shifted.reverse();
    shifted
}

fn build_cache(sk: &[u8; HASH_KEY_LEN]) -> Vec<[u32; 256]> {
    let mut cache = vec![[0u32; 256]; HASH_KEY_LEN];

    // A 32-bit window over the key, slid one byte per row.
    let mut cur = u32::from_be_bytes([sk[0], sk[1], sk[2], sk[3]]);

    for (i, row) in cache.iter_mut().enumerate() {
        let next = if i + 4 < HASH_KEY_LEN { sk[i + 4] } else { 0 };

        // The eight windows at each bit offset within this byte.
        let mut win = [0u32; 8];
        win[0] = cur;
        for bit in 1..8 {
            win[bit] = (cur << bit) | (u32::from(next) >> (8 - bit));
        }

        // For each possible byte value, XOR the windows of its set
        // bits, most significant bit first.
        for (val, slot) in row.iter_mut().enumerate() {
            let mut hash = 0;
            for (bit, w) in win.iter().enumerate() {
                if val & (0x80 >> bit) != 0 {
                    hash ^= w;
                }
            }
            *slot = hash;
        }

        cur = (cur << 8) | u32::from(next);
    }

    cache
}

/// Serialize a tuple into the 40-byte hash input: address words in
/// network byte order, then the combined-ports and protocol words in
/// little-endian order (the order the hardware consumes them in),
/// zero-padded to the key length.
fn hash_input(tuple: &FlowTuple) -> [u8; HASH_INPUT_BYTES] {
    let words = tuple.words();
    let mut out = [0u8; HASH_INPUT_BYTES];

    for (i, w) in words[..8].iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&w.to_be_bytes());
    }
    out[32..36].copy_from_slice(&words[8].to_le_bytes());
    out[36..40].copy_from_slice(&words[9].to_le_bytes());

    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::Ipv4Addr;
    use crate::api::Protocol;

    fn golden_tuple() -> FlowTuple {
        FlowTuple::new_v4(
            "1.2.3.4".parse::<Ipv4Addr>().unwrap(),
            1000,
            "5.6.7.8".parse::<Ipv4Addr>().unwrap(),
            2000,
            Protocol::TCP,
        )
    }

    // Regression-locks the hash against silent drift: these constants
    // were recorded from this implementation and cross-checked against
    // a bit-serial Toeplitz.
    #[test]
    fn golden_vector() {
        let hasher = TupleHasher::new(&HashKey::DEFAULT, 2048);
        assert_eq!(hasher.hash32(&golden_tuple()), 0x2C8E_6D60);
        assert_eq!(hasher.hash(&golden_tuple()), 230);

        let hasher = TupleHasher::new(&HashKey::DEFAULT, 128);
        assert_eq!(hasher.hash(&golden_tuple()), 102);
    }

    #[test]
    fn pure_and_in_range() {
        let hasher = TupleHasher::new(&HashKey::DEFAULT, 256);
        for port in [1u16, 80, 443, 8080, 65535] {
            let t = FlowTuple::new_v4(
                "10.1.2.3".parse().unwrap(),
                port,
                "10.4.5.6".parse().unwrap(),
                443,
                Protocol::UDP,
            );
            let idx = hasher.hash(&t);
            assert_eq!(idx, hasher.hash(&t));
            assert!(idx < 256);
        }
    }

    #[test]
    fn input_layout() {
        let data = hash_input(&golden_tuple());
        // IPv4-mapped source address: ::ffff:1.2.3.4, network order.
        assert_eq!(&data[..16], &[
            0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF, 1, 2, 3, 4,
        ]);
        // Combined ports word (dst << 16 | src), little-endian.
        assert_eq!(&data[32..36], &[0xE8, 0x03, 0xD0, 0x07]);
        // Protocol byte, then zero padding.
        assert_eq!(&data[36..], &[6, 0, 0, 0]);
    }

    // The cache must compute the same function as a bit-serial
    // Toeplitz over the reversed data under the shifted key.
    fn toeplitz_bit_serial(key: &[u8], data: &[u8]) -> u32 {
        let mut hash: u32 = 0;
        let mut v = u32::from_be_bytes([key[0], key[1], key[2], key[3]]);
        for i in 0..data.len() {
            for b in 0..8 {
                if data[i] & (1 << (7 - b)) != 0 {
                    hash ^= v;
                }
                v <<= 1;
                if i + 4 < key.len() && key[i + 4] & (1 << (7 - b)) != 0 {
                    v |= 1;
                }
            }
        }
        hash
    }

    #[test]
    fn matches_bit_serial() {
        let hasher = TupleHasher::new(&HashKey::DEFAULT, 1024);
        let sk = shifted_key(HashKey::DEFAULT.bytes());

        let tuples = [
            golden_tuple(),
            FlowTuple::new_v4(
                "172.16.254.1".parse().unwrap(),
                61234,
                "8.8.4.4".parse().unwrap(),
                53,
                Protocol::UDP,
            ),
            FlowTuple::new_v6(
                "2001:db8::dead:beef".parse().unwrap(),
                4500,
                "fe80::1".parse().unwrap(),
                4500,
                Protocol::UDP,
            ),
        ];

        for t in tuples {
            let data = hash_input(&t);
            let mut rev: Vec<u8> =
                data[..HASH_DATA_BYTES].iter().copied().collect();
            rev.reverse();
            assert_eq!(hasher.hash32(&t), toeplitz_bit_serial(&sk, &rev));
        }
    }
}
