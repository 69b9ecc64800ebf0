// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types shared across the flow search table's driver boundary.
//!
//! Everything in this crate is `no_std` + alloc so the same
//! definitions serve the in-kernel engine and its userland consumers.

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(test)]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

use alloc::string::String;
use core::fmt;
use core::fmt::Debug;
use core::num::NonZeroU8;
use serde::Deserialize;
use serde::Serialize;
use serde::de;
use serde::de::Visitor;

pub mod cmd;
pub mod ip;
pub mod tuple;

pub use cmd::*;
pub use ip::*;
pub use tuple::*;

/// The overall version of the API. Anytime an API is added, removed,
/// or modified, this number should increment, so that user and kernel
/// can verify they were compiled for the same boundary.
pub const API_VERSION: u64 = 1;

/// Length of the secret hash key, in bytes.
pub const HASH_KEY_LEN: usize = 40;

/// Default number of entries requested for a table.
pub const FST_DEF_ENTRIES: u32 = 1024;

/// Hard ceiling on table entries. Requests above this are capped, not
/// rejected.
pub const FST_MAX_ENTRIES: u32 = 8192;

/// Default maximum probe depth for collision resolution.
pub const FST_DEF_SKID_LENGTH: u32 = 16;

/// Quiet period between attach and the first bundled cache
/// invalidation check, in milliseconds.
pub const CACHE_INVAL_QUIET_MS: u64 = 5_000;

/// Steady-state bundled cache invalidation period, in milliseconds.
pub const CACHE_INVAL_PERIOD_MS: u64 = 100;

/// The secret key feeding the flow hash.
///
/// The same key is programmed into the paired hardware unit; both
/// sides must derive identical hash values from it.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct HashKey([u8; HASH_KEY_LEN]);

impl HashKey {
    /// The default key: the well-known receive-side-scaling reference
    /// key from the Microsoft RSS specification.
    #[rustfmt::skip]
    pub const DEFAULT: Self = Self([
        0x6d, 0x5a, 0x56, 0xda, 0x25, 0x5b, 0x0e, 0xc2,
        0x41, 0x67, 0x25, 0x3d, 0x43, 0xa3, 0x8f, 0xb0,
        0xd0, 0xca, 0x2b, 0xcb, 0xae, 0x7b, 0x30, 0xb4,
        0x77, 0xcb, 0x2d, 0xa3, 0x80, 0x30, 0xf2, 0x0c,
        0x6a, 0x42, 0xb7, 0x3b, 0xbe, 0xac, 0x01, 0xfa,
    ]);

    pub const fn from_const(bytes: [u8; HASH_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8; HASH_KEY_LEN] {
        &self.0
    }
}

impl From<[u8; HASH_KEY_LEN]> for HashKey {
    fn from(bytes: [u8; HASH_KEY_LEN]) -> Self {
        Self(bytes)
    }
}

// The key is a secret; keep it out of debug output.
impl Debug for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HashKey(..)")
    }
}

impl Serialize for HashKey {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

struct HashKeyVisitor;

impl<'de> Visitor<'de> for HashKeyVisitor {
    type Value = HashKey;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{HASH_KEY_LEN} key bytes")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<HashKey, E> {
        let bytes: [u8; HASH_KEY_LEN] = v
            .try_into()
            .map_err(|_| E::invalid_length(v.len(), &self))?;
        Ok(HashKey(bytes))
    }

    fn visit_seq<A: de::SeqAccess<'de>>(
        self,
        mut seq: A,
    ) -> Result<HashKey, A::Error> {
        let mut bytes = [0u8; HASH_KEY_LEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = seq
                .next_element()?
                .ok_or_else(|| de::Error::invalid_length(i, &self))?;
        }
        Ok(HashKey(bytes))
    }
}

impl<'de> Deserialize<'de> for HashKey {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        deserializer.deserialize_bytes(HashKeyVisitor)
    }
}

/// How table mutations are propagated to the firmware-side cache.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SyncMode {
    /// Every insert/delete synchronously posts a single-entry
    /// invalidate; a failed post rolls the mutation back.
    Immediate,
    /// Mutations set a pending flag; a periodic timer folds any
    /// pending work into one full-cache invalidate.
    Bundled,
}

/// Which scopes get their own table instance.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum FstScope {
    /// One table shared by the whole device.
    Device,
    /// One table per radio.
    PerRadio,
}

/// Attach-time configuration for the flow search subsystem.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FstConfig {
    /// Master enable. When false, attach succeeds but builds nothing
    /// and lookups report `NotFound`.
    pub enabled: bool,
    /// Requested table capacity; rounded up to a power of two and
    /// capped at `entries_ceiling`.
    pub requested_entries: u32,
    pub entries_ceiling: u32,
    /// Maximum probe depth. Bounds lookup latency; never grown to
    /// paper over collisions.
    pub skid_length: u32,
    pub hash_key: HashKey,
    pub sync_mode: SyncMode,
    pub scope: FstScope,
    /// Number of radios backing `FstScope::PerRadio`.
    pub radios: NonZeroU8,
    /// Bundled-mode quiet period after attach, in milliseconds.
    pub quiet_period_ms: u64,
    /// Bundled-mode steady-state period, in milliseconds.
    pub bundle_period_ms: u64,
}

impl Default for FstConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requested_entries: FST_DEF_ENTRIES,
            entries_ceiling: FST_MAX_ENTRIES,
            skid_length: FST_DEF_SKID_LENGTH,
            hash_key: HashKey::DEFAULT,
            sync_mode: SyncMode::Immediate,
            scope: FstScope::Device,
            radios: NonZeroU8::MIN,
            quiet_period_ms: CACHE_INVAL_QUIET_MS,
            bundle_period_ms: CACHE_INVAL_PERIOD_MS,
        }
    }
}

impl FstConfig {
    /// Validate the parts of the config that cannot be normalized
    /// away.
    pub fn check(&self) -> Result<(), FstError> {
        if self.requested_entries == 0 {
            return Err(FstError::BadConfig(String::from(
                "requested_entries must be nonzero",
            )));
        }

        if self.entries_ceiling == 0
            || !self.entries_ceiling.is_power_of_two()
        {
            return Err(FstError::BadConfig(format!(
                "entries_ceiling must be a nonzero power of two: {}",
                self.entries_ceiling
            )));
        }

        if self.skid_length == 0 {
            return Err(FstError::BadConfig(String::from(
                "skid_length must be nonzero",
            )));
        }

        Ok(())
    }
}
