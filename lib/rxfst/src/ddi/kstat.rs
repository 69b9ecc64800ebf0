// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Export Rust structs as named kernel statistics.
//!
//! A provider is a struct of [`KStatU64`] fields; registering it via
//! [`KStatNamed`] publishes the counters under a module/name pair. In
//! the hosted backend there is no kstats system to register with; we
//! just allocate the stats, which lets tests verify that certain
//! statistics are incremented when expected.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::string::ToString;
use core::fmt;
use core::fmt::Display;

const KSTAT_STRLEN: usize = 31;

/// A provider of named kstats.
///
/// To update the values use the `+=` operator:
///
/// ```text
/// some_val.stats.vals.adds += 1;
/// ```
pub trait KStatProvider {
    const NUM_FIELDS: u32;
    type Snap;

    fn init(&mut self) -> Result<(), Error>;

    fn new() -> Self;

    fn num_fields(&self) -> u32 {
        Self::NUM_FIELDS
    }

    /// Return a snapshot of the stats. This is how you obtain a copy,
    /// as opposed to the traditional clone().
    fn snapshot(&self) -> Self::Snap;
}

/// Initialize and register a [`KStatProvider`].
///
/// This should be called **exactly** once for a given provider. When
/// this value is dropped the provider is unregistered.
pub struct KStatNamed<T: KStatProvider> {
    pub vals: Box<T>,
}

impl<T: KStatProvider> KStatNamed<T> {
    pub fn new(
        _module: &str,
        _name: &str,
        provider: T,
    ) -> Result<KStatNamed<T>, Error> {
        let mut vals = Box::new(provider);
        vals.init()?;
        Ok(Self { vals })
    }
}

/// A 64-bit unsigned named kstat.
pub struct KStatU64 {
    value: u64,
}

impl KStatU64 {
    pub fn init(&mut self, name: &str) -> Result<(), Error> {
        // The underlying kstat system would automatically truncate,
        // but we opt to alert the consumer instead.
        if name.len() + 1 > KSTAT_STRLEN {
            return Err(Error::NameTooLong(name.to_string()));
        }
        Ok(())
    }

    pub fn new() -> Self {
        Self { value: 0 }
    }

    pub fn set(&mut self, val: u64) {
        self.value = val;
    }

    pub fn val(&self) -> u64 {
        self.value
    }
}

impl Default for KStatU64 {
    fn default() -> Self {
        Self::new()
    }
}

impl core::ops::AddAssign<u64> for KStatU64 {
    fn add_assign(&mut self, other: u64) {
        self.value += other;
    }
}

impl core::ops::SubAssign<u64> for KStatU64 {
    fn sub_assign(&mut self, other: u64) {
        self.value -= other;
    }
}

/// A kstat error.
#[derive(Clone, Debug)]
pub enum Error {
    NameTooLong(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NameTooLong(name) => {
                write!(f, "kstat name too long: {}", name)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct TestStats {
        hits: KStatU64,
        misses: KStatU64,
    }

    impl KStatProvider for TestStats {
        const NUM_FIELDS: u32 = 2;
        type Snap = (u64, u64);

        fn init(&mut self) -> Result<(), Error> {
            self.hits.init("hits")?;
            self.misses.init("misses")?;
            Ok(())
        }

        fn new() -> Self {
            Self { hits: KStatU64::new(), misses: KStatU64::new() }
        }

        fn snapshot(&self) -> Self::Snap {
            (self.hits.val(), self.misses.val())
        }
    }

    #[test]
    fn provider_counts() {
        let mut named =
            KStatNamed::new("rxfst", "test", TestStats::new()).unwrap();
        named.vals.hits += 2;
        named.vals.misses += 1;
        named.vals.misses -= 1;
        assert_eq!(named.vals.snapshot(), (2, 0));
        assert_eq!(named.vals.num_fields(), 2);
    }

    #[test]
    fn name_too_long() {
        let mut stat = KStatU64::new();
        assert!(
            stat.init("this-name-is-way-too-long-for-a-kstat").is_err()
        );
    }
}
