// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The receive flow search table engine.
//!
//! This crate implements the host side of a wireless adapter's
//! hardware flow classification table: a secret-keyed, hardware-exact
//! flow hash, a bounded-probe search table mirrored into device-shared
//! memory, and the firmware cache synchronization the hardware's
//! erratum demands.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

extern crate alloc;

#[cfg(any(feature = "engine", test))]
pub mod api;
#[cfg(any(feature = "std", test))]
pub mod ddi;
#[cfg(any(feature = "engine", test))]
pub mod engine;
