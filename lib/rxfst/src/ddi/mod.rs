// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The platform seam the engine codes against: locking, time,
//! named counters, and device-visible memory. The hosted backend in
//! this tree sits on std; a kernel backend plugs in at the same
//! signatures.

pub mod dma;
pub mod kstat;
pub mod sync;
pub mod time;
