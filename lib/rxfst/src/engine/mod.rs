// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The flow search engine.
//!
//! All code under this namespace is guarded by the `engine` feature
//! flag; the table, cache-sync, and manager modules additionally need
//! the hosted `std` backend for the ddi layer.

#[cfg(any(feature = "std", test))]
pub mod cache;
pub mod fse;
pub mod hash;
#[cfg(any(feature = "std", test))]
pub mod manager;
#[cfg(any(feature = "std", test))]
pub mod table;

use crate::api::FirmwareCmd;
use crate::api::FstError;

pub type Result<T> = core::result::Result<T, FstError>;

/// The command could not be handed off to the channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SendError;

/// The control channel to the firmware target.
///
/// Posting is fire-and-forget: a successful return means the command
/// was handed off, not that the target acted on it. Implementations
/// must never block indefinitely; table code calls this with its lock
/// dropped but from paths that cannot sleep.
pub trait FirmwareChannel: Send + Sync {
    fn async_send(&self, cmd: FirmwareCmd) -> core::result::Result<(), SendError>;
}
