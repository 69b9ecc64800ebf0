// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Firmware cache synchronization.
//!
//! The firmware target caches search entries, and on some silicon
//! revisions a single-entry cache invalidate is unreliable. Two
//! policies keep the cache honest:
//!
//! * **Immediate**: every insert/delete posts one single-entry
//!   invalidate for the affected tuple. If the post cannot be handed
//!   off, the mutation that needed it is rolled back and the caller
//!   sees `SyncFailed`: the table never advertises an entry the
//!   firmware was not told about.
//!
//! * **Bundled**: mutations only set the table's pending flag. A
//!   periodic (a long quiet period at attach, then a sub-second
//!   steady period) folds however many mutations landed
//!   since the last firing into one full-cache invalidate. A failed
//!   post is not fatal: the flag is re-armed and the next firing
//!   covers all the same ground, so staleness is bounded by one extra
//!   period.
//!
//! Commands are always posted with the table lock dropped.

use super::Result;
use super::table::FstTable;
use crate::api::FirmwareCmd;
use crate::api::FlowTuple;
use crate::api::FstError;
use crate::api::SyncMode;
use crate::api::TUPLE_WORDS;
use crate::ddi::time::Interval;
use crate::ddi::time::Periodic;
use alloc::boxed::Box;
use alloc::sync::Arc;

/// Propagate a just-published insert to the firmware cache.
pub(crate) fn flow_added(
    table: &FstTable,
    tuple: &FlowTuple,
    words: &[u32; TUPLE_WORDS],
    flow_id: u32,
) -> Result<()> {
    match table.sync_mode() {
        SyncMode::Bundled => {
            table.mark_cache_dirty();
            Ok(())
        }
        SyncMode::Immediate => {
            let cmd = FirmwareCmd::InvalidateEntry { tuple: *tuple };
            if table.channel().async_send(cmd).is_err() {
                table.rollback_insert(flow_id, words);
                return Err(FstError::SyncFailed);
            }
            table.note_inval_entry();
            Ok(())
        }
    }
}

/// Propagate a just-applied delete to the firmware cache.
pub(crate) fn flow_removed(
    table: &FstTable,
    tuple: &FlowTuple,
    words: &[u32; TUPLE_WORDS],
    flow_id: u32,
) -> Result<()> {
    match table.sync_mode() {
        SyncMode::Bundled => {
            table.mark_cache_dirty();
            Ok(())
        }
        SyncMode::Immediate => {
            let cmd = FirmwareCmd::InvalidateEntry { tuple: *tuple };
            if table.channel().async_send(cmd).is_err() {
                table.rollback_delete(flow_id, words);
                return Err(FstError::SyncFailed);
            }
            table.note_inval_entry();
            Ok(())
        }
    }
}

/// The periodic's body: fold any pending mutations into one
/// full-cache invalidate.
fn flush_pending(table: &mut Arc<FstTable>) {
    let table = table.as_ref();
    if !table.take_cache_dirty() {
        return;
    }

    if table.channel().async_send(FirmwareCmd::InvalidateAll).is_err() {
        // Leave the work pending; the next firing covers the same
        // ground.
        table.mark_cache_dirty();
        return;
    }
    table.note_inval_all();
}

/// Arm the bundling periodic for `table`. Dropping the returned
/// periodic cancels it synchronously, which must happen before the
/// table's shared region is released.
pub(crate) fn start_bundling(
    table: Arc<FstTable>,
    quiet: Interval,
    period: Interval,
) -> Periodic<Arc<FstTable>> {
    let name = format!("{}-inval", table.name());
    Periodic::with_initial_delay(
        &name,
        flush_pending,
        Box::new(table),
        quiet,
        period,
    )
}
