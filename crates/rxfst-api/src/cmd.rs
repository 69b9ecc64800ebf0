// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Commands sent to the firmware target, entry references handed back
//! to callers, and the dump types used by the debug interface.

use super::HashKey;
use super::tuple::FlowTuple;
use alloc::string::String;
use alloc::vec::Vec;
use serde::Deserialize;
use serde::Serialize;

/// Width of the REO destination indication accepted at the driver
/// boundary. The shared entry reserves one more bit; the extra
/// encodings are not legal for host-programmed flows.
pub const REO_DEST_IND_BITS: u32 = 4;

/// Largest REO destination indication a flow may carry.
pub const MAX_REO_DEST_IND: u8 = (1 << REO_DEST_IND_BITS) - 1;

/// The errors the flow search table can return.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum FstError {
    /// No device-visible memory for the shared table. Fatal to
    /// attach; the feature stays disabled for the scope.
    AllocFail {
        bytes: usize,
    },
    BadConfig(String),
    /// The tuple is already present. Informational; the table is
    /// unchanged and the incumbent's id is returned.
    FlowExists {
        flow_id: u32,
    },
    NotFound,
    /// A synchronous cache invalidate could not be confirmed sent and
    /// the mutation that required it was rolled back.
    SyncFailed,
    /// The skid window was exhausted without finding a free slot.
    TableFull,
}

/// How the hardware decides the REO destination for a matching flow.
///
/// Encodings per the shared entry's `reo_destination_handler` field.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[repr(u8)]
pub enum DestHandler {
    /// Follow this entry's destination indication.
    UseFt = 0,
    /// Use the address search + peer table entry.
    UseAspt = 1,
    /// Follow this entry (alternate encoding).
    UseFt2 = 2,
    /// Use the CCE super-rule.
    UseCce = 3,
}

impl DestHandler {
    /// Decode the two-bit field value.
    pub fn from_bits(val: u8) -> Self {
        match val & 0b11 {
            0 => Self::UseFt,
            1 => Self::UseAspt,
            2 => Self::UseFt2,
            _ => Self::UseCce,
        }
    }
}

impl From<DestHandler> for u8 {
    fn from(h: DestHandler) -> u8 {
        h as u8
    }
}

/// The steering decision programmed alongside a flow tuple.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FlowSteering {
    /// REO destination indication: which reorder/steering target the
    /// flow's packets are handed to. Only the low
    /// [`REO_DEST_IND_BITS`] bits are legal.
    pub reo_dest_ind: u8,
    pub dest_handler: DestHandler,
    /// Opaque tag returned to software when the entry matches.
    pub metadata: u32,
    /// Overriding indication to drop matching MSDUs.
    pub msdu_drop: bool,
}

/// A reference to a live table entry, as returned by insert/find.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct EntryRef {
    /// The slot index the entry occupies.
    pub flow_id: u32,
    /// The masked base index the tuple hashed to.
    pub flow_hash: u32,
}

/// A command posted to the firmware target. Delivery is
/// fire-and-forget; the wire framing is the channel's business.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum FirmwareCmd {
    /// Program the table geometry and hash key into the target.
    FstSetup {
        base_paddr: u64,
        max_entries: u32,
        skid_length: u32,
        hash_key: HashKey,
    },
    /// Invalidate the target's cached copy of the entry matching
    /// `tuple`.
    InvalidateEntry { tuple: FlowTuple },
    /// Invalidate the target's entire cached view of the table.
    InvalidateAll,
}

/// One table entry as presented by the debug interface.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FlowEntryDump {
    pub flow_id: u32,
    pub flow_hash: u32,
    pub tuple: FlowTuple,
    pub steering: FlowSteering,
    pub msdu_count: u64,
}

/// The response to a table dump request.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DumpFstResp {
    pub max_entries: u32,
    pub skid_length: u32,
    pub num_valid: u32,
    pub flows: Vec<FlowEntryDump>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dest_handler_bits() {
        assert_eq!(DestHandler::from_bits(0), DestHandler::UseFt);
        assert_eq!(DestHandler::from_bits(1), DestHandler::UseAspt);
        assert_eq!(DestHandler::from_bits(2), DestHandler::UseFt2);
        assert_eq!(DestHandler::from_bits(3), DestHandler::UseCce);
        assert_eq!(u8::from(DestHandler::UseCce), 3);
    }

    #[test]
    fn cmd_round_trip() {
        let cmd = FirmwareCmd::FstSetup {
            base_paddr: 0xDEAD_B000,
            max_entries: 1024,
            skid_length: 16,
            hash_key: HashKey::DEFAULT,
        };
        let bytes = postcard::to_allocvec(&cmd).unwrap();
        let back: FirmwareCmd = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, cmd);
    }
}
