// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The shared flow search entry.
//!
//! The hardware walks the table as an array of 16-dword entries whose
//! field widths and offsets are a stable contract; this module is the
//! single place that contract is spelled out. Everything else in the
//! crate goes through [`FseFields`] and the typed accessors on
//! [`RawFse`].

use crate::api::DestHandler;
use crate::api::FlowSteering;
use crate::api::TUPLE_WORDS;
use bitflags::bitflags;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::LittleEndian;
use zerocopy::U32;

type U32Le = U32<LittleEndian>;

/// Dwords per entry.
pub const FSE_DWORDS: usize = 16;

/// Size of one shared search entry, in bytes.
pub const FSE_SIZE: usize = FSE_DWORDS * 4;

// Dword indices.
const DW_SRC_IP: usize = 0; // ..4, most significant word first
const DW_DST_IP: usize = 4; // ..8
const DW_PORTS: usize = 8;
const DW_INFO: usize = 9;
const DW_METADATA: usize = 10;
const DW_MSDU_COUNT: usize = 11;

// Dword 9 fields.
const INFO_L4_PROTO_MASK: u32 = 0x0000_00FF;
const INFO_VALID: u32 = 1 << 8;
// [12:9] reserved, [21:13] service code, [22] priority valid,
// [23] use-PPE: zeroed for host-programmed flows.
const INFO_REO_DEST_IND_LSB: u32 = 24;
const INFO_REO_DEST_IND_MASK: u32 = 0x1F00_0000;
const INFO_MSDU_DROP: u32 = 1 << 29;
const INFO_DEST_HANDLER_LSB: u32 = 30;

// Dword 11 fields. [6:0] aggregation count and [7] LRO-eligible are
// hardware-owned, as is the MSDU count itself.
const COUNT_MSDU_LSB: u32 = 8;
const COUNT_MSDU_MASK: u32 = 0xFFFF_FF00;

bitflags! {
    /// The host-writable flag bits of the info dword.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct FseFlags: u32 {
        const VALID = INFO_VALID;
        const MSDU_DROP = INFO_MSDU_DROP;
    }
}

/// One shared entry, exactly as the hardware sees it: sixteen
/// little-endian dwords.
#[derive(Clone, Copy, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub struct RawFse {
    dw: [U32Le; FSE_DWORDS],
}

impl RawFse {
    pub fn dwords(&self) -> [u32; FSE_DWORDS] {
        self.dw.map(|d| d.get())
    }

    pub fn valid(&self) -> bool {
        self.dw[DW_INFO].get() & INFO_VALID != 0
    }

    /// Clear the validity bit in place, leaving the rest of the entry
    /// untouched. Later probe chains stop at this slot; its contents
    /// are dead until a new flow is written over them.
    pub fn set_valid(&mut self, valid: bool) {
        let mut info = self.dw[DW_INFO].get();
        if valid {
            info |= INFO_VALID;
        } else {
            info &= !INFO_VALID;
        }
        self.dw[DW_INFO] = U32Le::new(info);
    }

    /// The hardware-maintained MSDU count.
    pub fn msdu_count(&self) -> u32 {
        (self.dw[DW_MSDU_COUNT].get() & COUNT_MSDU_MASK) >> COUNT_MSDU_LSB
    }
}

/// The host-written fields of a search entry.
///
/// Fields the hardware owns after setup (MSDU/byte counts, timestamp,
/// cumulative IP lengths, TCP sequence number) have no representation
/// here and are zeroed when an entry is packed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FseFields {
    /// The flattened tuple: address words, combined ports, protocol.
    pub tuple_words: [u32; TUPLE_WORDS],
    pub flags: FseFlags,
    pub reo_dest_ind: u8,
    pub dest_handler: DestHandler,
    pub metadata: u32,
}

impl FseFields {
    pub fn new(
        tuple_words: [u32; TUPLE_WORDS],
        steering: &FlowSteering,
    ) -> Self {
        let mut flags = FseFlags::VALID;
        if steering.msdu_drop {
            flags |= FseFlags::MSDU_DROP;
        }
        Self {
            tuple_words,
            flags,
            reo_dest_ind: steering.reo_dest_ind,
            dest_handler: steering.dest_handler,
            metadata: steering.metadata,
        }
    }

    pub fn pack(&self) -> RawFse {
        let w = &self.tuple_words;
        let mut dw = [0u32; FSE_DWORDS];

        dw[DW_SRC_IP..DW_SRC_IP + 4].copy_from_slice(&w[0..4]);
        dw[DW_DST_IP..DW_DST_IP + 4].copy_from_slice(&w[4..8]);
        dw[DW_PORTS] = w[8];
        dw[DW_INFO] = (w[9] & INFO_L4_PROTO_MASK)
            | (self.flags.bits() & (INFO_VALID | INFO_MSDU_DROP))
            | ((u32::from(self.reo_dest_ind) << INFO_REO_DEST_IND_LSB)
                & INFO_REO_DEST_IND_MASK)
            | (u32::from(u8::from(self.dest_handler)) << INFO_DEST_HANDLER_LSB);
        dw[DW_METADATA] = self.metadata;

        RawFse { dw: dw.map(U32Le::new) }
    }

    pub fn unpack(raw: &RawFse) -> Self {
        let dw = raw.dwords();
        let info = dw[DW_INFO];

        Self {
            tuple_words: [
                dw[0],
                dw[1],
                dw[2],
                dw[3],
                dw[4],
                dw[5],
                dw[6],
                dw[7],
                dw[DW_PORTS],
                info & INFO_L4_PROTO_MASK,
            ],
            flags: FseFlags::from_bits_truncate(info),
            reo_dest_ind: ((info & INFO_REO_DEST_IND_MASK)
                >> INFO_REO_DEST_IND_LSB) as u8,
            dest_handler: DestHandler::from_bits(
                (info >> INFO_DEST_HANDLER_LSB) as u8,
            ),
            metadata: dw[DW_METADATA],
        }
    }
}
