// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The flow search table.
//!
//! A fixed-capacity, power-of-two array of flow entries backed by a
//! device-shared region, with bounded open-addressing collision
//! resolution. Mutations run under one table-scoped [`KMutex`] held
//! for O(skid_length). Classification lookups take no lock at all:
//! each software-mirror slot is published through a sequence counter
//! so a reader never observes a partially written entry, even across
//! slot reuse.

use super::FirmwareChannel;
use super::Result;
use super::cache;
use super::fse::FseFields;
use super::fse::RawFse;
use super::fse::FSE_SIZE;
use super::hash::TupleHasher;
use crate::api::DestHandler;
use crate::api::DumpFstResp;
use crate::api::EntryRef;
use crate::api::FirmwareCmd;
use crate::api::FlowEntryDump;
use crate::api::FlowSteering;
use crate::api::FlowTuple;
use crate::api::FstConfig;
use crate::api::FstError;
use crate::api::HashKey;
use crate::api::MAX_REO_DEST_IND;
use crate::api::SyncMode;
use crate::api::TUPLE_WORDS;
use crate::ddi::dma::DmaAllocator;
use crate::ddi::dma::DmaRegion;
use crate::ddi::kstat;
use crate::ddi::kstat::KStatNamed;
use crate::ddi::kstat::KStatProvider;
use crate::ddi::kstat::KStatU64;
use crate::ddi::sync::KMutex;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;
use core::sync::atomic::fence;
use serde::Deserialize;
use serde::Serialize;
use zerocopy::FromBytes;

// Software-mirror flag bits.
const SLOT_VALID: u32 = 1 << 0;
const SLOT_IPV4: u32 = 1 << 1;
const SLOT_MSDU_DROP: u32 = 1 << 2;
const SLOT_REO_LSB: u32 = 8;
const SLOT_REO_MASK: u32 = 0x0000_FF00;
const SLOT_HANDLER_LSB: u32 = 16;
const SLOT_HANDLER_MASK: u32 = 0x0003_0000;

/// Software mirror of one table slot.
///
/// Writers only touch a slot while holding the table lock. Readers
/// take no lock: a writer bumps `seq` to an odd value, stores the
/// fields, then stores the next even value with release ordering; a
/// reader that observes an odd or changed `seq` retries.
struct Slot {
    seq: AtomicU32,
    words: [AtomicU32; TUPLE_WORDS],
    flow_hash: AtomicU32,
    metadata: AtomicU32,
    flags: AtomicU32,
    msdu_count: AtomicU64,
}

#[derive(Clone, Copy)]
struct SlotSnap {
    words: [u32; TUPLE_WORDS],
    flow_hash: u32,
    metadata: u32,
    flags: u32,
    msdu_count: u64,
}

impl Slot {
    fn new() -> Self {
        Self {
            seq: AtomicU32::new(0),
            words: [const { AtomicU32::new(0) }; TUPLE_WORDS],
            flow_hash: AtomicU32::new(0),
            metadata: AtomicU32::new(0),
            flags: AtomicU32::new(0),
            msdu_count: AtomicU64::new(0),
        }
    }

    /// Lock-free snapshot of the slot.
    fn read(&self) -> SlotSnap {
        loop {
            let s1 = self.seq.load(Ordering::Acquire);
            if s1 & 1 != 0 {
                core::hint::spin_loop();
                continue;
            }

            let mut words = [0u32; TUPLE_WORDS];
            for (w, a) in words.iter_mut().zip(&self.words) {
                *w = a.load(Ordering::Relaxed);
            }
            let snap = SlotSnap {
                words,
                flow_hash: self.flow_hash.load(Ordering::Relaxed),
                metadata: self.metadata.load(Ordering::Relaxed),
                flags: self.flags.load(Ordering::Relaxed),
                msdu_count: self.msdu_count.load(Ordering::Relaxed),
            };

            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == s1 {
                return snap;
            }
        }
    }

    // Writer-side reads; stable because the caller holds the table
    // lock.
    fn words_relaxed(&self) -> [u32; TUPLE_WORDS] {
        let mut words = [0u32; TUPLE_WORDS];
        for (w, a) in words.iter_mut().zip(&self.words) {
            *w = a.load(Ordering::Relaxed);
        }
        words
    }

    fn is_valid_relaxed(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & SLOT_VALID != 0
    }

    fn begin_write(&self) -> u32 {
        let s = self.seq.load(Ordering::Relaxed);
        self.seq.store(s + 1, Ordering::Relaxed);
        fence(Ordering::Release);
        s + 1
    }

    fn end_write(&self, seq: u32) {
        self.seq.store(seq + 1, Ordering::Release);
    }

    fn set_valid_bit(&self, valid: bool) {
        let seq = self.begin_write();
        let f = self.flags.load(Ordering::Relaxed);
        let f = if valid { f | SLOT_VALID } else { f & !SLOT_VALID };
        self.flags.store(f, Ordering::Relaxed);
        self.end_write(seq);
    }
}

impl SlotSnap {
    fn is_valid(&self) -> bool {
        self.flags & SLOT_VALID != 0
    }

    fn tuple(&self) -> FlowTuple {
        FlowTuple::from_words(self.words, self.flags & SLOT_IPV4 != 0)
    }

    fn steering(&self) -> FlowSteering {
        FlowSteering {
            reo_dest_ind: ((self.flags & SLOT_REO_MASK) >> SLOT_REO_LSB) as u8,
            dest_handler: DestHandler::from_bits(
                ((self.flags & SLOT_HANDLER_MASK) >> SLOT_HANDLER_LSB) as u8,
            ),
            metadata: self.metadata,
            msdu_drop: self.flags & SLOT_MSDU_DROP != 0,
        }
    }
}

/// Cumulative counters for a single table.
pub struct FstStats {
    /// Flows successfully added.
    adds: KStatU64,

    /// Insertions refused because the tuple was already present.
    dup_adds: KStatU64,

    /// Insertions refused because the skid window was exhausted.
    full_drops: KStatU64,

    /// Flows removed.
    deletes: KStatU64,

    /// Mutations unwound after a failed synchronous invalidate.
    rollbacks: KStatU64,

    /// Per-flow counter updates.
    stat_updates: KStatU64,

    /// Single-entry invalidate commands posted.
    inval_entry_cmds: KStatU64,

    /// Full-cache invalidate commands posted.
    inval_all_cmds: KStatU64,
}

/// A point-in-time copy of [`FstStats`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FstStatsSnap {
    pub adds: u64,
    pub dup_adds: u64,
    pub full_drops: u64,
    pub deletes: u64,
    pub rollbacks: u64,
    pub stat_updates: u64,
    pub inval_entry_cmds: u64,
    pub inval_all_cmds: u64,
}

impl KStatProvider for FstStats {
    const NUM_FIELDS: u32 = 8;
    type Snap = FstStatsSnap;

    fn init(&mut self) -> core::result::Result<(), kstat::Error> {
        self.adds.init("adds")?;
        self.dup_adds.init("dup_adds")?;
        self.full_drops.init("full_drops")?;
        self.deletes.init("deletes")?;
        self.rollbacks.init("rollbacks")?;
        self.stat_updates.init("stat_updates")?;
        self.inval_entry_cmds.init("inval_entry_cmds")?;
        self.inval_all_cmds.init("inval_all_cmds")?;
        Ok(())
    }

    fn new() -> Self {
        Self {
            adds: KStatU64::new(),
            dup_adds: KStatU64::new(),
            full_drops: KStatU64::new(),
            deletes: KStatU64::new(),
            rollbacks: KStatU64::new(),
            stat_updates: KStatU64::new(),
            inval_entry_cmds: KStatU64::new(),
            inval_all_cmds: KStatU64::new(),
        }
    }

    fn snapshot(&self) -> FstStatsSnap {
        FstStatsSnap {
            adds: self.adds.val(),
            dup_adds: self.dup_adds.val(),
            full_drops: self.full_drops.val(),
            deletes: self.deletes.val(),
            rollbacks: self.rollbacks.val(),
            stat_updates: self.stat_updates.val(),
            inval_entry_cmds: self.inval_entry_cmds.val(),
            inval_all_cmds: self.inval_all_cmds.val(),
        }
    }
}

// State only writers touch; everything here is guarded by the table
// lock.
struct TableState {
    region: DmaRegion,
    num_valid: u32,
    cache_dirty: bool,
    stats: KStatNamed<FstStats>,
}

fn shared_entry(state: &mut TableState, idx: u32) -> &mut RawFse {
    let entries = <[RawFse]>::mut_from_bytes(state.region.bytes_mut())
        .expect("region is a whole number of entries");
    &mut entries[idx as usize]
}

/// A single flow search table bound to one scope.
pub struct FstTable {
    name: String,
    max_entries: u32,
    hash_mask: u32,
    skid_length: u32,
    sync_mode: SyncMode,
    hasher: TupleHasher,
    slots: Vec<Slot>,
    chan: Arc<dyn FirmwareChannel>,
    locked: KMutex<TableState>,
}

impl FstTable {
    /// Create a table sized for `cfg.requested_entries`, rounded up to
    /// the next power of two and silently capped at
    /// `cfg.entries_ceiling`.
    pub fn new(
        name: &str,
        cfg: &FstConfig,
        dma: &dyn DmaAllocator,
        chan: Arc<dyn FirmwareChannel>,
    ) -> Result<Self> {
        cfg.check()?;

        let max_entries = cfg
            .requested_entries
            .next_power_of_two()
            .min(cfg.entries_ceiling);
        let size = max_entries as usize * FSE_SIZE;
        let region = dma
            .alloc_coherent(size)
            .map_err(|_| FstError::AllocFail { bytes: size })?;
        let hasher = TupleHasher::new(&cfg.hash_key, max_entries);
        let slots = (0..max_entries).map(|_| Slot::new()).collect();
        let stats = KStatNamed::new("rxfst", name, FstStats::new())
            .map_err(|e| FstError::BadConfig(format!("kstat: {e}")))?;

        Ok(Self {
            name: String::from(name),
            max_entries,
            hash_mask: max_entries - 1,
            skid_length: cfg.skid_length,
            sync_mode: cfg.sync_mode,
            hasher,
            slots,
            chan,
            locked: KMutex::new(TableState {
                region,
                num_valid: 0,
                cache_dirty: false,
                stats,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_entries(&self) -> u32 {
        self.max_entries
    }

    pub fn skid_length(&self) -> u32 {
        self.skid_length
    }

    /// The number of valid flows in this table.
    pub fn num_valid(&self) -> u32 {
        self.locked.lock().num_valid
    }

    pub fn stats(&self) -> FstStatsSnap {
        self.locked.lock().stats.vals.snapshot()
    }

    /// Add a flow.
    ///
    /// Probing starts at the tuple's base index and walks at most
    /// `skid_length` slots: the first invalid slot takes the entry, an
    /// exact tuple match refuses it as a duplicate, and an exhausted
    /// window refuses it as full. The skid bounds lookup latency and
    /// is never grown to absorb collisions. The probe and both mirror
    /// writes run under the table lock; the firmware notification does
    /// not.
    pub fn insert(
        &self,
        tuple: &FlowTuple,
        steering: &FlowSteering,
    ) -> Result<EntryRef> {
        if steering.reo_dest_ind > MAX_REO_DEST_IND {
            return Err(FstError::BadConfig(format!(
                "REO destination indication out of range: {}",
                steering.reo_dest_ind
            )));
        }

        let base = self.hasher.hash(tuple);
        let words = tuple.words();

        let mut state = self.locked.lock();

        let mut target = None;
        for probe in 0..self.skid_length {
            let idx = (base + probe) & self.hash_mask;
            let slot = &self.slots[idx as usize];
            if !slot.is_valid_relaxed() {
                target = Some(idx);
                break;
            }
            if slot.words_relaxed() == words {
                state.stats.vals.dup_adds += 1;
                return Err(FstError::FlowExists { flow_id: idx });
            }
        }
        let Some(idx) = target else {
            state.stats.vals.full_drops += 1;
            return Err(FstError::TableFull);
        };

        // Hardware mirror first, then publish the software mirror.
        *shared_entry(&mut state, idx) = FseFields::new(words, steering).pack();

        let mut flags = SLOT_VALID
            | (u32::from(steering.reo_dest_ind) << SLOT_REO_LSB)
            | (u32::from(u8::from(steering.dest_handler)) << SLOT_HANDLER_LSB);
        if tuple.is_ipv4() {
            flags |= SLOT_IPV4;
        }
        if steering.msdu_drop {
            flags |= SLOT_MSDU_DROP;
        }

        let slot = &self.slots[idx as usize];
        let seq = slot.begin_write();
        for (w, a) in words.iter().zip(&slot.words) {
            a.store(*w, Ordering::Relaxed);
        }
        slot.flow_hash.store(base, Ordering::Relaxed);
        slot.metadata.store(steering.metadata, Ordering::Relaxed);
        slot.msdu_count.store(0, Ordering::Relaxed);
        slot.flags.store(flags, Ordering::Relaxed);
        slot.end_write(seq);

        state.num_valid += 1;
        state.stats.vals.adds += 1;
        drop(state);

        cache::flow_added(self, tuple, &words, idx)?;
        Ok(EntryRef { flow_id: idx, flow_hash: base })
    }

    /// Look up `tuple`. Lock-free; runs the identical probe chain to
    /// [`FstTable::insert`], stopping at the first invalid slot.
    pub fn find(&self, tuple: &FlowTuple) -> Result<EntryRef> {
        let base = self.hasher.hash(tuple);
        let words = tuple.words();

        for probe in 0..self.skid_length {
            let idx = (base + probe) & self.hash_mask;
            let snap = self.slots[idx as usize].read();
            if !snap.is_valid() {
                return Err(FstError::NotFound);
            }
            if snap.words == words {
                return Ok(EntryRef { flow_id: idx, flow_hash: snap.flow_hash });
            }
        }

        Err(FstError::NotFound)
    }

    /// Direct, validity-checked slot access.
    pub fn find_by_id(&self, flow_id: u32) -> Result<EntryRef> {
        if flow_id >= self.max_entries {
            return Err(FstError::NotFound);
        }

        let snap = self.slots[flow_id as usize].read();
        if !snap.is_valid() {
            return Err(FstError::NotFound);
        }
        Ok(EntryRef { flow_id, flow_hash: snap.flow_hash })
    }

    /// Remove a flow. The slot is invalidated in both mirrors, never
    /// compacted: a later probe chain correctly stops here.
    pub fn delete(&self, entry: EntryRef) -> Result<()> {
        if entry.flow_id >= self.max_entries {
            return Err(FstError::NotFound);
        }

        let mut state = self.locked.lock();
        let slot = &self.slots[entry.flow_id as usize];
        if !slot.is_valid_relaxed() {
            return Err(FstError::NotFound);
        }

        // Capture the identity for the invalidate command (and a
        // possible rollback) before the slot goes dark.
        let words = slot.words_relaxed();
        let ipv4 = slot.flags.load(Ordering::Relaxed) & SLOT_IPV4 != 0;

        shared_entry(&mut state, entry.flow_id).set_valid(false);
        slot.set_valid_bit(false);
        state.num_valid -= 1;
        state.stats.vals.deletes += 1;
        drop(state);

        let tuple = FlowTuple::from_words(words, ipv4);
        cache::flow_removed(self, &tuple, &words, entry.flow_id)
    }

    /// Credit one received MSDU to a still-valid flow. Called from the
    /// receive path's bottom-half context.
    pub fn update_stats(&self, flow_id: u32) -> Result<()> {
        if flow_id >= self.max_entries {
            return Err(FstError::NotFound);
        }

        let mut state = self.locked.lock();
        let slot = &self.slots[flow_id as usize];
        if !slot.is_valid_relaxed() {
            return Err(FstError::NotFound);
        }
        slot.msdu_count.fetch_add(1, Ordering::Relaxed);
        state.stats.vals.stat_updates += 1;
        Ok(())
    }

    /// Dump every valid flow, for debugging or administrative use.
    pub fn dump(&self) -> DumpFstResp {
        let state = self.locked.lock();
        let mut flows = Vec::new();

        for (i, slot) in self.slots.iter().enumerate() {
            let snap = slot.read();
            if !snap.is_valid() {
                continue;
            }
            flows.push(FlowEntryDump {
                flow_id: i as u32,
                flow_hash: snap.flow_hash,
                tuple: snap.tuple(),
                steering: snap.steering(),
                msdu_count: snap.msdu_count,
            });
        }

        DumpFstResp {
            max_entries: self.max_entries,
            skid_length: self.skid_length,
            num_valid: state.num_valid,
            flows,
        }
    }

    /// Program the table geometry and key into the firmware target.
    pub(crate) fn send_setup(&self, key: &HashKey) -> Result<()> {
        let base_paddr = self.locked.lock().region.paddr();
        let cmd = FirmwareCmd::FstSetup {
            base_paddr,
            max_entries: self.max_entries,
            skid_length: self.skid_length,
            hash_key: *key,
        };
        self.chan.async_send(cmd).map_err(|_| FstError::SyncFailed)
    }

    pub(crate) fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    pub(crate) fn channel(&self) -> &dyn FirmwareChannel {
        &*self.chan
    }

    pub(crate) fn mark_cache_dirty(&self) {
        self.locked.lock().cache_dirty = true;
    }

    pub(crate) fn take_cache_dirty(&self) -> bool {
        let mut state = self.locked.lock();
        core::mem::replace(&mut state.cache_dirty, false)
    }

    pub(crate) fn note_inval_entry(&self) {
        self.locked.lock().stats.vals.inval_entry_cmds += 1;
    }

    pub(crate) fn note_inval_all(&self) {
        self.locked.lock().stats.vals.inval_all_cmds += 1;
    }

    /// Unwind an insert whose synchronous invalidate failed. The slot
    /// may already have been deleted by a racing caller; only our own
    /// publication is unwound.
    pub(crate) fn rollback_insert(
        &self,
        flow_id: u32,
        words: &[u32; TUPLE_WORDS],
    ) {
        let mut state = self.locked.lock();
        let slot = &self.slots[flow_id as usize];
        if !slot.is_valid_relaxed() || slot.words_relaxed() != *words {
            return;
        }

        shared_entry(&mut state, flow_id).set_valid(false);
        slot.set_valid_bit(false);
        state.num_valid -= 1;
        state.stats.vals.rollbacks += 1;
    }

    /// Unwind a delete whose synchronous invalidate failed, restoring
    /// the entry in both mirrors. Skipped if the slot was reused in
    /// the meantime.
    pub(crate) fn rollback_delete(
        &self,
        flow_id: u32,
        words: &[u32; TUPLE_WORDS],
    ) {
        let mut state = self.locked.lock();
        let slot = &self.slots[flow_id as usize];
        if slot.is_valid_relaxed() || slot.words_relaxed() != *words {
            return;
        }

        shared_entry(&mut state, flow_id).set_valid(true);
        slot.set_valid_bit(true);
        state.num_valid += 1;
        state.stats.vals.rollbacks += 1;
    }
}
