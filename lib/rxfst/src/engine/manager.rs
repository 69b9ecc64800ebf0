// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Flow search subsystem lifecycle.
//!
//! One [`RxFst`] is attached per device and owns every table instance
//! for its scope: a single shared table, or one per radio. These are
//! explicitly owned objects with explicit teardown; there is no
//! global state anywhere in the engine.

use super::FirmwareChannel;
use super::Result;
use super::cache;
use super::table::FstTable;
use crate::api::DumpFstResp;
use crate::api::EntryRef;
use crate::api::FlowSteering;
use crate::api::FlowTuple;
use crate::api::FstConfig;
use crate::api::FstError;
use crate::api::FstScope;
use crate::api::SyncMode;
use crate::ddi::dma::DmaAllocator;
use crate::ddi::time::Interval;
use crate::ddi::time::Periodic;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

// One attached table plus its bundling periodic. The periodic is
// declared first: it must be canceled (joined) before the table, and
// with it the shared region, can go away.
struct Instance {
    periodic: Option<Periodic<Arc<FstTable>>>,
    table: Arc<FstTable>,
}

/// The receive flow search subsystem of one device.
pub struct RxFst {
    instances: Vec<Instance>,
}

impl RxFst {
    /// Attach the subsystem: build and program one table per scope
    /// instance, and arm the bundling periodic when the config calls
    /// for it.
    ///
    /// A disabled feature flag attaches an empty subsystem whose
    /// operations all report `NotFound`.
    pub fn attach(
        cfg: &FstConfig,
        dma: &dyn DmaAllocator,
        chan: Arc<dyn FirmwareChannel>,
    ) -> Result<Self> {
        if !cfg.enabled {
            return Ok(Self { instances: Vec::new() });
        }
        cfg.check()?;

        let timer = match cfg.sync_mode {
            SyncMode::Immediate => None,
            SyncMode::Bundled => {
                let quiet = Interval::try_from_millis(cfg.quiet_period_ms)
                    .ok_or_else(|| {
                        FstError::BadConfig(format!(
                            "bad quiet period: {} ms",
                            cfg.quiet_period_ms
                        ))
                    })?;
                let period = Interval::try_from_millis(cfg.bundle_period_ms)
                    .ok_or_else(|| {
                        FstError::BadConfig(format!(
                            "bad bundle period: {} ms",
                            cfg.bundle_period_ms
                        ))
                    })?;
                Some((quiet, period))
            }
        };

        let count = match cfg.scope {
            FstScope::Device => 1,
            FstScope::PerRadio => u32::from(cfg.radios.get()),
        };

        let mut instances = Vec::with_capacity(count as usize);
        for i in 0..count {
            let name = match cfg.scope {
                FstScope::Device => String::from("fst"),
                FstScope::PerRadio => format!("fst{i}"),
            };

            let table = Arc::new(FstTable::new(
                &name,
                cfg,
                dma,
                Arc::clone(&chan),
            )?);

            // Program the target before the first flow can land.
            table.send_setup(&cfg.hash_key)?;

            let periodic = timer.map(|(quiet, period)| {
                cache::start_bundling(Arc::clone(&table), quiet, period)
            });

            instances.push(Instance { periodic, table });
        }

        Ok(Self { instances })
    }

    pub fn is_enabled(&self) -> bool {
        !self.instances.is_empty()
    }

    /// The table serving `radio`. Device scope maps every radio to
    /// the single shared instance.
    pub fn table(&self, radio: u8) -> Option<&Arc<FstTable>> {
        match self.instances.len() {
            0 => None,
            1 => Some(&self.instances[0].table),
            _ => self.instances.get(usize::from(radio)).map(|i| &i.table),
        }
    }

    pub fn insert(
        &self,
        radio: u8,
        tuple: &FlowTuple,
        steering: &FlowSteering,
    ) -> Result<EntryRef> {
        self.table(radio).ok_or(FstError::NotFound)?.insert(tuple, steering)
    }

    pub fn delete(&self, radio: u8, entry: EntryRef) -> Result<()> {
        self.table(radio).ok_or(FstError::NotFound)?.delete(entry)
    }

    pub fn find(&self, radio: u8, tuple: &FlowTuple) -> Result<EntryRef> {
        self.table(radio).ok_or(FstError::NotFound)?.find(tuple)
    }

    pub fn find_by_id(&self, radio: u8, flow_id: u32) -> Result<EntryRef> {
        self.table(radio).ok_or(FstError::NotFound)?.find_by_id(flow_id)
    }

    pub fn update_stats(&self, radio: u8, flow_id: u32) -> Result<()> {
        self.table(radio).ok_or(FstError::NotFound)?.update_stats(flow_id)
    }

    pub fn dump(&self, radio: u8) -> Result<DumpFstResp> {
        Ok(self.table(radio).ok_or(FstError::NotFound)?.dump())
    }

    /// Tear the subsystem down. Every bundling periodic is canceled
    /// synchronously before its table's shared region is released; a
    /// timer can never fire against freed memory.
    pub fn detach(mut self) {
        for inst in &mut self.instances {
            inst.periodic = None;
        }
        // Tables, and their shared regions, drop with self.
    }
}
