// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Device-visible coherent memory.
//!
//! The shared flow search table lives in a single physically
//! contiguous region that both the host and the hardware walk. The
//! allocator seam hands back the (virtual, bus) address pair; the
//! region is exclusively owned and returns to the allocator on drop.

use alloc::boxed::Box;
use alloc::vec;

/// Allocate device-visible memory.
pub trait DmaAllocator {
    /// Allocate a zeroed, physically contiguous, device-visible
    /// region of `size` bytes.
    fn alloc_coherent(&self, size: usize) -> Result<DmaRegion, DmaError>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DmaError {
    NoMemory { bytes: usize },
}

/// An owned, device-visible region.
pub struct DmaRegion {
    buf: Box<[u8]>,
    paddr: u64,
}

impl DmaRegion {
    pub fn new(buf: Box<[u8]>, paddr: u64) -> Self {
        Self { buf, paddr }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// The bus address the device walks the region through.
    pub fn paddr(&self) -> u64 {
        self.paddr
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

/// The hosted backend: plain heap memory. There is no IOMMU in the
/// picture, so the bus address mirrors the virtual one.
pub struct KHeapDma;

impl DmaAllocator for KHeapDma {
    fn alloc_coherent(&self, size: usize) -> Result<DmaRegion, DmaError> {
        let buf = vec![0u8; size].into_boxed_slice();
        let paddr = buf.as_ptr() as u64;
        Ok(DmaRegion::new(buf, paddr))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zeroed_region() {
        let region = KHeapDma.alloc_coherent(256).unwrap();
        assert_eq!(region.len(), 256);
        assert!(region.bytes().iter().all(|b| *b == 0));
        assert_ne!(region.paddr(), 0);
    }
}
