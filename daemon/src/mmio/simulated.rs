// This file is part of fabricd, an application to reconfigure FPGA fabric and drive the IO processors inside it.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// fabricd is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// fabricd is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! In-process device memory.
//!
//! [`SimulatedMemory`] is a plain byte buffer that counts every access made through the
//! [`MmioBacking`] trait. [`SimulatedBus`] places such backings at physical addresses and
//! serves them through [`MemoryMapper`], so code written against real hardware can run
//! unchanged in tests and dry runs.

use crate::error::FabricError;
use crate::mmio::{MemoryMapper, MmioBacking, Width};
use log::trace;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A zero-initialised block of memory with access counters.
#[derive(Debug)]
pub struct SimulatedMemory {
    bytes: Mutex<Vec<u8>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl SimulatedMemory {
    pub fn new(length: usize) -> SimulatedMemory {
        SimulatedMemory {
            bytes: Mutex::new(vec![0; length]),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    fn bytes(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of reads performed through [`MmioBacking::read`].
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of writes performed through [`MmioBacking::write`].
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Copy of `len` bytes at `offset`, without counting as an access.
    pub fn peek(&self, offset: usize, len: usize) -> Vec<u8> {
        self.bytes()[offset..offset + len].to_vec()
    }

    /// Little-endian word at `offset`, without counting as an access.
    pub fn peek_u32(&self, offset: usize) -> u32 {
        let bytes = self.bytes();
        u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    }

    /// Overwrite bytes at `offset`, without counting as an access.
    ///
    /// Used to stand in for the other side of the bus, e.g. firmware answering a mailbox.
    pub fn poke(&self, offset: usize, data: &[u8]) {
        self.bytes()[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn poke_u32(&self, offset: usize, value: u32) {
        self.poke(offset, &value.to_le_bytes());
    }
}

impl MmioBacking for SimulatedMemory {
    fn len(&self) -> usize {
        self.bytes().len()
    }

    fn read(&self, offset: usize, width: Width) -> u32 {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let bytes = self.bytes();
        (0..width.bytes()).fold(0u32, |acc, i| acc | u32::from(bytes[offset + i]) << (8 * i))
    }

    fn write(&self, offset: usize, width: Width, value: u32) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut bytes = self.bytes();
        for i in 0..width.bytes() {
            bytes[offset + i] = (value >> (8 * i)) as u8;
        }
    }
}

/// A sub-range of another backing.
struct OffsetView {
    inner: Arc<dyn MmioBacking>,
    start: usize,
    length: usize,
}

impl MmioBacking for OffsetView {
    fn len(&self) -> usize {
        self.length
    }

    fn read(&self, offset: usize, width: Width) -> u32 {
        self.inner.read(self.start + offset, width)
    }

    fn write(&self, offset: usize, width: Width, value: u32) {
        self.inner.write(self.start + offset, width, value)
    }
}

/// A physical address space populated with simulated regions.
#[derive(Default)]
pub struct SimulatedBus {
    regions: Mutex<BTreeMap<u64, Arc<dyn MmioBacking>>>,
}

impl SimulatedBus {
    pub fn new() -> SimulatedBus {
        SimulatedBus::default()
    }

    /// Place `backing` at physical address `base_address`, replacing any region there.
    pub fn add_region(&self, base_address: u64, backing: Arc<dyn MmioBacking>) {
        trace!(
            "Simulated region of {:#x} bytes at {base_address:#x}",
            backing.len()
        );
        self.regions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(base_address, backing);
    }
}

impl MemoryMapper for SimulatedBus {
    fn map(&self, base_address: u64, length: usize) -> Result<Arc<dyn MmioBacking>, FabricError> {
        let regions = self.regions.lock().unwrap_or_else(|e| e.into_inner());
        let containing = regions
            .range(..=base_address)
            .next_back()
            .filter(|(start, backing)| {
                let offset = base_address - **start;
                offset
                    .checked_add(length as u64)
                    .is_some_and(|end| end <= backing.len() as u64)
            });
        match containing {
            Some((start, backing)) if *start == base_address && backing.len() == length => {
                Ok(backing.clone())
            }
            Some((start, backing)) => Ok(Arc::new(OffsetView {
                inner: backing.clone(),
                start: (base_address - start) as usize,
                length,
            })),
            None => Err(FabricError::Mapping {
                base: base_address,
                length,
                reason: "no simulated region covers this range".into(),
            }),
        }
    }
}
