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

use crate::error::FabricError;
use crate::mmio::{MemoryMapper, RegisterWindow};
use crate::pl::metadata::{GpioBank, GpioDict, GpioLine, IpBlock, IpDict, OverlayDescription};
use crate::pl::section::{FabricAccess, FabricGate, PlToken};
use log::{debug, info, trace};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockWriteGuard};
use std::time::SystemTime;

/// Identity of a bitstream: its canonical path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BitstreamId(PathBuf);

impl BitstreamId {
    pub fn new(path: impl Into<PathBuf>) -> BitstreamId {
        BitstreamId(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for BitstreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// What the fabric is known to hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadedBitstream {
    /// Nothing has been loaded by this process.
    None,
    Loaded {
        id: BitstreamId,
        timestamp: SystemTime,
    },
    /// A reconfiguration started and did not complete; the fabric contents are indeterminate.
    Unknown,
}

impl fmt::Display for LoadedBitstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadedBitstream::None => write!(f, "none"),
            LoadedBitstream::Loaded { id, .. } => write!(f, "{id}"),
            LoadedBitstream::Unknown => write!(f, "unknown"),
        }
    }
}

/// An immutable view of the PL metadata at one generation.
#[derive(Debug, Clone)]
pub struct PlSnapshot {
    bitstream: LoadedBitstream,
    design: Option<String>,
    ip_dict: IpDict,
    gpio_dict: GpioDict,
    gpio_bank: Option<GpioBank>,
    /// Both dictionaries as the overlay described them.
    origin: Arc<(IpDict, GpioDict)>,
    generation: u64,
}

impl PlSnapshot {
    fn empty(bitstream: LoadedBitstream, generation: u64) -> PlSnapshot {
        PlSnapshot {
            bitstream,
            design: None,
            ip_dict: IpDict::new(),
            gpio_dict: GpioDict::new(),
            gpio_bank: None,
            origin: Arc::default(),
            generation,
        }
    }

    pub fn bitstream(&self) -> &LoadedBitstream {
        &self.bitstream
    }

    pub fn design(&self) -> Option<&str> {
        self.design.as_deref()
    }

    pub fn ip_dict(&self) -> &IpDict {
        &self.ip_dict
    }

    pub fn gpio_dict(&self) -> &GpioDict {
        &self.gpio_dict
    }

    pub fn gpio_bank(&self) -> Option<&GpioBank> {
        self.gpio_bank.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn missing(bitstream: &LoadedBitstream, kind: &str, name: &str) -> FabricError {
        FabricError::NotFound(format!(
            "No {kind} named '{name}' in the loaded bitstream ({bitstream})"
        ))
    }

    pub fn ip(&self, name: &str) -> Result<&IpBlock, FabricError> {
        self.ip_dict
            .get(name)
            .ok_or_else(|| PlSnapshot::missing(&self.bitstream, "IP block", name))
    }

    pub fn gpio(&self, name: &str) -> Result<&GpioLine, FabricError> {
        self.gpio_dict
            .get(name)
            .ok_or_else(|| PlSnapshot::missing(&self.bitstream, "GPIO line", name))
    }

    fn ip_state_mut(&mut self, name: &str) -> Result<&mut Option<String>, FabricError> {
        let bitstream = &self.bitstream;
        self.ip_dict
            .get_mut(name)
            .map(|ip| &mut ip.state)
            .ok_or_else(|| PlSnapshot::missing(bitstream, "IP block", name))
    }

    fn gpio_state_mut(&mut self, name: &str) -> Result<&mut Option<String>, FabricError> {
        let bitstream = &self.bitstream;
        self.gpio_dict
            .get_mut(name)
            .map(|line| &mut line.state)
            .ok_or_else(|| PlSnapshot::missing(bitstream, "GPIO line", name))
    }
}

/// Record `program` as the owner in `state` unless another program already owns it.
fn claim(state: &mut Option<String>, name: &str, program: &str) -> Result<(), FabricError> {
    match state {
        Some(owner) if owner != program => Err(FabricError::InUse {
            name: name.to_owned(),
            owner: owner.clone(),
        }),
        _ => {
            *state = Some(program.to_owned());
            Ok(())
        }
    }
}

fn release(state: &mut Option<String>, program: &str) {
    if state.as_deref() == Some(program) {
        *state = None;
    }
}

/// Live value of an IP block's first register, with its state tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpState {
    pub tag: Option<String>,
    pub value: u32,
}

/// Live reading of a GPIO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioState {
    pub index: u32,
    pub count: u32,
    /// The low `count` bits of the bank's data register.
    pub bank: u32,
    /// Level of the line at `index`.
    pub level: bool,
}

/// Process-wide programmable logic state.
pub struct PlState {
    mapper: Arc<dyn MemoryMapper>,
    snapshot: RwLock<Arc<PlSnapshot>>,
    gate: Arc<FabricGate>,
    bank_updates: Arc<Mutex<()>>,
}

impl fmt::Debug for PlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlState")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl PlState {
    /// A state with nothing loaded, mapping IP blocks through `mapper`.
    pub fn new(mapper: Arc<dyn MemoryMapper>) -> PlState {
        PlState {
            mapper,
            snapshot: RwLock::new(Arc::new(PlSnapshot::empty(LoadedBitstream::None, 0))),
            gate: Arc::new(FabricGate::default()),
            bank_updates: Arc::new(Mutex::new(())),
        }
    }

    pub fn mapper(&self) -> &Arc<dyn MemoryMapper> {
        &self.mapper
    }

    /// The current metadata. Holding a snapshot does not block reconfiguration.
    pub fn snapshot(&self) -> Arc<PlSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn replace(&self, snapshot: PlSnapshot) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(snapshot);
    }

    /// Apply `f` to a copy of the snapshot of `generation` and publish the result.
    ///
    /// Used for bookkeeping that does not change what the fabric holds, so the generation
    /// stays the same and outstanding windows stay valid.
    fn amend<F>(&self, generation: u64, f: F) -> Result<(), FabricError>
    where
        F: FnOnce(&mut PlSnapshot) -> Result<(), FabricError>,
    {
        let mut current = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        if current.generation != generation {
            return Err(FabricError::Stale(format!(
                "Snapshot generation {generation} has been replaced by generation {}",
                current.generation
            )));
        }
        let mut next = PlSnapshot::clone(&current);
        f(&mut next)?;
        *current = Arc::new(next);
        Ok(())
    }

    /// Hold off reconfiguration until the returned access is dropped.
    ///
    /// Register windows from this state enter the section on every access. Holding it
    /// around a sequence of accesses keeps the whole sequence on one bitstream.
    pub fn enter(&self) -> FabricAccess<'_> {
        self.gate.shared()
    }

    pub fn bitstream(&self) -> LoadedBitstream {
        self.snapshot().bitstream.clone()
    }

    /// When the current bitstream finished loading.
    pub fn timestamp(&self) -> Option<SystemTime> {
        match self.snapshot().bitstream {
            LoadedBitstream::Loaded { timestamp, .. } => Some(timestamp),
            _ => None,
        }
    }

    pub fn ip_names(&self) -> Vec<String> {
        self.snapshot().ip_dict.keys().cloned().collect()
    }

    pub fn gpio_names(&self) -> Vec<String> {
        self.snapshot().gpio_dict.keys().cloned().collect()
    }

    pub fn ip_addr_base(&self, name: &str) -> Result<u64, FabricError> {
        Ok(self.snapshot().ip(name)?.base_address)
    }

    pub fn ip_addr_range(&self, name: &str) -> Result<usize, FabricError> {
        Ok(self.snapshot().ip(name)?.range)
    }

    /// The user index of GPIO line `name`: its bit in the bank's data register.
    pub fn get_gpio_user_ix(&self, name: &str) -> Result<u32, FabricError> {
        Ok(self.snapshot().gpio(name)?.index)
    }

    fn tokenize(
        &self,
        snapshot: &PlSnapshot,
        window: RegisterWindow,
    ) -> Result<RegisterWindow, FabricError> {
        let window = window.with_token(PlToken::new(snapshot.generation, self.gate.clone()));
        if !window.is_valid() {
            return Err(FabricError::Stale(format!(
                "Snapshot generation {} has been replaced by a reconfiguration",
                snapshot.generation
            )));
        }
        Ok(window)
    }

    /// Open a window over the IP block `name` as recorded in `snapshot`.
    ///
    /// # Returns: `Result<RegisterWindow, FabricError>`
    /// * `Ok(RegisterWindow)` - A window covering the block's whole range
    /// * `Err(FabricError::NotFound)` - `snapshot` has no such block
    /// * `Err(FabricError::Stale)` - `snapshot` is no longer current
    /// * `Err(FabricError::Mapping)` - The block could not be mapped
    pub fn ip_window(
        &self,
        snapshot: &PlSnapshot,
        name: &str,
    ) -> Result<RegisterWindow, FabricError> {
        let ip = snapshot.ip(name)?;
        trace!(
            "Opening window over IP block '{name}' at {:#x}",
            ip.base_address
        );
        let window = RegisterWindow::new(self.mapper.as_ref(), ip.base_address, ip.range)?;
        self.tokenize(snapshot, window)
    }

    /// Open a window over the design's GPIO bank as recorded in `snapshot`.
    ///
    /// Every bank window handed out by this state shares one update lock, so
    /// [`RegisterWindow::update_u32`] calls through different windows never interleave.
    pub fn gpio_bank_window(&self, snapshot: &PlSnapshot) -> Result<RegisterWindow, FabricError> {
        let bank = snapshot.gpio_bank.as_ref().ok_or_else(|| {
            FabricError::NotFound(format!(
                "The loaded bitstream ({}) has no GPIO bank",
                snapshot.bitstream
            ))
        })?;
        let window = RegisterWindow::new(self.mapper.as_ref(), bank.base_address, bank.range)?
            .with_update_lock(self.bank_updates.clone());
        self.tokenize(snapshot, window)
    }

    /// Read the first register of IP block `name` from hardware.
    pub fn get_ip_state(&self, name: &str) -> Result<IpState, FabricError> {
        let _access = self.enter();
        let snapshot = self.snapshot();
        let window = self.ip_window(&snapshot, name)?;
        Ok(IpState {
            tag: snapshot.ip(name)?.state.clone(),
            value: window.read_u32(0)?,
        })
    }

    /// Read GPIO line `name` from the bank's data register.
    pub fn get_gpio_state(&self, name: &str) -> Result<GpioState, FabricError> {
        let _access = self.enter();
        let snapshot = self.snapshot();
        let line = snapshot.gpio(name)?;
        let raw = self.gpio_bank_window(&snapshot)?.read_u32(0)?;
        let bank = if line.count >= 32 {
            raw
        } else {
            raw & ((1u32 << line.count) - 1)
        };
        Ok(GpioState {
            index: line.index,
            count: line.count,
            bank,
            level: (bank >> line.index) & 1 == 1,
        })
    }

    /// Copy `data` to the start of IP block `name` and record `tag` as its state.
    ///
    /// # Returns: `Result<(), FabricError>`
    /// * `Ok(())` - The data was written and the tag recorded
    /// * `Err(FabricError::NotFound)` - No such block
    /// * `Err(FabricError::OutOfRange)` - `data` is longer than the block; nothing was written
    pub fn load_ip_data(&self, name: &str, tag: &str, data: &[u8]) -> Result<(), FabricError> {
        let _access = self.enter();
        let snapshot = self.snapshot();
        self.ip_window(&snapshot, name)?.write_bytes(0, data)?;
        self.amend(snapshot.generation, |next| {
            *next.ip_state_mut(name)? = Some(tag.to_owned());
            Ok(())
        })?;
        info!("Loaded {} bytes of {tag} into IP block {name}", data.len());
        Ok(())
    }

    /// Record `program` as the owner of IP block `name` in `snapshot`.
    ///
    /// A block is free when it has no state tag or its tag already names `program`.
    ///
    /// # Returns: `Result<(), FabricError>`
    /// * `Ok(())` - `program` owns the block
    /// * `Err(FabricError::InUse)` - Another program owns the block
    /// * `Err(FabricError::Stale)` - `snapshot` is no longer current
    pub fn claim_ip(
        &self,
        snapshot: &PlSnapshot,
        name: &str,
        program: &str,
    ) -> Result<(), FabricError> {
        self.amend(snapshot.generation, |next| {
            claim(next.ip_state_mut(name)?, name, program)
        })?;
        debug!("IP block {name} claimed by {program}");
        Ok(())
    }

    /// As [`claim_ip`](PlState::claim_ip), for GPIO line `name`.
    pub fn claim_gpio(
        &self,
        snapshot: &PlSnapshot,
        name: &str,
        program: &str,
    ) -> Result<(), FabricError> {
        self.amend(snapshot.generation, |next| {
            claim(next.gpio_state_mut(name)?, name, program)
        })?;
        debug!("GPIO line {name} claimed by {program}");
        Ok(())
    }

    /// Clear the state tag of IP block `name` if `program` owns it.
    pub fn release_ip(
        &self,
        snapshot: &PlSnapshot,
        name: &str,
        program: &str,
    ) -> Result<(), FabricError> {
        self.amend(snapshot.generation, |next| {
            release(next.ip_state_mut(name)?, program);
            Ok(())
        })
    }

    /// As [`release_ip`](PlState::release_ip), for GPIO line `name`.
    pub fn release_gpio(
        &self,
        snapshot: &PlSnapshot,
        name: &str,
        program: &str,
    ) -> Result<(), FabricError> {
        self.amend(snapshot.generation, |next| {
            release(next.gpio_state_mut(name)?, program);
            Ok(())
        })
    }

    /// Restore every IP block's state tag to what the overlay described.
    pub fn reset_ip_dict(&self) {
        let mut current = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        let mut next = PlSnapshot::clone(&current);
        next.ip_dict = next.origin.0.clone();
        *current = Arc::new(next);
        info!("IP dictionary reset");
    }

    /// Restore every GPIO line's state tag to what the overlay described.
    pub fn reset_gpio_dict(&self) {
        let mut current = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        let mut next = PlSnapshot::clone(&current);
        next.gpio_dict = next.origin.1.clone();
        *current = Arc::new(next);
        info!("GPIO dictionary reset");
    }

    /// Forget everything about the fabric, as if nothing had been loaded.
    pub fn reset(&self) {
        let mut reconfiguration = self.begin_reconfiguration();
        reconfiguration.invalidate();
        let generation = self.gate.generation();
        self.replace(PlSnapshot::empty(LoadedBitstream::None, generation));
        info!("PL state reset");
    }

    /// Enter the process-wide exclusive section for a reconfiguration.
    ///
    /// Blocks until any other reconfiguration has finished and every outstanding
    /// [`FabricAccess`] has been dropped.
    pub(crate) fn begin_reconfiguration(&self) -> Reconfiguration<'_> {
        let guard = self.gate.exclusive();
        trace!("Entered reconfiguration section");
        Reconfiguration {
            pl: self,
            _guard: guard,
            invalidated: false,
        }
    }
}

/// Exclusive access to a [`PlState`] for the duration of a reconfiguration.
///
/// Dropping the guard after [`invalidate`](Reconfiguration::invalidate) without a
/// [`commit`](Reconfiguration::commit) leaves the state `Unknown`.
pub struct Reconfiguration<'a> {
    pl: &'a PlState,
    _guard: RwLockWriteGuard<'a, ()>,
    invalidated: bool,
}

impl Reconfiguration<'_> {
    /// The metadata as of entering the section.
    pub fn current(&self) -> Arc<PlSnapshot> {
        self.pl.snapshot()
    }

    /// Revoke every outstanding window and mark the fabric contents unknown.
    ///
    /// Must be called before the hardware is touched.
    pub fn invalidate(&mut self) {
        let generation = self.pl.gate.advance();
        self.pl
            .replace(PlSnapshot::empty(LoadedBitstream::Unknown, generation));
        self.invalidated = true;
        debug!("PL state invalidated, generation is now {generation}");
    }

    /// Record `id` as loaded with the IP and GPIO metadata of `description`.
    pub fn commit(mut self, id: BitstreamId, description: OverlayDescription) -> Arc<PlSnapshot> {
        if !self.invalidated {
            self.invalidate();
        }
        let generation = self.pl.gate.generation();
        let snapshot = PlSnapshot {
            bitstream: LoadedBitstream::Loaded {
                id: id.clone(),
                timestamp: SystemTime::now(),
            },
            design: description.design,
            origin: Arc::new((description.ip_dict.clone(), description.gpio_dict.clone())),
            ip_dict: description.ip_dict,
            gpio_dict: description.gpio_dict,
            gpio_bank: description.gpio_bank,
            generation,
        };
        info!(
            "PL state now holds {id} with {} IP block(s) and {} GPIO line(s)",
            snapshot.ip_dict.len(),
            snapshot.gpio_dict.len()
        );
        self.pl.replace(snapshot);
        self.pl.snapshot()
    }
}
