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

//! Simulated hardware shared by the integration tests.

#![allow(dead_code)]

use fabricd::clock::{ManualClock, PollPolicy};
use fabricd::error::FabricError;
use fabricd::iop::mailbox::{
    MAILBOX_BASE, MAILBOX_COMMAND_OFFSET, MAILBOX_DATA_LEN, MAILBOX_DATA_OFFSET,
};
use fabricd::mmio::{MmioBacking, SimulatedBus, SimulatedMemory, Width};
use fabricd::overlay::OverlayLoader;
use fabricd::pl::PlState;
use fabricd::platforms::platform::{Fpga, Platform};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const GPIO_BANK: u64 = 0x4120_0000;
pub const IOP_BASE: u64 = 0x4000_0000;
pub const IOP_B_BASE: u64 = 0x4001_0000;
pub const IOP_MEMORY: usize = 0x10000;
pub const TIMER_BASE: u64 = 0x4280_0000;

/// An FPGA which finishes every download immediately.
#[derive(Default)]
pub struct InstantFpga {
    downloads: AtomicUsize,
}

impl InstantFpga {
    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

impl Fpga for InstantFpga {
    fn device_handle(&self) -> &str {
        "fpga0"
    }

    fn state(&self) -> Result<String, FabricError> {
        Ok("operating".into())
    }

    fn flags(&self) -> Result<u32, FabricError> {
        Ok(0)
    }

    fn set_flags(&self, _flags: u32) -> Result<(), FabricError> {
        Ok(())
    }

    fn load_firmware(&self, _bitstream_path: &Path) -> Result<(), FabricError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct InstantPlatform(pub Arc<InstantFpga>);

impl Platform for InstantPlatform {
    fn fpga(&self, _device_handle: &str) -> Result<&dyn Fpga, FabricError> {
        Ok(self.0.as_ref())
    }
}

/// IOP memory whose firmware answers every command by leaving the request in place.
pub struct EchoFirmware {
    memory: Mutex<Vec<u8>>,
    writes: AtomicUsize,
    hung: AtomicBool,
    commands: Mutex<Vec<u32>>,
}

impl Default for EchoFirmware {
    fn default() -> Self {
        EchoFirmware {
            memory: Mutex::new(vec![0; IOP_MEMORY]),
            writes: AtomicUsize::new(0),
            hung: AtomicBool::new(false),
            commands: Mutex::new(Vec::new()),
        }
    }
}

const COMMAND: usize = MAILBOX_BASE + MAILBOX_COMMAND_OFFSET;
const DATA: usize = MAILBOX_BASE + MAILBOX_DATA_OFFSET;

impl EchoFirmware {
    pub fn hang(&self) {
        self.hung.store(true, Ordering::SeqCst);
        self.memory.lock().expect("memory lock")[COMMAND] |= 1;
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<u32> {
        self.commands.lock().expect("commands lock").clone()
    }

    pub fn memory(&self, offset: usize, len: usize) -> Vec<u8> {
        self.memory.lock().expect("memory lock")[offset..offset + len].to_vec()
    }

    pub fn data_region(&self) -> Vec<u8> {
        self.memory(DATA, MAILBOX_DATA_LEN)
    }
}

impl MmioBacking for EchoFirmware {
    fn len(&self) -> usize {
        IOP_MEMORY
    }

    fn read(&self, offset: usize, width: Width) -> u32 {
        let memory = self.memory.lock().expect("memory lock");
        let mut bytes = [0u8; 4];
        bytes[..width.bytes()].copy_from_slice(&memory[offset..offset + width.bytes()]);
        u32::from_le_bytes(bytes)
    }

    fn write(&self, offset: usize, width: Width, value: u32) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut memory = self.memory.lock().expect("memory lock");
        memory[offset..offset + width.bytes()]
            .copy_from_slice(&value.to_le_bytes()[..width.bytes()]);
        if offset == COMMAND && value & 1 != 0 {
            self.commands.lock().expect("commands lock").push(value);
            if !self.hung.load(Ordering::SeqCst) {
                memory[COMMAND..COMMAND + 4].copy_from_slice(&[0; 4]);
            }
        }
    }
}

/// A PL state over a simulated bus holding a GPIO bank, a timer and an IOP.
pub struct Board {
    pub dir: tempfile::TempDir,
    pub gpio: Arc<SimulatedMemory>,
    pub timer: Arc<SimulatedMemory>,
    pub firmware: Arc<EchoFirmware>,
    pub firmware_b: Arc<EchoFirmware>,
    pub fpga: Arc<InstantFpga>,
    pub pl: Arc<PlState>,
    pub loader: OverlayLoader,
}

impl Board {
    pub fn new() -> Board {
        let bus = SimulatedBus::new();
        let gpio = Arc::new(SimulatedMemory::new(0x10));
        let timer = Arc::new(SimulatedMemory::new(0x1000));
        let firmware = Arc::new(EchoFirmware::default());
        let firmware_b = Arc::new(EchoFirmware::default());
        bus.add_region(GPIO_BANK, gpio.clone());
        bus.add_region(TIMER_BASE, timer.clone());
        bus.add_region(IOP_BASE, firmware.clone());
        bus.add_region(IOP_B_BASE, firmware_b.clone());

        let pl = Arc::new(PlState::new(Arc::new(bus)));
        let fpga = Arc::new(InstantFpga::default());
        let loader = OverlayLoader::new(
            pl.clone(),
            Box::new(InstantPlatform(fpga.clone())),
            "fpga0",
            PollPolicy::new(Duration::from_millis(100), Duration::from_millis(1)),
            Arc::new(ManualClock::new()),
        );
        Board {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
            gpio,
            timer,
            firmware,
            firmware_b,
            fpga,
            pl,
            loader,
        }
    }

    /// Write `<stem>.bin` and its `<stem>.toml` description into the board's directory.
    pub fn overlay(&self, stem: &str, description: &str) -> PathBuf {
        write_overlay(self.dir.path(), stem, description)
    }
}

/// Write `<stem>.bin` and its `<stem>.toml` description into `dir`.
pub fn write_overlay(dir: &Path, stem: &str, description: &str) -> PathBuf {
    let image = dir.join(format!("{stem}.bin"));
    let mut bytes = vec![0xFF; 32];
    bytes.extend_from_slice(&[0xAA, 0x99, 0x55, 0x66]);
    bytes.extend_from_slice(stem.as_bytes());
    std::fs::write(&image, bytes).expect("failed to write image");
    std::fs::write(dir.join(format!("{stem}.toml")), description)
        .expect("failed to write description");
    image
}

/// Design with an LED bank and an IOP whose reset is GPIO line 0.
pub const DESIGN_A: &str = r#"
[design]
name = "base"

[ip.iop_pmoda]
base_address = 0x40000000
range = 0x10000

[gpio]
base_address = 0x41200000

[gpio.lines.iop_pmoda_reset]
index = 0
count = 1

[gpio.lines.led0]
index = 3
count = 4
"#;

/// Design with only a timer.
pub const DESIGN_B: &str = r#"
[design]
name = "timer"

[ip.timer]
base_address = 0x42800000
range = 0x1000
state = "free-running"
"#;

/// Design with two IOPs whose resets share the GPIO bank.
pub const DESIGN_DUAL: &str = r#"
[design]
name = "dual"

[ip.iop_pmoda]
base_address = 0x40000000
range = 0x10000

[ip.iop_pmodb]
base_address = 0x40010000
range = 0x10000

[gpio]
base_address = 0x41200000

[gpio.lines.iop_pmoda_reset]
index = 0
count = 2

[gpio.lines.iop_pmodb_reset]
index = 1
count = 2
"#;
