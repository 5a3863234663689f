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

use crate::common::{
    Board, DESIGN_A, DESIGN_B, DESIGN_DUAL, InstantFpga, InstantPlatform, TIMER_BASE,
    write_overlay,
};
use fabricd::clock::{ManualClock, PollPolicy};
use fabricd::iop::{FirmwareImage, IopConfig, IopSession, SessionState};
use fabricd::mmio::{MmioBacking, SimulatedBus, SimulatedMemory, Width};
use fabricd::overlay::{LoadOutcome, OverlayLoader};
use fabricd::pl::PlState;
use googletest::prelude::*;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

/// Memory whose next read, once armed, blocks until the test releases it.
struct ParkedMemory {
    memory: SimulatedMemory,
    parked: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
}

impl ParkedMemory {
    fn new(length: usize) -> ParkedMemory {
        ParkedMemory {
            memory: SimulatedMemory::new(length),
            parked: Mutex::new(None),
        }
    }

    /// Returns a receiver signalled when the read arrives and a sender which lets it finish.
    fn arm(&self) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.parked.lock().expect("parked lock") = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }
}

impl MmioBacking for ParkedMemory {
    fn len(&self) -> usize {
        self.memory.len()
    }

    fn read(&self, offset: usize, width: Width) -> u32 {
        let parked = self.parked.lock().expect("parked lock").take();
        if let Some((entered, release)) = parked {
            entered.send(()).expect("test should be waiting");
            release.recv().expect("test should release the read");
        }
        self.memory.read(offset, width)
    }

    fn write(&self, offset: usize, width: Width, value: u32) {
        self.memory.write(offset, width, value)
    }
}

#[gtest]
fn reconfiguration_waits_for_register_reads_in_flight() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let timer = Arc::new(ParkedMemory::new(0x1000));
    timer.memory.poke_u32(0, 42);
    let bus = SimulatedBus::new();
    bus.add_region(TIMER_BASE, timer.clone());
    let pl = Arc::new(PlState::new(Arc::new(bus)));
    let fpga = Arc::new(InstantFpga::default());
    let loader = Arc::new(OverlayLoader::new(
        pl.clone(),
        Box::new(InstantPlatform(fpga.clone())),
        "fpga0",
        PollPolicy::new(Duration::from_millis(100), Duration::from_millis(1)),
        Arc::new(ManualClock::new()),
    ));
    loader
        .load(&write_overlay(dir.path(), "timer", DESIGN_B))
        .expect("load B should succeed");
    let base = write_overlay(dir.path(), "base", DESIGN_A);

    let (entered, release) = timer.arm();
    let reader = {
        let pl = pl.clone();
        thread::spawn(move || pl.get_ip_state("timer"))
    };
    entered
        .recv_timeout(Duration::from_secs(5))
        .expect("read should reach the timer");

    let (done_tx, done_rx) = mpsc::channel();
    let reloader = {
        let loader = loader.clone();
        thread::spawn(move || {
            let outcome = loader.load(&base);
            done_tx.send(()).expect("send");
            outcome
        })
    };
    assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(fpga.downloads(), 1);

    release.send(()).expect("reader should be parked");
    let state = reader
        .join()
        .expect("reader panicked")
        .expect("read should complete on the old design");
    assert_eq!(state.value, 42);
    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("download should go ahead once the read is done");
    expect_that!(
        reloader.join().expect("loader panicked"),
        ok(eq(&LoadOutcome::Reconfigured))
    );
    assert_eq!(fpga.downloads(), 2);
    expect_that!(
        pl.get_ip_state("timer"),
        err(displays_as(contains_substring("FabricError::NotFound")))
    );
}

#[gtest]
fn sessions_sharing_a_reset_bank_stay_independent() {
    let board = Board::new();
    board
        .loader
        .load(&board.overlay("dual", DESIGN_DUAL))
        .expect("load dual should succeed");
    let snapshot = board.pl.snapshot();
    let sessions: Vec<IopSession> = ["iop_pmoda", "iop_pmodb"]
        .into_iter()
        .map(|name| {
            let iop = IopConfig {
                ip_name: name.into(),
                reset_gpio: format!("{name}_reset"),
            };
            let mut session =
                IopSession::from_pl(&board.pl, &snapshot, &iop).expect("design has the IOP");
            session
                .load(&FirmwareImage::from_bytes("mailbox.bin", vec![0x5A; 64]))
                .expect("load should succeed");
            session
        })
        .collect();

    let handles: Vec<_> = sessions
        .into_iter()
        .enumerate()
        .map(|(n, mut session)| {
            thread::spawn(move || {
                for _ in 0..100 {
                    session.start().expect("start should succeed");
                    session.stop().expect("stop should succeed");
                }
                if n == 1 {
                    session.start().expect("start should succeed");
                }
                session.state()
            })
        })
        .collect();
    let states: Vec<SessionState> = handles
        .into_iter()
        .map(|handle| handle.join().expect("session thread panicked"))
        .collect();

    expect_that!(
        states,
        elements_are![eq(&SessionState::Stopped), eq(&SessionState::Running)]
    );
    assert_eq!(board.gpio.peek_u32(0) & 0b11, 0b01);
    expect_that!(
        board.pl.get_gpio_state("iop_pmoda_reset").map(|line| line.level),
        ok(eq(&true))
    );
    expect_that!(
        board.pl.get_gpio_state("iop_pmodb_reset").map(|line| line.level),
        ok(eq(&false))
    );
}
