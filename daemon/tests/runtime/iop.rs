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

use crate::common::{Board, DESIGN_A, DESIGN_B, EchoFirmware, IOP_BASE};
use fabricd::clock::{Clock, ManualClock, PollPolicy};
use fabricd::iop::mailbox::MailboxLayout;
use fabricd::iop::{
    DevMode, FirmwareImage, IopConfig, IopSession, IssueCommand, Opcode, PinMap, ResetLine,
    RoutingCode, SessionState, SharedSession, configure_pins,
};
use fabricd::mmio::{RegisterWindow, SimulatedMemory, Width};
use googletest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn iop_config() -> IopConfig {
    IopConfig {
        ip_name: "iop_pmoda".into(),
        reset_gpio: "iop_pmoda_reset".into(),
    }
}

fn running_session(board: &Board) -> IopSession {
    let snapshot = board.pl.snapshot();
    let mut session =
        IopSession::from_pl(&board.pl, &snapshot, &iop_config()).expect("design A has an IOP");
    session
        .load(&FirmwareImage::from_bytes("mailbox.bin", vec![0x5A; 128]))
        .expect("load should succeed");
    session.start().expect("start should succeed");
    session
}

#[gtest]
fn session_from_the_loaded_design_runs_commands() {
    let board = Board::new();
    board
        .loader
        .load(&board.overlay("base", DESIGN_A))
        .expect("load A should succeed");

    let snapshot = board.pl.snapshot();
    let mut session =
        IopSession::from_pl(&board.pl, &snapshot, &iop_config()).expect("design A has an IOP");
    assert_eq!(session.state(), SessionState::Unloaded);
    session
        .load(&FirmwareImage::from_bytes("mailbox.bin", vec![0x5A; 128]))
        .expect("load should succeed");
    assert_eq!(board.gpio.peek_u32(0) & 1, 1);
    expect_that!(board.firmware.memory(0, 128), each(eq(&0x5A)));

    session.start().expect("start should succeed");
    assert_eq!(board.gpio.peek_u32(0) & 1, 0);

    configure_pins(&mut session, 8, &[(2, RoutingCode::IicScl), (3, RoutingCode::IicSda)])
        .expect("switch should configure");
    expect_that!(
        session.invoke(Opcode::READ_SINGLE_VALUE, &[7, 0, 0, 0], 4),
        ok(elements_are![eq(&7), eq(&0), eq(&0), eq(&0)])
    );
    expect_that!(
        board.firmware.commands(),
        elements_are![
            eq(&Opcode::CONFIGURE_SWITCH.value()),
            eq(&Opcode::READ_SINGLE_VALUE.value())
        ]
    );
}

#[gtest]
fn sessions_stop_working_after_reconfiguration() {
    let board = Board::new();
    board
        .loader
        .load(&board.overlay("base", DESIGN_A))
        .expect("load A should succeed");
    let mut session = running_session(&board);

    board
        .loader
        .load(&board.overlay("timer", DESIGN_B))
        .expect("load B should succeed");
    let writes_before = board.firmware.writes();
    expect_that!(
        session.invoke(Opcode::START_LOG, &[], 0),
        err(displays_as(contains_substring("FabricError::Stale")))
    );
    assert_eq!(board.firmware.writes(), writes_before);
    expect_that!(
        IopSession::from_pl(&board.pl, &board.pl.snapshot(), &iop_config()).map(|s| s.state()),
        err(displays_as(contains_substring("FabricError::NotFound")))
    );
}

#[gtest]
fn a_second_program_is_refused_the_iop() {
    let board = Board::new();
    board
        .loader
        .load(&board.overlay("base", DESIGN_A))
        .expect("load A should succeed");
    let _owner = running_session(&board);
    expect_that!(
        board.pl.get_ip_state("iop_pmoda").map(|state| state.tag),
        ok(some(eq("mailbox.bin")))
    );

    let snapshot = board.pl.snapshot();
    let mut intruder =
        IopSession::from_pl(&board.pl, &snapshot, &iop_config()).expect("design A has an IOP");
    let writes_before = board.firmware.writes();
    let gpio_writes_before = board.gpio.writes();
    expect_that!(
        intruder.load(&FirmwareImage::from_bytes("scope.bin", vec![0x11; 16])),
        err(displays_as(contains_substring(
            "FabricError::InUse: iop_pmoda is claimed by mailbox.bin"
        )))
    );
    assert_eq!(board.firmware.writes(), writes_before);
    assert_eq!(board.gpio.writes(), gpio_writes_before);
    assert_eq!(intruder.state(), SessionState::Unloaded);

    board.pl.reset_ip_dict();
    board.pl.reset_gpio_dict();
    intruder
        .load(&FirmwareImage::from_bytes("scope.bin", vec![0x11; 16]))
        .expect("reset dictionaries leave the IOP free");
    expect_that!(
        board.pl.get_ip_state("iop_pmoda").map(|state| state.tag),
        ok(some(eq("scope.bin")))
    );
}

#[gtest]
fn reloading_a_session_moves_its_claim() {
    let board = Board::new();
    board
        .loader
        .load(&board.overlay("base", DESIGN_A))
        .expect("load A should succeed");
    let mut session = running_session(&board);
    session
        .load(&FirmwareImage::from_bytes("scope.bin", vec![0x11; 16]))
        .expect("the owner may load another program");
    expect_that!(
        board.pl.get_ip_state("iop_pmoda").map(|state| state.tag),
        ok(some(eq("scope.bin")))
    );
    let snapshot = board.pl.snapshot();
    expect_that!(
        snapshot.gpio("iop_pmoda_reset").map(|line| line.state.clone()),
        ok(some(eq("scope.bin")))
    );
}

#[gtest]
fn invalid_pin_issues_no_mailbox_writes() {
    let board = Board::new();
    board
        .loader
        .load(&board.overlay("base", DESIGN_A))
        .expect("load A should succeed");
    let mut session = running_session(&board);
    let writes_before = board.firmware.writes();

    expect_that!(
        configure_pins(&mut session, 8, &[(1, RoutingCode::SpiClk), (8, RoutingCode::SpiSs)]),
        err(displays_as(contains_substring("FabricError::InvalidPin")))
    );
    assert_eq!(board.firmware.writes(), writes_before);
    expect_that!(board.firmware.commands(), is_empty());
}

#[gtest]
fn busy_forever_mailbox_times_out_at_the_bound() {
    let firmware = Arc::new(EchoFirmware::default());
    let clock = Arc::new(ManualClock::with_tick(Duration::from_micros(10)));
    let timeout = Duration::from_millis(20);
    let mut session = IopSession::new(
        "iop_pmoda",
        RegisterWindow::from_backing(IOP_BASE, firmware.clone()),
        ResetLine::new(
            RegisterWindow::from_backing(0, Arc::new(SimulatedMemory::new(4))),
            0,
        )
        .expect("reset line"),
        MailboxLayout::default(),
        PollPolicy::spin(timeout),
        clock.clone(),
    )
    .expect("session should build");
    session
        .load(&FirmwareImage::from_bytes("stuck.bin", vec![0; 16]))
        .expect("load should succeed");
    session.start().expect("start should succeed");
    firmware.hang();
    let writes_before = firmware.writes();

    let started = clock.now();
    expect_that!(
        session.invoke(Opcode::READ_SINGLE_VALUE, &[1], 4),
        err(displays_as(contains_substring("FabricError::Timeout")))
    );
    let waited = clock.now() - started;
    assert!(waited >= timeout, "gave up after {waited:?}");
    assert!(waited < timeout * 2, "kept polling for {waited:?}");
    assert_eq!(firmware.writes(), writes_before);
    assert_eq!(session.state(), SessionState::Faulted);
}

#[gtest]
fn devmode_requests_reach_the_data_region() {
    let board = Board::new();
    board
        .loader
        .load(&board.overlay("base", DESIGN_A))
        .expect("load A should succeed");
    let shared = SharedSession::new(running_session(&board));
    let mut devmode = DevMode::new(shared.clone(), PinMap::all_gpio());
    devmode.start().expect("switch should configure");

    devmode
        .write(0x4000_0010, Width::Word, &[0xCAFE_F00D])
        .expect("write should succeed");
    expect_that!(
        board.firmware.data_region()[..12].to_vec(),
        elements_are![
            eq(&0x10),
            eq(&0x00),
            eq(&0x00),
            eq(&0x40),
            eq(&0x7),
            eq(&1),
            eq(&0),
            eq(&0),
            eq(&0x0D),
            eq(&0xF0),
            eq(&0xFE),
            eq(&0xCA)
        ]
    );

    let mut other = shared.clone();
    expect_that!(other.issue(Opcode::STOP_LOG, &[], 0), ok(is_empty()));
    assert_eq!(shared.lock().state(), SessionState::Running);
}
