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

use crate::common::{Board, DESIGN_A, DESIGN_B};
use fabricd::overlay::{LoadOutcome, Overlay};
use fabricd::pl::LoadedBitstream;
use googletest::prelude::*;

#[gtest]
fn led0_disappears_when_a_design_without_it_is_loaded() {
    let board = Board::new();
    let a = board.overlay("base", DESIGN_A);
    let b = board.overlay("timer", DESIGN_B);

    expect_that!(board.loader.load(&a), ok(eq(&LoadOutcome::Reconfigured)));
    board.gpio.poke_u32(0, 0b1010_1000);
    let led0 = board.pl.get_gpio_state("led0").expect("led0 is in design A");
    assert_eq!(led0.count, 4);
    assert_eq!(led0.bank, 0b1000);
    assert!(led0.level);

    board.gpio.poke_u32(0, 0b0111);
    let led0 = board.pl.get_gpio_state("led0").expect("led0 is in design A");
    assert_eq!(led0.bank, 0b0111);
    assert!(!led0.level);

    expect_that!(board.loader.load(&b), ok(eq(&LoadOutcome::Reconfigured)));
    expect_that!(
        board.pl.get_gpio_state("led0"),
        err(displays_as(contains_substring("FabricError::NotFound")))
    );
    board.timer.poke_u32(0, 42);
    let timer = board.pl.get_ip_state("timer").expect("timer is in design B");
    assert_eq!(timer.value, 42);
    assert_eq!(timer.tag.as_deref(), Some("free-running"));
}

#[gtest]
fn loaded_overlays_are_not_downloaded_again() {
    let board = Board::new();
    let a = board.overlay("base", DESIGN_A);
    let b = board.overlay("timer", DESIGN_B);
    let overlay_a = Overlay::open(&a).expect("overlay A should open");

    assert!(!board.loader.is_loaded(&overlay_a));
    board.loader.load(&a).expect("first load should succeed");
    assert!(board.loader.is_loaded(&overlay_a));
    expect_that!(board.loader.load(&a), ok(eq(&LoadOutcome::AlreadyLoaded)));
    assert_eq!(board.fpga.downloads(), 1);

    board.loader.load(&b).expect("loading B should succeed");
    assert!(!board.loader.is_loaded(&overlay_a));
    assert_eq!(board.fpga.downloads(), 2);
    expect_that!(board.pl.ip_names(), elements_are![eq("timer")]);
    expect_that!(board.pl.gpio_names(), is_empty());
}

#[gtest]
fn windows_from_replaced_designs_go_stale() {
    let board = Board::new();
    let a = board.overlay("base", DESIGN_A);
    let b = board.overlay("timer", DESIGN_B);
    board.loader.load(&a).expect("load A should succeed");

    let snapshot = board.pl.snapshot();
    let window = board
        .pl
        .gpio_bank_window(&snapshot)
        .expect("design A has a GPIO bank");
    window.write_u32(0, 1).expect("window is current");

    board.loader.load(&b).expect("load B should succeed");
    let writes_before = board.gpio.writes();
    expect_that!(
        window.read_u32(0),
        err(displays_as(contains_substring("FabricError::Stale")))
    );
    expect_that!(
        window.write_u32(0, 0),
        err(displays_as(contains_substring("FabricError::Stale")))
    );
    assert_eq!(board.gpio.writes(), writes_before);
    expect_that!(
        board.pl.ip_window(&snapshot, "iop_pmoda").map(|w| w.length()),
        err(displays_as(contains_substring("FabricError::Stale")))
    );
}

#[gtest]
fn invalid_images_leave_the_fabric_alone() {
    let board = Board::new();
    let a = board.overlay("base", DESIGN_A);
    board.loader.load(&a).expect("load A should succeed");

    let garbage = board.overlay("garbage", DESIGN_B);
    std::fs::write(&garbage, b"not a bitstream").expect("overwrite image");
    let undescribed = board.overlay("undescribed", "");
    std::fs::remove_file(board.dir.path().join("undescribed.toml")).expect("remove toml");
    let bad_description = board.overlay("bad", "[ip.x]\nbase_address = 0\nrange = 0\n");

    for (path, error) in [
        (garbage, "FabricError::MalformedImage"),
        (undescribed, "FabricError::FileNotFound"),
        (bad_description, "FabricError::MalformedImage"),
        (board.dir.path().join("absent.bin"), "FabricError::FileNotFound"),
    ] {
        expect_that!(
            board.loader.load(&path),
            err(displays_as(contains_substring(error)))
        );
    }
    assert_eq!(board.fpga.downloads(), 1);
    assert!(matches!(board.pl.bitstream(), LoadedBitstream::Loaded { .. }));
    expect_that!(board.pl.ip_names(), elements_are![eq("iop_pmoda")]);
}
