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

//! fabricd - runtime for reconfigurable FPGA fabric and the IO processors inside it.
//!
//! The library holds everything the daemon does, leaves first:
//!
//! - [`mmio`] - bounds-checked register windows over mapped device memory
//! - [`pl`] - the process-wide record of the loaded bitstream and its IP/GPIO metadata
//! - [`overlay`] - validating and downloading bitstreams, then publishing their metadata
//! - [`platforms`] - the kernel reconfiguration interface behind the loader
//! - [`iop`] - mailbox sessions with the soft IO processors and their pin switches
//! - [`comm`] - the DBus service
//!
//! plus the supporting [`clock`], [`config`], [`error`] and [`system_io`] modules.

pub mod clock;
pub mod comm;
pub mod config;
pub mod error;
pub mod iop;
pub mod mmio;
pub mod overlay;
pub mod pl;
pub mod platforms;
pub mod system_io;
