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

//! Programmable logic state.
//!
//! [`PlState`] is the single record of what hardware currently exists in the fabric: which
//! bitstream is loaded, when, and the IP blocks and GPIO lines it provides. There is one
//! instance per process, created in `main` and handed to every consumer as an
//! `Arc<PlState>`. Only the [overlay loader](crate::overlay::OverlayLoader) replaces its
//! contents.
//!
//! Names and addresses are cached in immutable [`PlSnapshot`]s. Hardware values never are:
//! [`PlState::get_ip_state`] and [`PlState::get_gpio_state`] read the device every time.
//!
//! Register windows created from a snapshot carry a [`PlToken`]. Each reconfiguration
//! advances the state's generation, after which all windows from older snapshots refuse
//! access with [`FabricError::Stale`](crate::error::FabricError::Stale). Accesses and
//! reconfigurations exclude each other through the [`section`].
//!
//! Besides names and addresses the dictionaries carry a state tag per entry: the program
//! that owns an IP block or GPIO line. [`PlState::claim_ip`] and [`PlState::claim_gpio`]
//! refuse a second owner, and [`PlState::reset_ip_dict`] and [`PlState::reset_gpio_dict`]
//! restore the tags the overlay described.
//!
//! # Examples
//!
//! ```rust
//! # use fabricd::mmio::SimulatedBus;
//! # use fabricd::pl::{LoadedBitstream, PlState};
//! # use std::sync::Arc;
//! let pl = PlState::new(Arc::new(SimulatedBus::new()));
//! assert!(matches!(pl.bitstream(), LoadedBitstream::None));
//! assert!(pl.ip_names().is_empty());
//! ```

pub mod metadata;
pub mod section;
pub mod state;

pub use metadata::{GpioBank, GpioDict, GpioLine, IpBlock, IpDict, OverlayDescription};
pub use section::{FabricAccess, PlToken};
pub use state::{BitstreamId, GpioState, IpState, LoadedBitstream, PlSnapshot, PlState};
