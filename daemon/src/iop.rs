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

//! IO processors embedded in the fabric.
//!
//! An IOP is a small soft microcontroller whose instruction memory is an IP block of the
//! loaded design. The host loads a firmware image into that memory, releases the IOP from
//! reset and then talks to it through a [`MailboxChannel`] at the top of the same memory.
//!
//! - [`mailbox`] - the four-step command/response handshake
//! - [`session`] - firmware loading, reset control and the session state machine
//! - [`switch`] - crossbar routing of the adapter pins
//! - [`adapter`] - the [`IssueCommand`] capability peripheral adapters are built on
//! - [`devmode`] - a generic adapter for raw register access through the IOP

pub mod adapter;
pub mod devmode;
pub mod mailbox;
pub mod session;
pub mod switch;

pub use adapter::{IssueCommand, SharedSession};
pub use devmode::{Access, DevMode, command_word};
pub use mailbox::{MailboxChannel, MailboxLayout, MailboxState};
pub use session::{FirmwareImage, IopConfig, IopSession, ResetLine, SessionState};
pub use switch::{PinMap, RoutingCode, configure_pins, configure_switch};

use std::fmt;

/// The word written to the mailbox command register.
///
/// Every well-known opcode is odd, so the low bit doubles as the busy flag when the command
/// and status registers are shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opcode(pub u32);

impl Opcode {
    pub const CONFIGURE_SWITCH: Opcode = Opcode(0x1);
    pub const READ_SINGLE_VALUE: Opcode = Opcode(0x3);
    pub const WRITE_GPIO: Opcode = Opcode(0x5);
    pub const START_LOG: Opcode = Opcode(0x7);
    pub const STOP_LOG: Opcode = Opcode(0x9);
    pub const DEV_WRITE: Opcode = Opcode(0x11);
    pub const DEV_READ: Opcode = Opcode(0x13);

    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
