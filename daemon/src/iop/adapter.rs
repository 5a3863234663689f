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

//! The capability peripheral adapters are built against.
//!
//! An adapter only needs to send a command, read the answer and ask whether the IOP is free.
//! It holds anything that implements [`IssueCommand`]: an [`IopSession`] it owns outright,
//! or a [`SharedSession`] when several adapters drive the same IOP.

use crate::error::FabricError;
use crate::iop::Opcode;
use crate::iop::session::{IopSession, SessionState};
use std::sync::{Arc, Mutex, MutexGuard};

pub trait IssueCommand {
    /// Send `opcode` with `payload` and return `response_len` bytes of response.
    fn issue(
        &mut self,
        opcode: Opcode,
        payload: &[u8],
        response_len: usize,
    ) -> Result<Vec<u8>, FabricError>;

    /// `true` when the firmware has finished the last command it was sent.
    fn mailbox_idle(&mut self) -> Result<bool, FabricError>;

    fn session_state(&mut self) -> SessionState;
}

impl IssueCommand for IopSession {
    fn issue(
        &mut self,
        opcode: Opcode,
        payload: &[u8],
        response_len: usize,
    ) -> Result<Vec<u8>, FabricError> {
        self.invoke(opcode, payload, response_len)
    }

    fn mailbox_idle(&mut self) -> Result<bool, FabricError> {
        self.mailbox().is_idle()
    }

    fn session_state(&mut self) -> SessionState {
        self.state()
    }
}

impl<T: IssueCommand + ?Sized> IssueCommand for &mut T {
    fn issue(
        &mut self,
        opcode: Opcode,
        payload: &[u8],
        response_len: usize,
    ) -> Result<Vec<u8>, FabricError> {
        (**self).issue(opcode, payload, response_len)
    }

    fn mailbox_idle(&mut self) -> Result<bool, FabricError> {
        (**self).mailbox_idle()
    }

    fn session_state(&mut self) -> SessionState {
        (**self).session_state()
    }
}

/// An [`IopSession`] shared between adapters and threads.
///
/// Each command holds the session lock for the whole mailbox handshake.
#[derive(Debug, Clone)]
pub struct SharedSession(Arc<Mutex<IopSession>>);

impl SharedSession {
    pub fn new(session: IopSession) -> SharedSession {
        SharedSession(Arc::new(Mutex::new(session)))
    }

    /// Exclusive access for lifecycle operations such as `start` and `stop`.
    pub fn lock(&self) -> MutexGuard<'_, IopSession> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl IssueCommand for SharedSession {
    fn issue(
        &mut self,
        opcode: Opcode,
        payload: &[u8],
        response_len: usize,
    ) -> Result<Vec<u8>, FabricError> {
        self.lock().invoke(opcode, payload, response_len)
    }

    fn mailbox_idle(&mut self) -> Result<bool, FabricError> {
        self.lock().mailbox().is_idle()
    }

    fn session_state(&mut self) -> SessionState {
        self.lock().state()
    }
}
