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

//! Lifecycle of one IO processor.
//!
//! ```text
//! Unloaded --load--> Loaded --start--> Running <--start/stop--> Stopped
//!                                         |                       ^
//!                                      timeout                   stop
//!                                         v                       |
//!                                      Faulted -------------------+
//! ```
//!
//! Commands can only be issued while `Running`. A mailbox timeout leaves the firmware in an
//! unknown state, so the session moves to `Faulted` and must be stopped and started again
//! before it accepts further commands.

use crate::clock::{Clock, PollPolicy, SystemClock};
use crate::config;
use crate::error::FabricError;
use crate::iop::Opcode;
use crate::iop::mailbox::{MailboxChannel, MailboxLayout};
use crate::mmio::RegisterWindow;
use crate::pl::{PlSnapshot, PlState};
use crate::system_io::fs_read_bytes;
use log::{info, trace, warn};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unloaded,
    Loaded,
    Running,
    Stopped,
    /// A command timed out. Only [`IopSession::stop`] is accepted.
    Faulted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A program for an IOP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    name: String,
    bytes: Vec<u8>,
}

impl FirmwareImage {
    /// # Returns: `Result<FirmwareImage, FabricError>`
    /// * `Ok(FirmwareImage)` - The image, named after its file name
    /// * `Err(FabricError::FileNotFound)` - `path` is not a file
    /// * `Err(FabricError::MalformedImage)` - The file is empty
    pub fn open(path: &Path) -> Result<FirmwareImage, FabricError> {
        if !path.is_file() {
            return Err(FabricError::FileNotFound(path.to_owned()));
        }
        let bytes = fs_read_bytes(path)?;
        if bytes.is_empty() {
            return Err(FabricError::MalformedImage {
                file: path.to_owned(),
                reason: "firmware image is empty".into(),
            });
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Ok(FirmwareImage { name, bytes })
    }

    pub fn from_bytes(name: &str, bytes: Vec<u8>) -> FirmwareImage {
        FirmwareImage {
            name: name.to_owned(),
            bytes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One bit of a GPIO register wired to an IOP's reset input. Set means held in reset.
#[derive(Debug, Clone)]
pub struct ResetLine {
    window: RegisterWindow,
    bit: u32,
}

impl ResetLine {
    pub fn new(window: RegisterWindow, bit: u32) -> Result<ResetLine, FabricError> {
        if bit >= 32 || window.length() < 4 {
            return Err(FabricError::Argument(format!(
                "bit {bit} of {window:?} cannot be used as a reset line"
            )));
        }
        Ok(ResetLine { window, bit })
    }

    /// Set or clear the bit, leaving the other lines of the bank as they are.
    fn update(&self, held: bool) -> Result<(), FabricError> {
        let mask = 1u32 << self.bit;
        trace!("Reset bit {} {}", self.bit, if held { "set" } else { "cleared" });
        self.window
            .update_u32(0, |value| if held { value | mask } else { value & !mask })
            .map(|_| ())
    }

    pub fn hold(&self) -> Result<(), FabricError> {
        self.update(true)
    }

    pub fn release(&self) -> Result<(), FabricError> {
        self.update(false)
    }

    pub fn is_held(&self) -> Result<bool, FabricError> {
        Ok(self.window.read_u32(0)? & (1 << self.bit) != 0)
    }
}

/// Names of the design blocks an IOP is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IopConfig {
    /// IP block holding the IOP's instruction memory and mailbox.
    pub ip_name: String,
    /// GPIO line driving the IOP's reset.
    pub reset_gpio: String,
}

/// The PL blocks a session was built from. Their state tags name the loaded program.
#[derive(Debug)]
struct Claim {
    pl: Arc<PlState>,
    snapshot: Arc<PlSnapshot>,
    iop: IopConfig,
}

impl Claim {
    /// Tag the IOP's IP block and reset line with `program`, giving up `previous`.
    fn take(&self, program: &str, previous: Option<&str>) -> Result<(), FabricError> {
        let Claim { pl, snapshot, iop } = self;
        if let Some(previous) = previous.filter(|previous| *previous != program) {
            pl.release_ip(snapshot, &iop.ip_name, previous)?;
            pl.release_gpio(snapshot, &iop.reset_gpio, previous)?;
        }
        pl.claim_ip(snapshot, &iop.ip_name, program)?;
        if let Err(e) = pl.claim_gpio(snapshot, &iop.reset_gpio, program) {
            pl.release_ip(snapshot, &iop.ip_name, program)?;
            return Err(e);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct IopSession {
    name: String,
    memory: RegisterWindow,
    mailbox: MailboxChannel,
    reset: ResetLine,
    state: SessionState,
    firmware: Option<String>,
    claim: Option<Claim>,
}

impl IopSession {
    pub fn new(
        name: &str,
        memory: RegisterWindow,
        reset: ResetLine,
        layout: MailboxLayout,
        policy: PollPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<IopSession, FabricError> {
        let mailbox = MailboxChannel::new(memory.clone(), layout, policy, clock)?;
        Ok(IopSession {
            name: name.to_owned(),
            memory,
            mailbox,
            reset,
            state: SessionState::Unloaded,
            firmware: None,
            claim: None,
        })
    }

    /// Build a session from the blocks `snapshot` records for `iop`.
    ///
    /// The session's windows go stale once `snapshot` is replaced by a reconfiguration.
    /// Loading firmware claims the IP block and the reset line for it, so a session
    /// for the same IOP with a different program is refused until the claim is released
    /// or the dictionaries are reset.
    pub fn from_pl(
        pl: &Arc<PlState>,
        snapshot: &Arc<PlSnapshot>,
        iop: &IopConfig,
    ) -> Result<IopSession, FabricError> {
        let memory = pl.ip_window(snapshot, &iop.ip_name)?;
        let line = snapshot.gpio(&iop.reset_gpio)?;
        let reset = ResetLine::new(pl.gpio_bank_window(snapshot)?, line.index)?;
        let mut session = IopSession::new(
            &iop.ip_name,
            memory,
            reset,
            MailboxLayout::default(),
            config::mailbox_poll_policy()?,
            Arc::new(SystemClock),
        )?;
        session.claim = Some(Claim {
            pl: pl.clone(),
            snapshot: snapshot.clone(),
            iop: iop.clone(),
        });
        Ok(session)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Name of the loaded firmware image.
    pub fn firmware(&self) -> Option<&str> {
        self.firmware.as_deref()
    }

    pub fn mailbox(&self) -> &MailboxChannel {
        &self.mailbox
    }

    fn transition(&mut self, state: SessionState) {
        info!("IOP {}: {} -> {state}", self.name, self.state);
        self.state = state;
    }

    /// Hold the IOP in reset and copy `firmware` to the start of its memory.
    ///
    /// # Returns: `Result<(), FabricError>`
    /// * `Ok(())` - The session is `Loaded`
    /// * `Err(FabricError::Argument)` - The image would overlap the mailbox; nothing was
    ///   written
    /// * `Err(FabricError::InUse)` - Another program owns the IOP; nothing was written
    pub fn load(&mut self, firmware: &FirmwareImage) -> Result<(), FabricError> {
        let limit = self.mailbox.layout().base;
        if firmware.len() > limit {
            return Err(FabricError::Argument(format!(
                "firmware {} is {} bytes but IOP {} only has {limit} bytes below its mailbox",
                firmware.name(),
                firmware.len(),
                self.name
            )));
        }
        if let Some(claim) = &self.claim {
            claim.take(firmware.name(), self.firmware.as_deref())?;
        }
        {
            let _access = self.memory.enter()?;
            self.reset.hold()?;
            self.memory.write_bytes(0, firmware.bytes())?;
            self.mailbox.clear()?;
        }
        self.firmware = Some(firmware.name().to_owned());
        info!(
            "Loaded {} ({} bytes) into IOP {}",
            firmware.name(),
            firmware.len(),
            self.name
        );
        self.transition(SessionState::Loaded);
        Ok(())
    }

    /// Release the IOP from reset.
    pub fn start(&mut self) -> Result<(), FabricError> {
        match self.state {
            SessionState::Running => Ok(()),
            SessionState::Loaded | SessionState::Stopped => {
                {
                    let _access = self.memory.enter()?;
                    self.mailbox.clear()?;
                    self.reset.release()?;
                }
                self.transition(SessionState::Running);
                Ok(())
            }
            state => Err(FabricError::SessionState(format!(
                "IOP {} cannot start while {state}",
                self.name
            ))),
        }
    }

    /// Hold the IOP in reset.
    pub fn stop(&mut self) -> Result<(), FabricError> {
        if self.state == SessionState::Unloaded {
            return Err(FabricError::SessionState(format!(
                "IOP {} has no firmware to stop",
                self.name
            )));
        }
        self.reset.hold()?;
        self.transition(SessionState::Stopped);
        Ok(())
    }

    /// Send one command to the running firmware.
    ///
    /// # Returns: `Result<Vec<u8>, FabricError>`
    /// * `Ok(Vec<u8>)` - `response_len` bytes of response
    /// * `Err(FabricError::SessionState)` - The session is not `Running`
    /// * `Err(FabricError::Timeout)` - The firmware did not answer; the session is `Faulted`
    pub fn invoke(
        &mut self,
        opcode: Opcode,
        request: &[u8],
        response_len: usize,
    ) -> Result<Vec<u8>, FabricError> {
        if self.state != SessionState::Running {
            return Err(FabricError::SessionState(format!(
                "IOP {} cannot run opcode {opcode} while {}",
                self.name, self.state
            )));
        }
        match self.mailbox.invoke(opcode, request, response_len) {
            Err(e @ FabricError::Timeout(_)) => {
                warn!("IOP {} faulted: {e}", self.name);
                self.transition(SessionState::Faulted);
                Err(e)
            }
            result => result,
        }
    }
}
