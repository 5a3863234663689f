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

//! The host side of the IOP mailbox.
//!
//! The mailbox lives at the top of the IOP's memory:
//!
//! ```text
//! base + 0x000 .. base + 0xF00   firmware scratch, untouched by the host
//! base + 0xF00 .. base + 0xFF8   data region (request in, response out)
//! base + 0xFFC                   command word, doubling as the status flag
//! ```
//!
//! The handshake is:
//!
//! 1. Poll status until idle.
//! 2. Write the request into the data region, then the opcode with the busy bit set.
//! 3. The firmware executes, writes its response and clears busy.
//! 4. Poll status until idle, then read the response.
//!
//! Both polls are bounded by the channel's [`PollPolicy`]. There are no retries: a
//! [`FabricError::Timeout`] is final for the command in flight.

use crate::clock::{Clock, PollPolicy, poll_until};
use crate::error::FabricError;
use crate::iop::Opcode;
use crate::mmio::RegisterWindow;
use log::{debug, trace};
use std::sync::Arc;

pub const MAILBOX_BASE: usize = 0xF000;
pub const MAILBOX_DATA_OFFSET: usize = 0xF00;
pub const MAILBOX_DATA_LEN: usize = 0xF8;
pub const MAILBOX_COMMAND_OFFSET: usize = 0xFFC;
pub const MAILBOX_BUSY_MASK: u32 = 0x1;

/// Where the mailbox registers sit inside the IOP window.
///
/// `base` is relative to the start of the window; every other offset is relative to `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxLayout {
    pub base: usize,
    pub data_offset: usize,
    pub data_len: usize,
    pub command_offset: usize,
    pub status_offset: usize,
    pub busy_mask: u32,
}

impl Default for MailboxLayout {
    fn default() -> Self {
        MailboxLayout {
            base: MAILBOX_BASE,
            data_offset: MAILBOX_DATA_OFFSET,
            data_len: MAILBOX_DATA_LEN,
            command_offset: MAILBOX_COMMAND_OFFSET,
            status_offset: MAILBOX_COMMAND_OFFSET,
            busy_mask: MAILBOX_BUSY_MASK,
        }
    }
}

impl MailboxLayout {
    /// Offset of the data region in the window. Only meaningful for a validated layout.
    pub fn data(&self) -> usize {
        self.base.saturating_add(self.data_offset)
    }

    /// Offset of the command register in the window. Only meaningful for a validated layout.
    pub fn command(&self) -> usize {
        self.base.saturating_add(self.command_offset)
    }

    /// Offset of the status register in the window. Only meaningful for a validated layout.
    pub fn status(&self) -> usize {
        self.base.saturating_add(self.status_offset)
    }

    /// `true` when the busy flag lives in the command word itself.
    pub fn shares_status(&self) -> bool {
        self.command_offset == self.status_offset
    }

    /// Start and end of `len` bytes at `offset` past the mailbox base.
    fn span(&self, offset: usize, len: usize) -> Result<(usize, usize), FabricError> {
        let start = self.base.checked_add(offset);
        match start.and_then(|start| start.checked_add(len).map(|end| (start, end))) {
            Some(span) => Ok(span),
            None => Err(FabricError::Argument(format!(
                "{self:?} places {len} bytes at {offset:#x} past {:#x}, beyond the address space",
                self.base
            ))),
        }
    }

    /// Check the layout fits inside a window of `window_length` bytes.
    ///
    /// # Returns: `Result<(), FabricError>`
    /// * `Ok(())` - Every register and the data region lie inside the window
    /// * `Err(FabricError::Argument)` - A register or the data region is outside the window,
    ///   misaligned, or overlapping another, or the busy mask is empty
    pub fn validate(&self, window_length: usize) -> Result<(), FabricError> {
        let invalid = |reason: String| Err(FabricError::Argument(format!("{self:?} {reason}")));
        if self.busy_mask == 0 {
            return invalid("has an empty busy mask".into());
        }
        let data = self.span(self.data_offset, self.data_len)?;
        let command = self.span(self.command_offset, 4)?;
        let status = self.span(self.status_offset, 4)?;
        if self.data_len == 0 || data.0 % 4 != 0 {
            return invalid("needs a non-empty, word aligned data region".into());
        }
        if command.0 % 4 != 0 || status.0 % 4 != 0 {
            return invalid("has misaligned command or status registers".into());
        }
        let end = [data.1, command.1, status.1]
            .into_iter()
            .max()
            .unwrap_or(0);
        if end > window_length {
            return invalid(format!(
                "does not fit in a window of {window_length:#x} bytes"
            ));
        }
        let overlaps_data = |(start, end): (usize, usize)| end > data.0 && start < data.1;
        if overlaps_data(command) || overlaps_data(status) {
            return invalid("has registers inside the data region".into());
        }
        Ok(())
    }
}

/// Status as read from hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxState {
    Idle,
    Busy,
}

/// One IOP's mailbox.
///
/// [`invoke`](MailboxChannel::invoke) takes `&mut self`, so a channel has at most one
/// command in flight. Share it between threads through
/// [`SharedSession`](crate::iop::SharedSession).
pub struct MailboxChannel {
    window: RegisterWindow,
    layout: MailboxLayout,
    policy: PollPolicy,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MailboxChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxChannel")
            .field("window", &self.window)
            .field("layout", &self.layout)
            .field("policy", &self.policy)
            .finish()
    }
}

impl MailboxChannel {
    pub fn new(
        window: RegisterWindow,
        layout: MailboxLayout,
        policy: PollPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<MailboxChannel, FabricError> {
        layout.validate(window.length())?;
        Ok(MailboxChannel {
            window,
            layout,
            policy,
            clock,
        })
    }

    pub fn layout(&self) -> &MailboxLayout {
        &self.layout
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Read the status flag from hardware.
    pub fn state(&self) -> Result<MailboxState, FabricError> {
        let status = self.window.read_u32(self.layout.status())?;
        Ok(match status & self.layout.busy_mask {
            0 => MailboxState::Idle,
            _ => MailboxState::Busy,
        })
    }

    pub fn is_idle(&self) -> Result<bool, FabricError> {
        Ok(self.state()? == MailboxState::Idle)
    }

    /// Force the mailbox to idle. Only safe while the IOP is held in reset.
    pub(crate) fn clear(&self) -> Result<(), FabricError> {
        trace!("Clearing mailbox at {:#x}", self.layout.base);
        self.window.write_u32(self.layout.command(), 0)?;
        if !self.layout.shares_status() {
            self.window.write_u32(self.layout.status(), 0)?;
        }
        Ok(())
    }

    fn wait_idle(&self, phase: &str, opcode: Opcode) -> Result<(), FabricError> {
        let idle = poll_until(self.clock.as_ref(), self.policy, || self.is_idle())?;
        if !idle {
            return Err(FabricError::Timeout(format!(
                "mailbox stayed busy {phase} opcode {opcode} for longer than {:?}",
                self.policy.timeout
            )));
        }
        Ok(())
    }

    /// Run one command through the mailbox.
    ///
    /// # Returns: `Result<Vec<u8>, FabricError>`
    /// * `Ok(Vec<u8>)` - The first `response_len` bytes of the data region after completion
    /// * `Err(FabricError::Argument)` - The request or response does not fit the data region;
    ///   nothing was written
    /// * `Err(FabricError::Timeout)` - The mailbox never became idle. If this happens before
    ///   the request is sent nothing was written.
    pub fn invoke(
        &mut self,
        opcode: Opcode,
        request: &[u8],
        response_len: usize,
    ) -> Result<Vec<u8>, FabricError> {
        let capacity = self.layout.data_len;
        if request.len() > capacity || response_len > capacity {
            return Err(FabricError::Argument(format!(
                "opcode {opcode}: request of {} bytes or response of {response_len} bytes \
                exceeds the {capacity} byte data region",
                request.len()
            )));
        }

        let _access = self.window.enter()?;
        self.wait_idle("before sending", opcode)?;
        self.window.write_bytes(self.layout.data(), request)?;
        if self.layout.shares_status() {
            self.window
                .write_u32(self.layout.command(), opcode.value() | self.layout.busy_mask)?;
        } else {
            self.window
                .write_u32(self.layout.status(), self.layout.busy_mask)?;
            self.window
                .write_u32(self.layout.command(), opcode.value())?;
        }
        debug!(
            "Sent opcode {opcode} with {} byte request to mailbox at {:#x}",
            request.len(),
            self.window.base_address().wrapping_add(self.layout.base as u64)
        );

        self.wait_idle("after sending", opcode)?;
        self.window.read_bytes(self.layout.data(), response_len)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::mmio::{MmioBacking, Width};
    use crate::pl::PlToken;
    use crate::pl::section::FabricGate;
    use googletest::prelude::*;
    use rstest::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    type Responder = Box<dyn Fn(u32, &mut [u8]) + Send + Sync>;

    /// IOP memory with a firmware stand-in behind the mailbox.
    ///
    /// A write to the command register with busy set runs `respond` over the data region and
    /// clears busy, unless the IOP is hung.
    pub(crate) struct ScriptedIop {
        memory: Mutex<Vec<u8>>,
        layout: MailboxLayout,
        writes: AtomicUsize,
        busy_polls: AtomicUsize,
        hung: AtomicBool,
        commands: Mutex<Vec<(u32, Vec<u8>)>>,
        respond: Responder,
    }

    impl ScriptedIop {
        pub(crate) fn new(length: usize, layout: MailboxLayout) -> ScriptedIop {
            ScriptedIop::with_responder(length, layout, Box::new(|_, _| {}))
        }

        pub(crate) fn with_responder(
            length: usize,
            layout: MailboxLayout,
            respond: Responder,
        ) -> ScriptedIop {
            ScriptedIop {
                memory: Mutex::new(vec![0; length]),
                layout,
                writes: AtomicUsize::new(0),
                busy_polls: AtomicUsize::new(0),
                hung: AtomicBool::new(false),
                commands: Mutex::new(Vec::new()),
                respond,
            }
        }

        /// Report busy for the next `polls` status reads.
        pub(crate) fn stay_busy_for(&self, polls: usize) {
            self.busy_polls.store(polls, Ordering::SeqCst);
        }

        /// Never clear busy again, and report busy right away.
        pub(crate) fn hang(&self) {
            self.hung.store(true, Ordering::SeqCst);
            self.set_word(self.layout.status(), self.layout.busy_mask);
        }

        pub(crate) fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }

        pub(crate) fn commands(&self) -> Vec<(u32, Vec<u8>)> {
            self.commands.lock().expect("commands lock").clone()
        }

        pub(crate) fn memory(&self, offset: usize, len: usize) -> Vec<u8> {
            self.memory.lock().expect("memory lock")[offset..offset + len].to_vec()
        }

        fn set_word(&self, offset: usize, value: u32) {
            self.memory.lock().expect("memory lock")[offset..offset + 4]
                .copy_from_slice(&value.to_le_bytes());
        }

        fn execute(&self, command: u32) {
            let data = self.layout.data();
            let mut memory = self.memory.lock().expect("memory lock");
            let request = memory[data..data + self.layout.data_len].to_vec();
            self.commands
                .lock()
                .expect("commands lock")
                .push((command, request));
            if self.hung.load(Ordering::SeqCst) {
                return;
            }
            (self.respond)(command, &mut memory[data..data + self.layout.data_len]);
            let status = self.layout.status();
            memory[status..status + 4].copy_from_slice(&0u32.to_le_bytes());
        }
    }

    impl MmioBacking for ScriptedIop {
        fn len(&self) -> usize {
            self.memory.lock().expect("memory lock").len()
        }

        fn read(&self, offset: usize, width: Width) -> u32 {
            let memory = self.memory.lock().expect("memory lock");
            let mut bytes = [0u8; 4];
            bytes[..width.bytes()].copy_from_slice(&memory[offset..offset + width.bytes()]);
            let value = u32::from_le_bytes(bytes);
            if offset == self.layout.status() && self.busy_polls.load(Ordering::SeqCst) > 0 {
                self.busy_polls.fetch_sub(1, Ordering::SeqCst);
                return value | self.layout.busy_mask;
            }
            value
        }

        fn write(&self, offset: usize, width: Width, value: u32) {
            self.writes.fetch_add(1, Ordering::SeqCst);
            {
                let mut memory = self.memory.lock().expect("memory lock");
                memory[offset..offset + width.bytes()]
                    .copy_from_slice(&value.to_le_bytes()[..width.bytes()]);
            }
            let status = self.layout.status();
            let busy = u32::from_le_bytes(
                self.memory(status, 4)
                    .try_into()
                    .expect("status register is 4 bytes"),
            ) & self.layout.busy_mask;
            if offset == self.layout.command() && busy != 0 {
                self.execute(value);
            }
        }
    }

    pub(crate) const IOP_MEMORY: usize = 0x10000;

    /// Responds to every command by echoing the request back.
    pub(crate) fn echo_iop() -> Arc<ScriptedIop> {
        Arc::new(ScriptedIop::new(IOP_MEMORY, MailboxLayout::default()))
    }

    pub(crate) fn channel(iop: &Arc<ScriptedIop>, layout: MailboxLayout) -> MailboxChannel {
        MailboxChannel::new(
            RegisterWindow::from_backing(0x4000_0000, iop.clone()),
            layout,
            PollPolicy::spin(Duration::from_millis(5)),
            Arc::new(ManualClock::with_tick(Duration::from_micros(100))),
        )
        .expect("layout should fit")
    }

    #[gtest]
    fn invoke_runs_the_handshake() {
        let iop = Arc::new(ScriptedIop::with_responder(
            IOP_MEMORY,
            MailboxLayout::default(),
            Box::new(|_, data| {
                let sum: u8 = data[..4].iter().fold(0, |acc, b| acc.wrapping_add(*b));
                data[0] = sum;
            }),
        ));
        let mut channel = channel(&iop, MailboxLayout::default());
        let response = channel
            .invoke(Opcode::READ_SINGLE_VALUE, &[1, 2, 3, 4], 1)
            .expect("invoke should succeed");
        expect_that!(response, elements_are![eq(&10)]);
        let commands = iop.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].0, Opcode::READ_SINGLE_VALUE.value());
        expect_that!(commands[0].1[..4].to_vec(), elements_are![eq(&1), eq(&2), eq(&3), eq(&4)]);
        expect_that!(channel.state(), ok(eq(&MailboxState::Idle)));
    }

    #[gtest]
    fn separate_status_register_is_set_before_the_opcode() {
        let layout = MailboxLayout {
            status_offset: 0xFF8,
            ..MailboxLayout::default()
        };
        let iop = Arc::new(ScriptedIop::new(IOP_MEMORY, layout));
        let mut channel = channel(&iop, layout);
        channel
            .invoke(Opcode::START_LOG, &[], 0)
            .expect("invoke should succeed");
        // status was busy when the opcode landed, so the command ran
        let commands = iop.commands();
        assert_eq!(commands.len(), 1);
        expect_that!(channel.is_idle(), ok(eq(&true)));
    }

    #[gtest]
    fn busy_mailbox_is_polled_not_written() {
        let iop = echo_iop();
        iop.stay_busy_for(10);
        let mut channel = channel(&iop, MailboxLayout::default());
        channel
            .invoke(Opcode::STOP_LOG, &[7], 1)
            .expect("mailbox goes idle within the bound");
        assert_eq!(iop.commands().len(), 1);
    }

    #[gtest]
    fn mailbox_busy_forever_times_out_without_writing() {
        let iop = echo_iop();
        iop.hang();
        let mut channel = channel(&iop, MailboxLayout::default());
        let writes_before = iop.writes();
        expect_that!(
            channel.invoke(Opcode::WRITE_GPIO, &[1], 0),
            err(displays_as(contains_substring("FabricError::Timeout")))
        );
        assert_eq!(iop.writes(), writes_before);
    }

    #[gtest]
    fn hung_firmware_times_out_after_sending() {
        let iop = Arc::new(ScriptedIop::new(IOP_MEMORY, MailboxLayout::default()));
        let mut channel = channel(&iop, MailboxLayout::default());
        iop.hung.store(true, Ordering::SeqCst);
        expect_that!(
            channel.invoke(Opcode::WRITE_GPIO, &[1], 0),
            err(displays_as(contains_substring("after sending")))
        );
        assert_eq!(iop.commands().len(), 1);
    }

    #[gtest]
    fn invoke_is_refused_once_the_bitstream_is_replaced() {
        let gate = Arc::new(FabricGate::default());
        let iop = echo_iop();
        let mut channel = MailboxChannel::new(
            RegisterWindow::from_backing(0x4000_0000, iop.clone())
                .with_token(PlToken::new(gate.generation(), gate.clone())),
            MailboxLayout::default(),
            PollPolicy::spin(Duration::from_millis(5)),
            Arc::new(ManualClock::with_tick(Duration::from_micros(100))),
        )
        .expect("layout should fit");
        channel
            .invoke(Opcode::START_LOG, &[], 0)
            .expect("invoke should succeed");
        {
            let _writer = gate.exclusive();
            gate.advance();
        }
        let writes_before = iop.writes();
        expect_that!(
            channel.invoke(Opcode::STOP_LOG, &[], 0),
            err(displays_as(contains_substring("FabricError::Stale")))
        );
        assert_eq!(iop.writes(), writes_before);
    }

    #[gtest]
    #[rstest]
    #[case::request(MAILBOX_DATA_LEN + 1, 0)]
    #[case::response(0, MAILBOX_DATA_LEN + 1)]
    fn oversize_transfers_are_rejected_before_writing(
        #[case] request_len: usize,
        #[case] response_len: usize,
    ) {
        let iop = echo_iop();
        let mut channel = channel(&iop, MailboxLayout::default());
        expect_that!(
            channel.invoke(Opcode::DEV_WRITE, &vec![0; request_len], response_len),
            err(displays_as(contains_substring("FabricError::Argument")))
        );
        assert_eq!(iop.writes(), 0);
    }

    #[gtest]
    #[rstest]
    #[case::too_small(MailboxLayout::default(), 0x8000)]
    #[case::no_busy_mask(MailboxLayout { busy_mask: 0, ..MailboxLayout::default() }, IOP_MEMORY)]
    #[case::misaligned(MailboxLayout { data_offset: 0xF01, ..MailboxLayout::default() }, IOP_MEMORY)]
    #[case::overlapping(MailboxLayout { command_offset: 0xF10, ..MailboxLayout::default() }, IOP_MEMORY)]
    #[case::misaligned_command(MailboxLayout { command_offset: 0xFFD, ..MailboxLayout::default() }, IOP_MEMORY)]
    #[case::misaligned_status(MailboxLayout { status_offset: 0xFF6, ..MailboxLayout::default() }, IOP_MEMORY)]
    #[case::base_at_the_end_of_memory(MailboxLayout { base: usize::MAX - 2, ..MailboxLayout::default() }, usize::MAX)]
    #[case::huge_data_region(MailboxLayout { data_len: usize::MAX, ..MailboxLayout::default() }, usize::MAX)]
    #[case::command_past_the_address_space(MailboxLayout { command_offset: usize::MAX, ..MailboxLayout::default() }, usize::MAX)]
    fn invalid_layouts_are_rejected(#[case] layout: MailboxLayout, #[case] window_length: usize) {
        expect_that!(
            layout.validate(window_length),
            err(displays_as(contains_substring("FabricError::Argument")))
        );
    }
}
