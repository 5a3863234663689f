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

//! Raw register access to the adapter side of an IOP.
//!
//! Developer-mode firmware turns the IOP into a bus bridge: the host names an address in the
//! IOP's own address space and the firmware performs the access. Requests share one layout:
//!
//! ```text
//! [address: u32 LE][command word: u32 LE][data...]
//! ```
//!
//! The command word packs the access:
//!
//! ```text
//! bit 0      valid, always set
//! bits 1-2   access width in bytes, minus one
//! bit 3      1 for a read, 0 for a write
//! bits 8-15  number of consecutive accesses
//! ```
//!
//! Writes carry `count` values of the access width each; reads carry none and are answered
//! with them.

use crate::error::FabricError;
use crate::iop::Opcode;
use crate::iop::adapter::IssueCommand;
use crate::iop::session::SessionState;
use crate::iop::switch::{PinMap, configure_switch};
use crate::mmio::Width;
use log::trace;

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Write = 0,
    Read = 1,
}

/// Pack one developer-mode access into its command word.
///
/// # Returns: `Result<u32, FabricError>`
/// * `Ok(u32)` - The command word
/// * `Err(FabricError::Argument)` - `count` is not between 1 and 255
pub fn command_word(access: Access, width: Width, count: usize) -> Result<u32, FabricError> {
    let count = u8::try_from(count)
        .ok()
        .filter(|c| *c > 0)
        .ok_or_else(|| {
            FabricError::Argument(format!("{count} accesses requested, expected 1 to 255"))
        })?;
    Ok(0x1
        | (width.bytes() as u32 - 1) << 1
        | (access as u32) << 3
        | u32::from(count) << 8)
}

fn encode_request(
    address: u32,
    access: Access,
    width: Width,
    count: usize,
    values: &[u32],
) -> Result<Vec<u8>, FabricError> {
    let command = command_word(access, width, count)?;
    let mut payload = Vec::with_capacity(HEADER_LEN + values.len() * width.bytes());
    payload.extend_from_slice(&address.to_le_bytes());
    payload.extend_from_slice(&command.to_le_bytes());
    for &value in values {
        if value > width.max_value() {
            return Err(FabricError::Argument(format!(
                "{value:#x} does not fit in a {width} access"
            )));
        }
        payload.extend_from_slice(&value.to_le_bytes()[..width.bytes()]);
    }
    Ok(payload)
}

fn decode_values(bytes: &[u8], width: Width) -> Vec<u32> {
    bytes
        .chunks_exact(width.bytes())
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect()
}

/// Generic adapter over developer-mode firmware.
#[derive(Debug)]
pub struct DevMode<I: IssueCommand> {
    issuer: I,
    pin_map: PinMap,
}

impl<I: IssueCommand> DevMode<I> {
    /// Nothing is sent until [`start`](DevMode::start).
    pub fn new(issuer: I, pin_map: PinMap) -> DevMode<I> {
        DevMode { issuer, pin_map }
    }

    /// Program the switch with this adapter's pin map.
    pub fn start(&mut self) -> Result<(), FabricError> {
        configure_switch(&mut self.issuer, &self.pin_map)
    }

    pub fn pin_map(&self) -> &PinMap {
        &self.pin_map
    }

    pub fn into_inner(self) -> I {
        self.issuer
    }

    /// Lifecycle state of the IOP behind the adapter.
    pub fn status(&mut self) -> SessionState {
        self.issuer.session_state()
    }

    /// `true` when the IOP has finished the last access it was sent.
    pub fn is_mailbox_idle(&mut self) -> Result<bool, FabricError> {
        self.issuer.mailbox_idle()
    }

    /// Write `values` to consecutive registers starting at `address`.
    pub fn write(&mut self, address: u32, width: Width, values: &[u32]) -> Result<(), FabricError> {
        let payload = encode_request(address, Access::Write, width, values.len(), values)?;
        trace!("DEV_WRITE {} value(s) at {address:#x}", values.len());
        self.issuer.issue(Opcode::DEV_WRITE, &payload, 0)?;
        Ok(())
    }

    /// Read `count` consecutive registers starting at `address`.
    pub fn read(&mut self, address: u32, width: Width, count: usize) -> Result<Vec<u32>, FabricError> {
        let payload = encode_request(address, Access::Read, width, count, &[])?;
        trace!("DEV_READ {count} value(s) at {address:#x}");
        let response = self
            .issuer
            .issue(Opcode::DEV_READ, &payload, count * width.bytes())?;
        Ok(decode_values(&response, width))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iop::SharedSession;
    use crate::iop::mailbox::MailboxLayout;
    use crate::iop::mailbox::tests::{IOP_MEMORY, ScriptedIop};
    use crate::iop::session::tests::running_rig;
    use googletest::prelude::*;
    use rstest::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[gtest]
    #[rstest]
    #[case::word(0x4000_0010, Width::Word, &[0xDEAD_BEEF], vec![0x10, 0, 0, 0x40, 0x7, 1, 0, 0, 0xEF, 0xBE, 0xAD, 0xDE])]
    #[case::bytes(0x20, Width::Byte, &[1, 2, 3], vec![0x20, 0, 0, 0, 0x1, 3, 0, 0, 1, 2, 3])]
    #[case::halves(0x8, Width::Half, &[0xABCD, 0x1], vec![8, 0, 0, 0, 0x3, 2, 0, 0, 0xCD, 0xAB, 1, 0])]
    fn write_requests_carry_header_and_data(
        #[case] address: u32,
        #[case] width: Width,
        #[case] values: &[u32],
        #[case] expected: Vec<u8>,
    ) {
        expect_that!(
            encode_request(address, Access::Write, width, values.len(), values),
            ok(eq(&expected))
        );
    }

    #[gtest]
    fn read_requests_have_no_data() {
        expect_that!(
            encode_request(0x100, Access::Read, Width::Half, 16, &[]),
            ok(eq(&vec![0, 1, 0, 0, 0xB, 16, 0, 0]))
        );
    }

    #[gtest]
    #[rstest]
    #[case::single_word_write(Access::Write, Width::Word, 1, 0x107)]
    #[case::byte_reads(Access::Read, Width::Byte, 4, 0x409)]
    #[case::longest_half_read(Access::Read, Width::Half, 255, 0xFF0B)]
    fn command_words_pack_the_access(
        #[case] access: Access,
        #[case] width: Width,
        #[case] count: usize,
        #[case] word: u32,
    ) {
        expect_that!(command_word(access, width, count), ok(eq(&word)));
    }

    #[gtest]
    #[rstest]
    #[case::too_wide(Width::Byte, 0, &[0x100])]
    #[case::no_accesses(Width::Word, 0, &[])]
    #[case::too_many(Width::Byte, 256, &[])]
    fn invalid_requests_are_rejected(
        #[case] width: Width,
        #[case] count: usize,
        #[case] values: &[u32],
    ) {
        let count = if values.is_empty() { count } else { values.len() };
        expect_that!(
            encode_request(0, Access::Write, width, count, values),
            err(displays_as(contains_substring("FabricError::Argument")))
        );
    }

    /// Developer-mode firmware over a sparse register file.
    fn devmode_iop() -> Arc<ScriptedIop> {
        let registers: Arc<Mutex<HashMap<u32, u32>>> = Arc::default();
        Arc::new(ScriptedIop::with_responder(
            IOP_MEMORY,
            MailboxLayout::default(),
            Box::new(move |command, data| {
                let mut registers = registers.lock().expect("registers lock");
                let address = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                let width = usize::from((data[4] >> 1) & 0x3) + 1;
                let count = usize::from(data[5]);
                for i in 0..count {
                    let register = address + (i * width) as u32;
                    if command == Opcode::DEV_WRITE.value() {
                        let start = HEADER_LEN + i * width;
                        let mut word = [0u8; 4];
                        word[..width].copy_from_slice(&data[start..start + width]);
                        registers.insert(register, u32::from_le_bytes(word));
                    } else {
                        let value = registers.get(&register).copied().unwrap_or(0);
                        data[i * width..(i + 1) * width]
                            .copy_from_slice(&value.to_le_bytes()[..width]);
                    }
                }
            }),
        ))
    }

    #[gtest]
    fn writes_are_read_back_through_the_firmware() {
        let rig = running_rig(devmode_iop());
        let mut devmode = DevMode::new(SharedSession::new(rig.session), PinMap::iic_top_row());
        assert_eq!(devmode.status(), SessionState::Running);
        expect_that!(devmode.is_mailbox_idle(), ok(eq(&true)));
        devmode.start().expect("switch should configure");
        devmode
            .write(0x40, Width::Half, &[0x1234, 0x5678])
            .expect("write should succeed");
        expect_that!(
            devmode.read(0x40, Width::Half, 3),
            ok(elements_are![eq(&0x1234), eq(&0x5678), eq(&0)])
        );
        let opcodes: Vec<u32> = rig.iop.commands().iter().map(|(op, _)| *op).collect();
        expect_that!(
            opcodes,
            elements_are![
                eq(&Opcode::CONFIGURE_SWITCH.value()),
                eq(&Opcode::DEV_WRITE.value()),
                eq(&Opcode::DEV_READ.value())
            ]
        );
    }

    #[gtest]
    fn busy_firmware_is_reported_until_it_answers() {
        let rig = running_rig(devmode_iop());
        let iop = rig.iop.clone();
        let mut devmode = DevMode::new(rig.session, PinMap::all_gpio());
        iop.hang();
        expect_that!(devmode.is_mailbox_idle(), ok(eq(&false)));
        expect_that!(
            devmode.read(0x40, Width::Word, 1),
            err(displays_as(contains_substring("FabricError::Timeout")))
        );
        assert_eq!(devmode.status(), SessionState::Faulted);
    }
}
