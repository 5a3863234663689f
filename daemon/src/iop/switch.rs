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

//! Crossbar routing of an IOP's adapter pins.
//!
//! The IOP's switch maps each logical pin of the adapter connector to one internal
//! function. The whole map is written at once with [`Opcode::CONFIGURE_SWITCH`]; there is no
//! per-pin update, so reconfiguring mid-session remaps every pin.

use crate::error::FabricError;
use crate::iop::Opcode;
use crate::iop::adapter::IssueCommand;
use log::debug;

pub const MAX_PINS: usize = 8;

/// Function routed to a pin. The discriminant is the 4-bit code sent to the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingCode {
    /// GPIO channel 0..=7.
    Gpio(u8),
    IicScl,
    IicSda,
    SpiClk,
    SpiMiso,
    SpiMosi,
    SpiSs,
}

impl RoutingCode {
    pub fn code(self) -> Result<u8, FabricError> {
        Ok(match self {
            RoutingCode::Gpio(channel @ 0..=7) => channel,
            RoutingCode::Gpio(channel) => {
                return Err(FabricError::Argument(format!(
                    "GPIO channel {channel} is not in 0..=7"
                )));
            }
            RoutingCode::IicScl => 0x8,
            RoutingCode::IicSda => 0x9,
            RoutingCode::SpiClk => 0xA,
            RoutingCode::SpiMiso => 0xB,
            RoutingCode::SpiMosi => 0xC,
            RoutingCode::SpiSs => 0xD,
        })
    }
}

/// One routing code per logical pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinMap {
    codes: Vec<RoutingCode>,
}

impl PinMap {
    /// Pin `n` routed to GPIO channel `n`.
    pub fn new(pin_count: usize) -> Result<PinMap, FabricError> {
        if pin_count == 0 || pin_count > MAX_PINS {
            return Err(FabricError::Argument(format!(
                "a switch has 1 to {MAX_PINS} pins, not {pin_count}"
            )));
        }
        Ok(PinMap {
            codes: (0..pin_count as u8).map(RoutingCode::Gpio).collect(),
        })
    }

    pub fn all_gpio() -> PinMap {
        PinMap {
            codes: (0..MAX_PINS as u8).map(RoutingCode::Gpio).collect(),
        }
    }

    /// IIC clock and data on pins 2 and 3, everything else GPIO.
    pub fn iic_top_row() -> PinMap {
        let mut map = PinMap::all_gpio();
        map.codes[2] = RoutingCode::IicScl;
        map.codes[3] = RoutingCode::IicSda;
        map
    }

    /// IIC clock and data on pins 6 and 7, everything else GPIO.
    pub fn iic_bottom_row() -> PinMap {
        let mut map = PinMap::all_gpio();
        map.codes[6] = RoutingCode::IicScl;
        map.codes[7] = RoutingCode::IicSda;
        map
    }

    pub fn pin_count(&self) -> usize {
        self.codes.len()
    }

    pub fn get(&self, pin: usize) -> Option<RoutingCode> {
        self.codes.get(pin).copied()
    }

    /// # Returns: `Result<(), FabricError>`
    /// * `Err(FabricError::InvalidPin)` - `pin` is not below the pin count
    /// * `Err(FabricError::Argument)` - `code` is not a valid routing code
    pub fn route(&mut self, pin: usize, code: RoutingCode) -> Result<(), FabricError> {
        let pin_count = self.pin_count();
        let slot = self
            .codes
            .get_mut(pin)
            .ok_or(FabricError::InvalidPin { pin, pin_count })?;
        code.code()?;
        *slot = code;
        Ok(())
    }

    /// The switch word: 4 bits per pin, pin 0 in the low nibble.
    pub fn encode(&self) -> Result<u32, FabricError> {
        self.codes
            .iter()
            .enumerate()
            .try_fold(0u32, |word, (pin, code)| -> Result<u32, FabricError> {
                Ok(word | u32::from(code.code()?) << (4 * pin))
            })
    }
}

/// Program the whole switch.
pub fn configure_switch<I: IssueCommand + ?Sized>(
    issuer: &mut I,
    pin_map: &PinMap,
) -> Result<(), FabricError> {
    let word = pin_map.encode()?;
    debug!("Configuring switch with {word:#010x}");
    issuer.issue(Opcode::CONFIGURE_SWITCH, &word.to_le_bytes(), 0)?;
    Ok(())
}

/// Route the given pins and leave every other pin on its GPIO channel.
///
/// Every pin is checked before the switch is touched.
pub fn configure_pins<I: IssueCommand + ?Sized>(
    issuer: &mut I,
    pin_count: usize,
    routes: &[(usize, RoutingCode)],
) -> Result<PinMap, FabricError> {
    let mut pin_map = PinMap::new(pin_count)?;
    for &(pin, code) in routes {
        pin_map.route(pin, code)?;
    }
    configure_switch(issuer, &pin_map)?;
    Ok(pin_map)
}
