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

//! Configuration image validation.
//!
//! Two containers are recognised:
//!
//! - Xilinx `.bit` files, which start with a fixed 13-byte preamble followed by tagged
//!   header fields: `a` design name, `b` part, `c` date, `d` time (each a big-endian `u16`
//!   length and a NUL-terminated string) and `e` (a big-endian `u32` payload length
//!   followed by the payload).
//! - Raw `.bin` images, recognised by the configuration sync word `AA 99 55 66` in either
//!   byte order somewhere in the first 256 bytes.
//!
//! The payload itself is never interpreted.

use crate::error::FabricError;
use crate::pl::BitstreamId;
use crate::system_io::fs_read_bytes;
use log::{debug, trace};
use std::path::{Path, PathBuf};

const BIT_PREAMBLE: [u8; 13] = [
    0x00, 0x09, 0x0F, 0xF0, 0x0F, 0xF0, 0x0F, 0xF0, 0x0F, 0xF0, 0x00, 0x00, 0x01,
];
const SYNC_WORD: [u8; 4] = [0xAA, 0x99, 0x55, 0x66];
const SYNC_WORD_SWAPPED: [u8; 4] = [0x66, 0x55, 0x99, 0xAA];
const SYNC_SEARCH_WINDOW: usize = 256;

/// Header fields of a `.bit` container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitHeader {
    pub design: String,
    pub part: String,
    pub date: String,
    pub time: String,
    pub payload_length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BitstreamFormat {
    Bit(BitHeader),
    Bin,
}

/// A configuration image that passed validation.
#[derive(Debug, Clone)]
pub struct Bitstream {
    id: BitstreamId,
    path: PathBuf,
    format: BitstreamFormat,
    size: usize,
}

impl Bitstream {
    /// Validate the image at `path`. Nothing is written anywhere.
    ///
    /// # Returns: `Result<Bitstream, FabricError>`
    /// * `Ok(Bitstream)` - The image is a recognised container
    /// * `Err(FabricError::FileNotFound)` - `path` does not exist or is not a file
    /// * `Err(FabricError::MalformedImage)` - The image is empty or not recognised
    /// * `Err(FabricError::IORead)` - The image could not be read
    pub fn open(path: &Path) -> Result<Bitstream, FabricError> {
        if !path.is_file() {
            return Err(FabricError::FileNotFound(path.to_owned()));
        }
        let bytes = fs_read_bytes(path)?;
        let format = parse_container(&bytes).map_err(|reason| FabricError::MalformedImage {
            file: path.to_owned(),
            reason,
        })?;
        let canonical = path.canonicalize().map_err(|e| FabricError::IORead {
            file: path.to_owned(),
            e,
        })?;
        debug!("{canonical:?} is a {} byte {format:?} image", bytes.len());
        Ok(Bitstream {
            id: BitstreamId::new(canonical.clone()),
            path: canonical,
            format,
            size: bytes.len(),
        })
    }

    pub fn id(&self) -> &BitstreamId {
        &self.id
    }

    /// Canonical path of the image.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> &BitstreamFormat {
        &self.format
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

fn parse_container(bytes: &[u8]) -> Result<BitstreamFormat, String> {
    if bytes.is_empty() {
        return Err("image is empty".into());
    }
    if bytes.starts_with(&BIT_PREAMBLE) {
        return parse_bit_header(&bytes[BIT_PREAMBLE.len()..]).map(BitstreamFormat::Bit);
    }
    let window = &bytes[..bytes.len().min(SYNC_SEARCH_WINDOW)];
    if window
        .windows(SYNC_WORD.len())
        .any(|w| w == SYNC_WORD || w == SYNC_WORD_SWAPPED)
    {
        trace!("Found sync word, treating image as raw bin");
        return Ok(BitstreamFormat::Bin);
    }
    Err(format!(
        "neither a .bit header nor a sync word in the first {SYNC_SEARCH_WINDOW} bytes"
    ))
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| format!("header truncated at byte {}", self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, String> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self) -> Result<String, String> {
        let len = self.u16()? as usize;
        let raw = self.take(len)?;
        let raw = raw.strip_suffix(&[0]).unwrap_or(raw);
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

fn parse_bit_header(bytes: &[u8]) -> Result<BitHeader, String> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let mut header = BitHeader {
        design: String::new(),
        part: String::new(),
        date: String::new(),
        time: String::new(),
        payload_length: 0,
    };
    loop {
        match cursor.u8()? {
            b'a' => header.design = cursor.string()?,
            b'b' => header.part = cursor.string()?,
            b'c' => header.date = cursor.string()?,
            b'd' => header.time = cursor.string()?,
            b'e' => {
                header.payload_length = cursor.u32()?;
                if cursor.remaining() < header.payload_length as usize {
                    return Err(format!(
                        "payload declares {} bytes but only {} follow",
                        header.payload_length,
                        cursor.remaining()
                    ));
                }
                if header.payload_length == 0 {
                    return Err("payload is empty".into());
                }
                return Ok(header);
            }
            other => return Err(format!("unexpected header field {other:#04x}")),
        }
    }
}
