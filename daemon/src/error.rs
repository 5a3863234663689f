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

use log::error;
use std::path::PathBuf;
use zbus::fdo;

#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    #[error(
        "FabricError::OutOfRange: access of {width} byte(s) at offset {offset:#x} exceeds window length {length:#x}"
    )]
    OutOfRange {
        offset: usize,
        width: usize,
        length: usize,
    },
    #[error("FabricError::Timeout: {0}")]
    Timeout(String),
    #[error("FabricError::ConfigurationTimeout: {0}")]
    ConfigurationTimeout(String),
    #[error("FabricError::NotFound: {0}")]
    NotFound(String),
    #[error("FabricError::InvalidPin: pin {pin} is not below the pin count {pin_count}")]
    InvalidPin { pin: usize, pin_count: usize },
    #[error("FabricError::Argument: {0}")]
    Argument(String),
    #[error("FabricError::MalformedImage: {file:?} is not a usable image: {reason}")]
    MalformedImage { file: PathBuf, reason: String },
    #[error("FabricError::FileNotFound: {0:?} does not exist or is not a file")]
    FileNotFound(PathBuf),
    #[error("FabricError::SessionState: {0}")]
    SessionState(String),
    #[error("FabricError::Stale: {0}")]
    Stale(String),
    #[error("FabricError::InUse: {name} is claimed by {owner}")]
    InUse { name: String, owner: String },
    #[error("FabricError::Mapping: failed to map {length:#x} bytes at {base:#x}: {reason}")]
    Mapping {
        base: u64,
        length: usize,
        reason: String,
    },
    #[error("FabricError::FPGAState: FPGA state is not as expected: {0}")]
    FPGAState(String),
    #[error("FabricError::Flag: Failed to read flags: {0}")]
    Flag(String),
    #[error("FabricError::IORead: An IO error occurred when reading from {file:?}: {e}")]
    IORead { file: PathBuf, e: std::io::Error },
    #[error("FabricError::IOWrite: An IO error occurred when writing {data:?} to {file:?}: {e}")]
    IOWrite {
        data: String,
        file: PathBuf,
        e: std::io::Error,
    },
    #[error("FabricError::IOReadDir: An IO error occurred when reading directory {dir:?}: {e}")]
    IOReadDir { dir: PathBuf, e: std::io::Error },
    #[error("FabricError::TomlDe: Failed to parse {toml_string:?}: {e}")]
    TomlDe {
        toml_string: String,
        e: toml::de::Error,
    },
    #[error("FabricError::Internal: An Internal error occurred: {0}")]
    Internal(String),
}

impl From<FabricError> for fdo::Error {
    fn from(err: FabricError) -> Self {
        error!("{err}");
        match err {
            FabricError::Argument(..) => fdo::Error::InvalidArgs(err.to_string()),
            FabricError::InvalidPin { .. } => fdo::Error::InvalidArgs(err.to_string()),
            FabricError::OutOfRange { .. } => fdo::Error::InvalidArgs(err.to_string()),
            FabricError::NotFound(..) => fdo::Error::UnknownObject(err.to_string()),
            FabricError::InUse { .. } => fdo::Error::AccessDenied(err.to_string()),
            FabricError::FileNotFound(..) => fdo::Error::FileNotFound(err.to_string()),
            FabricError::Timeout(..) => fdo::Error::TimedOut(err.to_string()),
            FabricError::ConfigurationTimeout(..) => fdo::Error::TimedOut(err.to_string()),
            FabricError::IORead { .. } => fdo::Error::IOError(err.to_string()),
            FabricError::IOWrite { .. } => fdo::Error::IOError(err.to_string()),
            FabricError::IOReadDir { .. } => fdo::Error::IOError(err.to_string()),
            _ => fdo::Error::Failed(err.to_string()),
        }
    }
}
