// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! CARv2 envelope.
//!
//! ```text
//! [pragma][v2 header][opt padding][CARv1][opt padding][opt index]
//! ```
//!
//! See <https://ipld.io/specs/transport/car/carv2/#header>

use super::frame::SectionReader;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::utils::io::size_of;
use byteorder::{LittleEndian, ReadBytesExt as _, WriteBytesExt as _};
use positioned_io::{ReadAt, Size};
use std::io::{self, Read, Write};

pub const PRAGMA_SIZE: u64 = 11;
pub const HEADER_SIZE: u64 = 40;

/// The pragma of a CARv2, containing the version number.
/// This is a valid CARv1 header, with version number of 2 and no root CIDs.
pub const PRAGMA: [u8; PRAGMA_SIZE as usize] = [
    0x0a, // unit(10)
    0xa1, // map(1)
    0x67, // string(7)
    0x76, 0x65, 0x72, 0x73, 0x69, 0x6f, 0x6e, // "version"
    0x02, // uint(2)
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V1,
    V2,
}

/// Read the CAR version from the first frame of `reader`.
///
/// Reads are positioned, so no cursor is consumed.
pub fn read_version(reader: &impl ReadAt, len: u64, options: &Options) -> Result<Version> {
    let (header, _) = SectionReader::new(reader, len, options).read_header()?;
    match header.version {
        1 => Ok(Version::V1),
        2 => Ok(Version::V2),
        other => Err(Error::UnsupportedVersion(other)),
    }
}

/// A 128-bit bitfield describing features of the enclosed data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Characteristics([u8; 16]);

impl Characteristics {
    const FULLY_INDEXED: u8 = 0b1000_0000;

    /// Whether the index includes identity CIDs.
    pub fn is_fully_indexed(&self) -> bool {
        self.0[0] & Self::FULLY_INDEXED != 0
    }

    pub fn set_fully_indexed(&mut self, fully_indexed: bool) {
        match fully_indexed {
            true => self.0[0] |= Self::FULLY_INDEXED,
            false => self.0[0] &= !Self::FULLY_INDEXED,
        }
    }
}

/// The fixed-size header following the pragma. Offsets are absolute within
/// the CARv2 file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct V2Header {
    pub characteristics: Characteristics,
    pub data_offset: u64,
    /// Zero until the CAR is finalized.
    pub data_size: u64,
    /// Zero if there is no index.
    pub index_offset: u64,
}

impl V2Header {
    /// A header for a CAR that is still being written.
    pub fn unfinalized(data_padding: u64) -> Self {
        Self {
            data_offset: PRAGMA_SIZE + HEADER_SIZE + data_padding,
            ..Default::default()
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.data_size != 0
    }

    pub fn has_index(&self) -> bool {
        self.index_offset != 0
    }

    /// The absolute offset one past the data payload.
    pub fn data_end(&self) -> Result<u64> {
        self.data_offset
            .checked_add(self.data_size)
            .ok_or_else(|| {
                Error::InvalidHeader(format!(
                    "data offset {} and size {} overflow",
                    self.data_offset, self.data_size
                ))
            })
    }

    pub fn read_from(mut reader: impl Read) -> io::Result<Self> {
        let mut characteristics = [0; 16];
        reader.read_exact(&mut characteristics)?;
        Ok(Self {
            characteristics: Characteristics(characteristics),
            data_offset: reader.read_u64::<LittleEndian>()?,
            data_size: reader.read_u64::<LittleEndian>()?,
            index_offset: reader.read_u64::<LittleEndian>()?,
        })
    }

    pub fn write_to(&self, mut writer: impl Write) -> io::Result<()> {
        let Self {
            characteristics,
            data_offset,
            data_size,
            index_offset,
        } = *self;
        writer.write_all(&characteristics.0)?;
        writer.write_u64::<LittleEndian>(data_offset)?;
        writer.write_u64::<LittleEndian>(data_size)?;
        writer.write_u64::<LittleEndian>(index_offset)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0; HEADER_SIZE as usize];
        self.write_to(&mut buf[..])
            .expect("header fits in HEADER_SIZE bytes");
        buf
    }

    /// Read the header that follows the pragma of a CARv2.
    pub fn read_at(reader: &impl ReadAt) -> Result<Self> {
        let mut buf = [0; HEADER_SIZE as usize];
        reader
            .read_exact_at(PRAGMA_SIZE, &mut buf)
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => Error::UnexpectedEof("CARv2 header"),
                _ => Error::Io(e),
            })?;
        let header = Self::read_from(&buf[..])?;
        if header.data_offset < PRAGMA_SIZE + HEADER_SIZE {
            return Err(Error::InvalidHeader(format!(
                "data offset {} overlaps the CARv2 header",
                header.data_offset
            )));
        }
        let data_end = header.data_end()?;
        if header.has_index() && header.index_offset < data_end {
            return Err(Error::InvalidHeader(format!(
                "index offset {} overlaps the data payload",
                header.index_offset
            )));
        }
        Ok(header)
    }
}

/// Where the CARv1 payload and the index live within a CAR file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub version: Version,
    pub data_offset: u64,
    pub data_size: u64,
    /// Only present for CARv2 files carrying an index.
    pub index_offset: Option<u64>,
    pub characteristics: Characteristics,
}

impl Layout {
    /// Detect the version of `reader` and locate its payload.
    ///
    /// A CARv2 that was never finalized reports a data size of zero; its
    /// payload is taken to extend to the end of the file.
    pub fn detect(reader: &(impl ReadAt + Size), options: &Options) -> Result<Self> {
        let len = size_of(reader)?;
        match read_version(reader, len, options)? {
            Version::V1 => Ok(Self {
                version: Version::V1,
                data_offset: 0,
                data_size: len,
                index_offset: None,
                characteristics: Characteristics::default(),
            }),
            Version::V2 => {
                let header = V2Header::read_at(reader)?;
                let available = len.saturating_sub(header.data_offset);
                let data_size = match header.is_finalized() {
                    true if header.data_size > available => {
                        return Err(Error::UnexpectedEof("CARv2 data payload"));
                    }
                    true => header.data_size,
                    false => available,
                };
                Ok(Self {
                    version: Version::V2,
                    data_offset: header.data_offset,
                    data_size,
                    index_offset: header.has_index().then_some(header.index_offset),
                    characteristics: header.characteristics,
                })
            }
        }
    }
}
