// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! # Varint frames
//!
//! A CARv1 payload is a concatenation of _varint frames_. Each frame is the
//! _body length_ as an unsigned varint, followed by the _frame body_.
//!
//! ```text
//!        varint frame
//! │◄───────────────────────►│
//! │                         │
//! ├───────────┬─────────────┤
//! │varint:    │             │
//! │body length│frame body   │
//! └───────────┼─────────────┤
//!             │             │
//! frame body ►│◄───────────►│
//!     offset     =body length
//! ```
//!
//! The first frame is the _header frame_, a DAG-CBOR encoded [`CarHeader`].
//! Every following frame is a _section_: a [`Cid`] immediately followed by the
//! block data it addresses.
//!
//! ```text
//!   section ►│
//!    offset  │
//!            │  =body length
//!            │◄────────────►│
//!  ┌─────────┼───┬──────────┤
//!  │length   │cid│block data│
//!  └─────────┴───┼──────────┤
//!                │◄────────►│
//!                │  =block data length
//!    block data  │
//!        offset ►│
//! ```
//!
//! All offsets handled here are relative to the first byte of the CARv1
//! payload, i.e. the first byte of the header frame.

use crate::error::{Error, Result};
use crate::options::Options;
use cid::Cid;
use positioned_io::{ReadAt, WriteAt};
use serde::{Deserialize, Serialize};
use std::io::{BufReader, Read as _};
use std::ops::Range;

/// Longest possible encoding of a `u64` varint.
const MAX_VARINT_LEN: usize = 10;

/// The CARv1 header. A CARv2 pragma is a CARv1 header with `version: 2` and
/// no roots.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CarHeader {
    #[serde(default)]
    pub roots: Vec<Cid>,
    pub version: u64,
}

impl CarHeader {
    pub fn new(roots: Vec<Cid>) -> Self {
        Self { roots, version: 1 }
    }

    /// The header as a complete varint frame.
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        let body = serde_ipld_dagcbor::to_vec(self).map_err(|e| Error::Cbor(e.to_string()))?;
        Ok(frame(&[&body]))
    }
}

/// A section located in a CARv1 payload. The block data is not read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub cid: Cid,
    /// Offset of the varint length prefix.
    pub offset: u64,
    /// Offset of the first byte of block data.
    pub data_offset: u64,
    pub data_len: u64,
}

impl Section {
    /// Offset of the next section.
    pub fn end(&self) -> u64 {
        self.data_offset + self.data_len
    }

    pub fn data_range(&self) -> Range<u64> {
        self.data_offset..self.end()
    }
}

/// Reads frames out of a CARv1 payload of known length.
pub struct SectionReader<R> {
    reader: R,
    len: u64,
    zero_length_section_as_eof: bool,
    max_section_size: u64,
    max_header_size: u64,
}

impl<R: ReadAt> SectionReader<R> {
    pub fn new(reader: R, len: u64, options: &Options) -> Self {
        Self {
            reader,
            len,
            zero_length_section_as_eof: options.zero_length_section_as_eof,
            max_section_size: options.max_allowed_section_size,
            max_header_size: options.max_allowed_header_size,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the header frame, returning it with the offset of the first
    /// section.
    pub fn read_header(&self) -> Result<(CarHeader, u64)> {
        let (body_len, prefix_len) = self
            .read_length(0)?
            .ok_or_else(|| Error::InvalidHeader("empty payload".into()))?;
        if body_len == 0 {
            return Err(Error::InvalidHeader("zero-length header frame".into()));
        }
        if body_len > self.max_header_size {
            return Err(Error::HeaderTooLarge {
                size: body_len,
                max: self.max_header_size,
            });
        }
        let end = prefix_len + body_len;
        if end > self.len {
            return Err(Error::UnexpectedEof("header"));
        }
        let body = self.read_range(prefix_len..end)?;
        let header = serde_ipld_dagcbor::from_slice::<CarHeader>(&body)
            .map_err(|e| Error::InvalidHeader(e.to_string()))?;
        Ok((header, end))
    }

    /// Locate the section starting at `pos`.
    ///
    /// Returns `Ok(None)` at the end of the payload, or on a zero-length
    /// section if those are treated as EOF.
    pub fn read_section(&self, pos: u64) -> Result<Option<Section>> {
        let Some((body_len, prefix_len)) = self.read_length(pos)? else {
            return Ok(None);
        };
        if body_len == 0 {
            return match self.zero_length_section_as_eof {
                true => Ok(None),
                false => Err(Error::NullPadding),
            };
        }
        if body_len > self.max_section_size {
            return Err(Error::SectionTooLarge {
                size: body_len,
                max: self.max_section_size,
            });
        }
        let body_offset = pos + prefix_len;
        if body_offset + body_len > self.len {
            return Err(Error::UnexpectedEof("section"));
        }
        // Only the CID is needed here, buffer the small reads it makes
        let mut cid_reader = BufReader::with_capacity(
            256,
            positioned_io::Cursor::new_pos(&self.reader, body_offset),
        )
        .take(body_len);
        let cid = Cid::read_bytes(&mut cid_reader)
            .map_err(|e| Error::Malformed(format!("invalid cid in section at {pos}: {e}")))?;
        let cid_len = cid.encoded_len() as u64;
        if cid_len > body_len {
            return Err(Error::Malformed(format!(
                "cid of section at {pos} overruns the section"
            )));
        }
        Ok(Some(Section {
            cid,
            offset: pos,
            data_offset: body_offset + cid_len,
            data_len: body_len - cid_len,
        }))
    }

    pub fn read_data(&self, section: &Section) -> Result<Vec<u8>> {
        self.read_range(section.data_range())
    }

    /// Iterate over sections from `pos` until the end of the payload. Stops
    /// after the first error.
    pub fn sections(&self, pos: u64) -> impl Iterator<Item = Result<Section>> + '_ {
        let mut next = Some(pos);
        std::iter::from_fn(move || {
            let pos = next.take()?;
            match self.read_section(pos) {
                Ok(Some(section)) => {
                    next = Some(section.end());
                    Some(Ok(section))
                }
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            }
        })
    }

    /// Decode the varint at `pos`, returning the value and the length of its
    /// encoding.
    fn read_length(&self, pos: u64) -> Result<Option<(u64, u64)>> {
        if pos >= self.len {
            return Ok(None);
        }
        let available = usize::try_from(self.len - pos).unwrap_or(usize::MAX);
        let mut buf = [0; MAX_VARINT_LEN];
        let buf = &mut buf[..available.min(MAX_VARINT_LEN)];
        self.reader.read_exact_at(pos, buf)?;
        match unsigned_varint::decode::u64(buf) {
            Ok((value, rest)) => Ok(Some((value, (buf.len() - rest.len()) as u64))),
            Err(unsigned_varint::decode::Error::Insufficient) => Err(Error::UnexpectedEof("varint")),
            Err(e) => Err(Error::Malformed(format!("invalid varint at {pos}: {e}"))),
        }
    }

    fn read_range(&self, range: Range<u64>) -> Result<Vec<u8>> {
        let len = usize::try_from(range.end - range.start)
            .map_err(|_| Error::Malformed("range does not fit in memory".into()))?;
        let mut buf = vec![0; len];
        self.reader.read_exact_at(range.start, &mut buf)?;
        Ok(buf)
    }
}

/// Concatenate `parts` behind a varint of their total length.
fn frame(parts: &[&[u8]]) -> Vec<u8> {
    let body_len = parts.iter().map(|it| it.len()).sum::<usize>();
    let mut varint = unsigned_varint::encode::u64_buffer();
    let prefix = unsigned_varint::encode::u64(body_len as u64, &mut varint);
    let mut buf = Vec::with_capacity(prefix.len() + body_len);
    buf.extend_from_slice(prefix);
    for part in parts {
        buf.extend_from_slice(part);
    }
    buf
}

/// Encode a section: `varint(len(cid) + len(data)) ++ cid ++ data`.
pub fn encode_section(cid: &Cid, data: &[u8]) -> Vec<u8> {
    frame(&[&cid.to_bytes(), data])
}

/// Write a section at `pos` in a single positioned write, returning the number
/// of bytes written.
pub fn write_section(writer: &mut impl WriteAt, pos: u64, cid: &Cid, data: &[u8]) -> Result<u64> {
    let section = encode_section(cid, data);
    writer.write_all_at(pos, &section)?;
    Ok(section.len() as u64)
}
