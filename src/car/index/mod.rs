// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Indexes mapping [`Cid`]s to the offsets of the sections that hold them.
//!
//! # Variants
//!
//! - [`InsertionIndex`]: built incrementally while a CAR is written. Backed by
//!   a [`BTreeMap`](std::collections::BTreeMap) keyed by multihash bytes, so
//!   it can be queried during the write session.
//! - [`SingleWidthIndex`]: a sorted, contiguous array of
//!   `digest ++ offset` entries which all have the same width, searched with
//!   binary search.
//! - [`MultiWidthIndex`] (`car-index-sorted`): one [`SingleWidthIndex`] per
//!   digest width.
//! - [`MultihashSortedIndex`] (`car-multihash-index-sorted`): one
//!   [`MultiWidthIndex`] per multihash code.
//!
//! Lookups compare multihashes, not whole CIDs: the same block stored under
//! a different CID version or codec matches. Callers MUST check the section
//! at each returned offset.
//!
//! # Serialized form
//!
//! ```text
//! varint(codec) ++ variant bytes
//! ```
//!
//! All integers are little-endian. Partitions are written in ascending order
//! of multihash code, then of width, so equal indexes serialize to identical
//! bytes.

mod insertion;
mod multihash_sorted;
mod sorted;

pub use insertion::InsertionIndex;
pub use multihash_sorted::MultihashSortedIndex;
pub use sorted::{MultiWidthIndex, SingleWidthIndex};

use crate::error::{Error, Result};
use cid::{Cid, multihash::Multihash};
use serde::Deserialize;
use smallvec::SmallVec;
use std::io::{Read, Write};

/// The section holding `cid` begins at `offset` in the CARv1 payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Record {
    pub cid: Cid,
    pub offset: u64,
}

impl Record {
    pub fn new(cid: Cid, offset: u64) -> Self {
        Self { cid, offset }
    }
}

/// Common interface of all index variants.
pub trait Index {
    /// Bulk insert `records`.
    fn load(&mut self, records: Vec<Record>) -> Result<()>;

    /// Call `visit` with every offset recorded for the multihash of `cid`, in
    /// the natural order of the index, until it returns `false`.
    ///
    /// Returns [`Error::NotFound`] if nothing matched.
    fn get_all(&self, cid: &Cid, visit: impl FnMut(u64) -> bool) -> Result<()>;

    /// Collect every offset recorded for `cid`. Empty if there is none.
    fn offsets(&self, cid: &Cid) -> Result<SmallVec<[u64; 1]>> {
        let mut offsets = SmallVec::new();
        match self.get_all(cid, |offset| {
            offsets.push(offset);
            true
        }) {
            Ok(()) | Err(Error::NotFound) => Ok(offsets),
            Err(e) => Err(e),
        }
    }

    /// Returns the number of bytes written.
    fn marshal(&self, writer: impl Write) -> Result<u64>;

    /// Replace the contents of this index with the serialized form in `reader`.
    fn unmarshal(&mut self, reader: impl Read) -> Result<()>;
}

/// Indexes that can enumerate their contents.
pub trait IterableIndex: Index {
    fn for_each(&self, f: impl FnMut(&Multihash<64>, u64) -> Result<()>) -> Result<()>;
}

/// Multicodec identifying a serialized index variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexCodec {
    /// `car-index-sorted`
    Sorted,
    /// `car-multihash-index-sorted`
    MultihashSorted,
    /// Private-use code for a serialized [`InsertionIndex`].
    Insertion,
}

impl IndexCodec {
    pub const fn code(self) -> u64 {
        match self {
            IndexCodec::Sorted => 0x0400,
            IndexCodec::MultihashSorted => 0x0401,
            IndexCodec::Insertion => 0x30_0003,
        }
    }
}

impl TryFrom<u64> for IndexCodec {
    type Error = Error;

    fn try_from(code: u64) -> Result<Self> {
        [
            IndexCodec::Sorted,
            IndexCodec::MultihashSorted,
            IndexCodec::Insertion,
        ]
        .into_iter()
        .find(|codec| codec.code() == code)
        .ok_or(Error::UnknownIndexCodec(code))
    }
}

/// Any of the serializable index variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyIndex {
    Sorted(MultiWidthIndex),
    MultihashSorted(MultihashSortedIndex),
    Insertion(InsertionIndex),
}

impl AnyIndex {
    /// An empty index of the given variant.
    pub fn new(codec: IndexCodec) -> Self {
        match codec {
            IndexCodec::Sorted => AnyIndex::Sorted(MultiWidthIndex::default()),
            IndexCodec::MultihashSorted => {
                AnyIndex::MultihashSorted(MultihashSortedIndex::default())
            }
            IndexCodec::Insertion => AnyIndex::Insertion(InsertionIndex::default()),
        }
    }

    pub fn codec(&self) -> IndexCodec {
        match self {
            AnyIndex::Sorted(_) => IndexCodec::Sorted,
            AnyIndex::MultihashSorted(_) => IndexCodec::MultihashSorted,
            AnyIndex::Insertion(_) => IndexCodec::Insertion,
        }
    }
}

impl Index for AnyIndex {
    fn load(&mut self, records: Vec<Record>) -> Result<()> {
        match self {
            AnyIndex::Sorted(it) => it.load(records),
            AnyIndex::MultihashSorted(it) => it.load(records),
            AnyIndex::Insertion(it) => it.load(records),
        }
    }

    fn get_all(&self, cid: &Cid, visit: impl FnMut(u64) -> bool) -> Result<()> {
        match self {
            AnyIndex::Sorted(it) => it.get_all(cid, visit),
            AnyIndex::MultihashSorted(it) => it.get_all(cid, visit),
            AnyIndex::Insertion(it) => it.get_all(cid, visit),
        }
    }

    fn marshal(&self, writer: impl Write) -> Result<u64> {
        match self {
            AnyIndex::Sorted(it) => it.marshal(writer),
            AnyIndex::MultihashSorted(it) => it.marshal(writer),
            AnyIndex::Insertion(it) => it.marshal(writer),
        }
    }

    fn unmarshal(&mut self, reader: impl Read) -> Result<()> {
        match self {
            AnyIndex::Sorted(it) => it.unmarshal(reader),
            AnyIndex::MultihashSorted(it) => it.unmarshal(reader),
            AnyIndex::Insertion(it) => it.unmarshal(reader),
        }
    }
}

/// Write `varint(codec) ++ index`, returning the number of bytes written.
pub fn write_index(index: &AnyIndex, mut writer: impl Write) -> Result<u64> {
    let mut buf = unsigned_varint::encode::u64_buffer();
    let codec = unsigned_varint::encode::u64(index.codec().code(), &mut buf);
    writer.write_all(codec)?;
    Ok(codec.len() as u64 + index.marshal(writer)?)
}

/// Read an index written by [`write_index`].
pub fn read_index(mut reader: impl Read) -> Result<AnyIndex> {
    let codec = IndexCodec::try_from(unsigned_varint::io::read_u64(&mut reader)?)?;
    let mut index = AnyIndex::new(codec);
    index.unmarshal(reader)?;
    Ok(index)
}

/// Read exactly `len` bytes, without trusting `len` for the allocation size.
fn read_bytes(reader: impl Read, len: u64) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.take(len).read_to_end(&mut buf)?;
    match buf.len() as u64 == len {
        true => Ok(buf),
        false => Err(Error::UnexpectedEof("index")),
    }
}
