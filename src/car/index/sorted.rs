// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{Index, Record, read_bytes};
use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt as _, WriteBytesExt as _};
use cid::Cid;
use itertools::Itertools as _;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::{Read, Write};

const OFFSET_LEN: u32 = 8;

/// A sorted array of `digest ++ offset` entries, all `width` bytes long.
///
/// ```text
/// ┌───────────────────────┬──────────────┐
/// │digest (width - 8)     │offset (u64le)│ × n
/// └───────────────────────┴──────────────┘
/// ```
///
/// Entries are ordered by digest, then by numeric offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleWidthIndex {
    width: u32,
    index: Vec<u8>,
}

impl SingleWidthIndex {
    pub fn len(&self) -> usize {
        self.index.len() / self.width as usize
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Build from `(digest, offset)` pairs whose digests all have length
    /// `width - 8`.
    fn from_entries(width: u32, mut entries: Vec<(&[u8], u64)>) -> Self {
        entries.sort_unstable();
        let mut index = Vec::with_capacity(entries.len() * width as usize);
        for (digest, offset) in entries {
            index.extend_from_slice(digest);
            index.extend_from_slice(&offset.to_le_bytes());
        }
        Self { width, index }
    }

    fn entries(&self) -> impl Iterator<Item = (&[u8], u64)> {
        self.index
            .chunks_exact(self.width as usize)
            .map(|entry| split_entry(entry, self.width))
    }

    fn entry(&self, i: usize) -> (&[u8], u64) {
        let width = self.width as usize;
        split_entry(&self.index[i * width..(i + 1) * width], self.width)
    }

    /// Offsets of every entry for `digest`, in index order.
    fn get_all(&self, digest: &[u8], mut visit: impl FnMut(u64) -> bool) -> bool {
        // lower bound
        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.entry(mid).0.cmp(digest) {
                Ordering::Less => lo = mid + 1,
                _ => hi = mid,
            }
        }
        let mut found = false;
        for i in lo..self.len() {
            let (candidate, offset) = self.entry(i);
            if candidate != digest {
                break;
            }
            found = true;
            if !visit(offset) {
                break;
            }
        }
        found
    }

    fn marshal(&self, mut writer: impl Write) -> Result<u64> {
        writer.write_u32::<LittleEndian>(self.width)?;
        writer.write_i64::<LittleEndian>(self.index.len() as i64)?;
        writer.write_all(&self.index)?;
        Ok(4 + 8 + self.index.len() as u64)
    }

    fn unmarshal(mut reader: impl Read) -> Result<Self> {
        let width = reader.read_u32::<LittleEndian>()?;
        if width < OFFSET_LEN {
            return Err(Error::InvalidIndex(format!(
                "width {width} is too small for an offset"
            )));
        }
        let len = reader.read_i64::<LittleEndian>()?;
        let len = u64::try_from(len)
            .map_err(|_| Error::InvalidIndex(format!("negative partition length {len}")))?;
        if len % u64::from(width) != 0 {
            return Err(Error::InvalidIndex(format!(
                "partition length {len} is not a multiple of width {width}"
            )));
        }
        let this = Self {
            width,
            index: read_bytes(reader, len)?,
        };
        if !this.entries().tuple_windows().all(|(a, b)| a <= b) {
            return Err(Error::InvalidIndex(format!(
                "entries of width {width} are not sorted"
            )));
        }
        Ok(this)
    }
}

fn split_entry(entry: &[u8], width: u32) -> (&[u8], u64) {
    let (digest, offset) = entry.split_at((width - OFFSET_LEN) as usize);
    let mut le = [0; OFFSET_LEN as usize];
    le.copy_from_slice(offset);
    (digest, u64::from_le_bytes(le))
}

/// `car-index-sorted`: [`SingleWidthIndex`]es keyed by width.
///
/// Only digests are stored, the hash function is not. Two multihashes with
/// equal digests but different codes are indistinguishable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiWidthIndex(BTreeMap<u32, SingleWidthIndex>);

impl MultiWidthIndex {
    pub fn len(&self) -> usize {
        self.0.values().map(SingleWidthIndex::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(SingleWidthIndex::is_empty)
    }

    pub(super) fn load_digests<'a>(
        &mut self,
        entries: impl IntoIterator<Item = (&'a [u8], u64)>,
    ) {
        let mut by_width = BTreeMap::<u32, Vec<_>>::new();
        for (width, partition) in self.0.iter() {
            by_width.entry(*width).or_default().extend(partition.entries());
        }
        for (digest, offset) in entries {
            by_width
                .entry(digest.len() as u32 + OFFSET_LEN)
                .or_default()
                .push((digest, offset));
        }
        let partitions = by_width
            .into_iter()
            .map(|(width, entries)| (width, SingleWidthIndex::from_entries(width, entries)))
            .collect();
        self.0 = partitions;
    }

    /// Visit the offsets for `digest`. Returns whether there were any.
    pub(super) fn get_digest(&self, digest: &[u8], visit: impl FnMut(u64) -> bool) -> bool {
        self.0
            .get(&(digest.len() as u32 + OFFSET_LEN))
            .is_some_and(|partition| partition.get_all(digest, visit))
    }

    pub(super) fn entries(&self) -> impl Iterator<Item = (&[u8], u64)> {
        self.0.values().flat_map(SingleWidthIndex::entries)
    }
}

impl Index for MultiWidthIndex {
    fn load(&mut self, records: Vec<Record>) -> Result<()> {
        let digests = records
            .iter()
            .map(|record| (record.cid.hash().digest(), record.offset))
            .collect::<Vec<_>>();
        self.load_digests(digests);
        Ok(())
    }

    fn get_all(&self, cid: &Cid, visit: impl FnMut(u64) -> bool) -> Result<()> {
        match self.get_digest(cid.hash().digest(), visit) {
            true => Ok(()),
            false => Err(Error::NotFound),
        }
    }

    fn marshal(&self, mut writer: impl Write) -> Result<u64> {
        let partitions = self
            .0
            .values()
            .filter(|partition| !partition.is_empty())
            .collect::<Vec<_>>();
        writer.write_i32::<LittleEndian>(partitions.len() as i32)?;
        let mut written = 4;
        for partition in partitions {
            written += partition.marshal(&mut writer)?;
        }
        Ok(written)
    }

    fn unmarshal(&mut self, mut reader: impl Read) -> Result<()> {
        let count = reader.read_i32::<LittleEndian>()?;
        if count < 0 {
            return Err(Error::InvalidIndex(format!(
                "negative partition count {count}"
            )));
        }
        let mut partitions = BTreeMap::new();
        let mut last_width = None;
        for _ in 0..count {
            let partition = SingleWidthIndex::unmarshal(&mut reader)?;
            if last_width.is_some_and(|last| last >= partition.width) {
                return Err(Error::InvalidIndex(format!(
                    "partition of width {} is out of order",
                    partition.width
                )));
            }
            last_width = Some(partition.width);
            partitions.insert(partition.width, partition);
        }
        self.0 = partitions;
        Ok(())
    }
}
