// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{AnyIndex, Index, IndexCodec, IterableIndex, Record, read_bytes};
use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt as _, WriteBytesExt as _};
use cid::{Cid, multihash::Multihash};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::ops::Bound;

/// Ordered by multihash bytes, then by offset, so that all records for one
/// multihash are adjacent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RecordKey {
    digest: Vec<u8>,
    offset: u64,
}

/// An index that accepts records one at a time, used while writing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertionIndex {
    records: BTreeMap<RecordKey, Cid>,
}

impl InsertionIndex {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record `cid` at `offset`, keeping any existing record under the same key.
    pub fn insert_no_replace(&mut self, cid: Cid, offset: u64) {
        self.records
            .entry(RecordKey {
                digest: cid.hash().to_bytes(),
                offset,
            })
            .or_insert(cid);
    }

    /// Whether a record was inserted with exactly this CID.
    pub fn has_exact_cid(&self, cid: &Cid) -> bool {
        self.same_multihash(cid).any(|(_, stored)| stored == cid)
    }

    /// Whether a record shares the multihash of `cid`.
    pub fn has_multihash(&self, cid: &Cid) -> bool {
        self.same_multihash(cid).next().is_some()
    }

    /// Convert into the given variant for serialization.
    pub fn flatten(self, codec: IndexCodec) -> Result<AnyIndex> {
        match codec {
            IndexCodec::Insertion => Ok(AnyIndex::Insertion(self)),
            codec => {
                let mut index = AnyIndex::new(codec);
                index.load(self.into_records().collect())?;
                Ok(index)
            }
        }
    }

    fn into_records(self) -> impl Iterator<Item = Record> {
        self.records
            .into_iter()
            .map(|(RecordKey { offset, .. }, cid)| Record { cid, offset })
    }

    fn same_multihash(&self, cid: &Cid) -> impl Iterator<Item = (u64, &Cid)> {
        let digest = cid.hash().to_bytes();
        let start = RecordKey {
            digest: digest.clone(),
            offset: 0,
        };
        self.records
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(move |(key, _)| key.digest == digest)
            .map(|(key, cid)| (key.offset, cid))
    }
}

impl Index for InsertionIndex {
    fn load(&mut self, records: Vec<Record>) -> Result<()> {
        for Record { cid, offset } in records {
            self.insert_no_replace(cid, offset);
        }
        Ok(())
    }

    fn get_all(&self, cid: &Cid, mut visit: impl FnMut(u64) -> bool) -> Result<()> {
        let mut found = false;
        for (offset, _) in self.same_multihash(cid) {
            found = true;
            if !visit(offset) {
                break;
            }
        }
        match found {
            true => Ok(()),
            false => Err(Error::NotFound),
        }
    }

    fn marshal(&self, mut writer: impl Write) -> Result<u64> {
        let mut written = 8;
        writer.write_i64::<LittleEndian>(self.records.len() as i64)?;
        let mut varint = unsigned_varint::encode::u64_buffer();
        for (RecordKey { offset, .. }, cid) in &self.records {
            let cid = cid.to_bytes();
            let prefix = unsigned_varint::encode::u64(cid.len() as u64, &mut varint);
            writer.write_all(prefix)?;
            writer.write_all(&cid)?;
            writer.write_u64::<LittleEndian>(*offset)?;
            written += (prefix.len() + cid.len() + 8) as u64;
        }
        Ok(written)
    }

    fn unmarshal(&mut self, mut reader: impl Read) -> Result<()> {
        let count = reader.read_i64::<LittleEndian>()?;
        if count < 0 {
            return Err(Error::InvalidIndex(format!("negative record count {count}")));
        }
        self.records.clear();
        for _ in 0..count {
            let cid_len = unsigned_varint::io::read_u64(&mut reader)?;
            let cid = Cid::try_from(read_bytes(&mut reader, cid_len)?.as_slice())
                .map_err(|e| Error::InvalidIndex(e.to_string()))?;
            let offset = reader.read_u64::<LittleEndian>()?;
            self.insert_no_replace(cid, offset);
        }
        Ok(())
    }
}

impl IterableIndex for InsertionIndex {
    fn for_each(&self, mut f: impl FnMut(&Multihash<64>, u64) -> Result<()>) -> Result<()> {
        for (RecordKey { offset, .. }, cid) in &self.records {
            f(cid.hash(), *offset)?;
        }
        Ok(())
    }
}
