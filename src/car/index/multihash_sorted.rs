// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{Index, IterableIndex, MultiWidthIndex, Record};
use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt as _, WriteBytesExt as _};
use cid::{Cid, multihash::Multihash};
use std::collections::BTreeMap;
use std::io::{Read, Write};

/// `car-multihash-index-sorted`: a [`MultiWidthIndex`] per multihash code.
///
/// ```text
/// i32le count ++ (u64le code ++ multi-width index) × count
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultihashSortedIndex(BTreeMap<u64, MultiWidthIndex>);

impl MultihashSortedIndex {
    pub fn len(&self) -> usize {
        self.0.values().map(MultiWidthIndex::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(MultiWidthIndex::is_empty)
    }
}

impl Index for MultihashSortedIndex {
    fn load(&mut self, records: Vec<Record>) -> Result<()> {
        let mut by_code = BTreeMap::<u64, Vec<_>>::new();
        for record in &records {
            let hash = record.cid.hash();
            by_code
                .entry(hash.code())
                .or_default()
                .push((hash.digest(), record.offset));
        }
        for (code, entries) in by_code {
            self.0.entry(code).or_default().load_digests(entries);
        }
        Ok(())
    }

    fn get_all(&self, cid: &Cid, visit: impl FnMut(u64) -> bool) -> Result<()> {
        let hash = cid.hash();
        match self
            .0
            .get(&hash.code())
            .is_some_and(|index| index.get_digest(hash.digest(), visit))
        {
            true => Ok(()),
            false => Err(Error::NotFound),
        }
    }

    fn marshal(&self, mut writer: impl Write) -> Result<u64> {
        writer.write_i32::<LittleEndian>(self.0.len() as i32)?;
        let mut written = 4;
        for (code, index) in &self.0 {
            writer.write_u64::<LittleEndian>(*code)?;
            written += 8 + index.marshal(&mut writer)?;
        }
        Ok(written)
    }

    fn unmarshal(&mut self, mut reader: impl Read) -> Result<()> {
        let count = reader.read_i32::<LittleEndian>()?;
        if count < 0 {
            return Err(Error::InvalidIndex(format!(
                "negative multihash code count {count}"
            )));
        }
        let mut groups = BTreeMap::new();
        for _ in 0..count {
            let code = reader.read_u64::<LittleEndian>()?;
            if groups.last_key_value().is_some_and(|(last, _)| *last >= code) {
                return Err(Error::InvalidIndex(format!(
                    "multihash code {code:#x} is out of order"
                )));
            }
            let mut index = MultiWidthIndex::default();
            index.unmarshal(&mut reader)?;
            groups.insert(code, index);
        }
        self.0 = groups;
        Ok(())
    }
}

impl IterableIndex for MultihashSortedIndex {
    fn for_each(&self, mut f: impl FnMut(&Multihash<64>, u64) -> Result<()>) -> Result<()> {
        for (code, index) in &self.0 {
            for (digest, offset) in index.entries() {
                let mh = Multihash::wrap(*code, digest)
                    .map_err(|e| Error::InvalidIndex(e.to_string()))?;
                f(&mh, offset)?;
            }
        }
        Ok(())
    }
}
