// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Blockstores backed by a single CAR file.
//!
//! - [`ReadOnly`] serves lookups over a finished CARv1 or CARv2, using the
//!   embedded index or generating one on open.
//! - [`ReadWrite`] appends blocks to a CARv2, can resume an interrupted
//!   session, and writes the index and header on
//!   [`finalize`](ReadWrite::finalize).
//!
//! Both share the read path described by [`BlockRead`].
//!
//! # Locking
//!
//! Each store holds its medium, index and write cursor behind one
//! [`parking_lot::RwLock`]. Lookups share it, while writes and lifecycle
//! transitions take it exclusively. An [`AllKeys`] iterator keeps the shared
//! lock until it is dropped, so closing a store on the thread that holds an
//! unfinished iterator deadlocks.

mod all_keys;
mod read_only;
mod read_write;

pub use all_keys::AllKeys;
pub use read_only::ReadOnly;
pub use read_write::ReadWrite;

use crate::car::frame::{Section, SectionReader};
use crate::car::index::Index;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::utils::multihash::{self, is_identity};
use cid::Cid;
use positioned_io::{ReadAt, Slice};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Read access to the blocks of a CAR.
pub trait BlockRead {
    type Keys<'a>: Iterator<Item = Cid>
    where
        Self: 'a;

    /// Identity CIDs are always present.
    fn has(&self, cid: &Cid) -> Result<bool>;

    /// Fails with [`Error::NotFound`] if there is no matching block.
    fn get(&self, cid: &Cid) -> Result<Vec<u8>>;

    /// The length of the block data, read without loading the data.
    fn get_size(&self, cid: &Cid) -> Result<u64>;

    /// The roots listed in the CARv1 header.
    fn roots(&self) -> Result<Vec<Cid>>;

    /// Every CID in payload order, read from the sections and not the index.
    fn all_keys(&self, cancel: CancellationToken) -> Result<Self::Keys<'_>>;
}

/// State shared by the read and write paths.
struct Backing<M, I> {
    medium: M,
    /// Absolute offset of the CARv1 payload in the medium.
    data_offset: u64,
    /// Length of the CARv1 payload. Grows as a [`ReadWrite`] appends.
    data_size: u64,
    index: I,
    closed: bool,
}

impl<M: ReadAt, I> Backing<M, I> {
    fn ensure_open(&self) -> Result<()> {
        match self.closed {
            true => Err(Error::Closed),
            false => Ok(()),
        }
    }

    fn sections<'a>(&'a self, options: &Options) -> SectionReader<Slice<&'a M>> {
        SectionReader::new(
            Slice::new(&self.medium, self.data_offset, Some(self.data_size)),
            self.data_size,
            options,
        )
    }

    fn roots(&self, options: &Options) -> Result<Vec<Cid>> {
        self.ensure_open()?;
        Ok(self.sections(options).read_header()?.0.roots)
    }
}

impl<M: ReadAt, I: Index> Backing<M, I> {
    /// Find the first section at an indexed offset that holds `cid`.
    ///
    /// Block data is returned when it had to be read for verification, or if
    /// `with_data` is set.
    fn locate(
        &self,
        cid: &Cid,
        options: &Options,
        with_data: bool,
    ) -> Result<Option<(Section, Option<Vec<u8>>)>> {
        let sections = self.sections(options);
        for offset in self.index.offsets(cid)? {
            let Some(section) = sections.read_section(offset)? else {
                trace!(%cid, offset, "indexed offset is past the end of the payload");
                continue;
            };
            let matched = match options.use_whole_cids {
                true => section.cid == *cid,
                false => section.cid.hash() == cid.hash(),
            };
            if !matched {
                trace!(%cid, offset, found = %section.cid, "index candidate does not match");
                continue;
            }
            if options.trusted && !with_data {
                return Ok(Some((section, None)));
            }
            let data = sections.read_data(&section)?;
            if !options.trusted && multihash::matches(&section.cid, &data) == Some(false) {
                trace!(%cid, offset, "block data does not hash to its CID");
                continue;
            }
            return Ok(Some((section, Some(data))));
        }
        Ok(None)
    }

    fn has(&self, cid: &Cid, options: &Options) -> Result<bool> {
        self.ensure_open()?;
        if is_identity(cid) {
            return Ok(true);
        }
        Ok(self.locate(cid, options, false)?.is_some())
    }

    fn get(&self, cid: &Cid, options: &Options) -> Result<Vec<u8>> {
        self.ensure_open()?;
        if is_identity(cid) {
            return Ok(cid.hash().digest().to_vec());
        }
        match self.locate(cid, options, true)? {
            Some((_, Some(data))) => Ok(data),
            Some((section, None)) => self.sections(options).read_data(&section),
            None => Err(Error::NotFound),
        }
    }

    fn get_size(&self, cid: &Cid, options: &Options) -> Result<u64> {
        self.ensure_open()?;
        if is_identity(cid) {
            return Ok(cid.hash().digest().len() as u64);
        }
        match self.locate(cid, options, false)? {
            Some((section, _)) => Ok(section.data_len),
            None => Err(Error::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::frame::{CarHeader, encode_section};
    use crate::car::index::{AnyIndex, IndexCodec, Record};
    use crate::utils::multihash::prelude::*;
    use pretty_assertions::assert_eq;

    const RAW: u64 = 0x55;
    const DAG_CBOR: u64 = 0x71;

    fn raw_cid(data: &[u8]) -> Cid {
        Cid::new_v1(RAW, MultihashCode::Sha2_256.digest(data))
    }

    /// A CARv1 payload holding `blocks`, indexed by their real offsets.
    fn backing<D: AsRef<[u8]>>(blocks: &[(Cid, D)]) -> Backing<Vec<u8>, AnyIndex> {
        let mut payload = CarHeader::new(vec![]).to_frame().unwrap();
        let mut records = vec![];
        for (cid, data) in blocks {
            records.push(Record::new(*cid, payload.len() as u64));
            payload.extend(encode_section(cid, data.as_ref()));
        }
        let mut index = AnyIndex::new(IndexCodec::MultihashSorted);
        index.load(records).unwrap();
        Backing {
            data_size: payload.len() as u64,
            medium: payload,
            data_offset: 0,
            index,
            closed: false,
        }
    }

    #[test]
    fn whole_cid_matching() {
        let data = b"block".as_slice();
        let raw = raw_cid(data);
        let cbor = Cid::new_v1(DAG_CBOR, *raw.hash());
        let backing = backing(&[(raw, data)]);

        let by_multihash = Options::default();
        assert!(backing.has(&cbor, &by_multihash).unwrap());
        assert_eq!(backing.get(&cbor, &by_multihash).unwrap(), data);

        let whole = Options {
            use_whole_cids: true,
            ..Default::default()
        };
        assert!(backing.has(&raw, &whole).unwrap());
        assert!(!backing.has(&cbor, &whole).unwrap());
        assert!(matches!(backing.get(&cbor, &whole), Err(Error::NotFound)));
    }

    #[test]
    fn untrusted_reads_skip_corrupt_candidates() {
        let cid = raw_cid(b"good");
        // the same CID twice, the first copy with corrupt data
        let backing = backing(&[(cid, b"evil"), (cid, b"good")]);

        let trusted = Options::default();
        assert_eq!(backing.get(&cid, &trusted).unwrap(), b"evil");

        let untrusted = Options {
            trusted: false,
            ..Default::default()
        };
        assert_eq!(backing.get(&cid, &untrusted).unwrap(), b"good");
        assert_eq!(backing.get_size(&cid, &untrusted).unwrap(), 4);
    }

    #[test]
    fn stale_index_entries_are_skipped() {
        let a = raw_cid(b"a");
        let b = raw_cid(b"b");
        let mut backing = backing(&[(a, b"a")]);
        // point `b` at the section holding `a`, and past the end
        let offset_of_a = backing.index.offsets(&a).unwrap()[0];
        backing
            .index
            .load(vec![Record::new(b, offset_of_a), Record::new(b, 1 << 20)])
            .unwrap();
        let options = Options::default();
        assert!(!backing.has(&b, &options).unwrap());
        assert!(matches!(backing.get(&b, &options), Err(Error::NotFound)));
    }

    #[test]
    fn identity_cids_bypass_the_index() {
        let cid = Cid::new_v1(RAW, MultihashCode::Identity.digest(b"inline"));
        let backing = backing::<&[u8]>(&[]);
        let options = Options::default();
        assert!(backing.has(&cid, &options).unwrap());
        assert_eq!(backing.get(&cid, &options).unwrap(), b"inline");
        assert_eq!(backing.get_size(&cid, &options).unwrap(), 6);
    }

    #[test]
    fn closed() {
        let cid = raw_cid(b"a");
        let mut backing = backing(&[(cid, b"a")]);
        backing.closed = true;
        let options = Options::default();
        assert!(matches!(backing.has(&cid, &options), Err(Error::Closed)));
        assert!(matches!(backing.get(&cid, &options), Err(Error::Closed)));
        assert!(matches!(backing.roots(&options), Err(Error::Closed)));
    }
}
