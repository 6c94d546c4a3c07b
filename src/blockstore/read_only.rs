// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{AllKeys, Backing, BlockRead};
use crate::car::generate::load_index;
use crate::car::index::{AnyIndex, IndexCodec};
use crate::car::v2::Layout;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::utils::io::{RandomAccessFile, RandomAccessFileReader};
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use parking_lot::RwLock;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A read-only [`Blockstore`] over a CARv1 or CARv2.
///
/// On creation, the index embedded in a CARv2 is read. Otherwise, an index is
/// generated by walking every section of the payload, reading only lengths
/// and CIDs. Blocks are read on demand from the offsets the index points at,
/// and each candidate section is checked against the requested [`Cid`] before
/// it is returned.
///
/// Once [`close`](Self::close)d, every operation fails with [`Error::Closed`].
pub struct ReadOnly<R> {
    backing: RwLock<Backing<R, AnyIndex>>,
    options: Options,
}

impl ReadOnly<RandomAccessFile> {
    pub fn open(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        Self::new(RandomAccessFile::open(path)?, options)
    }
}

impl<R: RandomAccessFileReader> ReadOnly<R> {
    /// Open `reader`, reading or generating its index.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(reader: R, options: Options) -> Result<Self> {
        let layout = Layout::detect(&reader, &options)?;
        let index = load_index(&reader, &layout, &options)?;
        debug!(version = ?layout.version, codec = ?index.codec(), "opened CAR");
        Ok(Self::with_layout(reader, layout, index, options))
    }

    /// Open `reader` with an index built elsewhere, e.g. persisted separately
    /// for a CARv1.
    ///
    /// `index` must describe the payload of `reader`. A stale index makes
    /// lookups miss, but never return the wrong block.
    pub fn with_index(reader: R, index: AnyIndex, options: Options) -> Result<Self> {
        let layout = Layout::detect(&reader, &options)?;
        Ok(Self::with_layout(reader, layout, index, options))
    }

    fn with_layout(reader: R, layout: Layout, index: AnyIndex, options: Options) -> Self {
        Self {
            backing: RwLock::new(Backing {
                medium: reader,
                data_offset: layout.data_offset,
                data_size: layout.data_size,
                index,
                closed: false,
            }),
            options,
        }
    }

    pub fn has(&self, cid: &Cid) -> Result<bool> {
        self.backing.read().has(cid, &self.options)
    }

    pub fn get(&self, cid: &Cid) -> Result<Vec<u8>> {
        self.backing.read().get(cid, &self.options)
    }

    pub fn get_size(&self, cid: &Cid) -> Result<u64> {
        self.backing.read().get_size(cid, &self.options)
    }

    pub fn roots(&self) -> Result<Vec<Cid>> {
        self.backing.read().roots(&self.options)
    }

    /// See [`AllKeys`].
    pub fn all_keys(&self, cancel: CancellationToken) -> Result<AllKeys<'_, R, AnyIndex>> {
        let backing = self.backing.read();
        backing.ensure_open()?;
        let (_, first) = backing.sections(&self.options).read_header()?;
        Ok(AllKeys::new(backing, &self.options, first, cancel))
    }

    /// The variant of the index lookups go through.
    pub fn index_codec(&self) -> Result<IndexCodec> {
        let backing = self.backing.read();
        backing.ensure_open()?;
        Ok(backing.index.codec())
    }

    /// CARs have no tombstones.
    pub fn delete_block(&self, _: &Cid) -> Result<()> {
        Err(Error::Unsupported("deleting blocks from a CAR"))
    }

    /// Waits for in-flight [`AllKeys`] iterators to be dropped.
    pub fn close(&self) -> Result<()> {
        let mut backing = self.backing.write();
        backing.ensure_open()?;
        backing.closed = true;
        Ok(())
    }

    pub fn into_inner(self) -> R {
        self.backing.into_inner().medium
    }
}

impl<R: RandomAccessFileReader> BlockRead for ReadOnly<R> {
    type Keys<'a>
        = AllKeys<'a, R, AnyIndex>
    where
        Self: 'a;

    fn has(&self, cid: &Cid) -> Result<bool> {
        ReadOnly::has(self, cid)
    }

    fn get(&self, cid: &Cid) -> Result<Vec<u8>> {
        ReadOnly::get(self, cid)
    }

    fn get_size(&self, cid: &Cid) -> Result<u64> {
        ReadOnly::get_size(self, cid)
    }

    fn roots(&self) -> Result<Vec<Cid>> {
        ReadOnly::roots(self)
    }

    fn all_keys(&self, cancel: CancellationToken) -> Result<Self::Keys<'_>> {
        ReadOnly::all_keys(self, cancel)
    }
}

impl<R: RandomAccessFileReader> Blockstore for ReadOnly<R> {
    fn get(&self, k: &Cid) -> anyhow::Result<Option<Vec<u8>>> {
        match ReadOnly::get(self, k) {
            Ok(data) => Ok(Some(data)),
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn has(&self, k: &Cid) -> anyhow::Result<bool> {
        Ok(ReadOnly::has(self, k)?)
    }

    fn put_keyed(&self, _: &Cid, _: &[u8]) -> anyhow::Result<()> {
        Err(Error::Unsupported("writing to a read-only CAR").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::frame::{CarHeader, encode_section};
    use crate::car::generate::wrap_v1;
    use crate::utils::multihash::prelude::*;
    use pretty_assertions::assert_eq;

    const RAW: u64 = 0x55;

    fn raw_cid(data: &[u8]) -> Cid {
        Cid::new_v1(RAW, MultihashCode::Sha2_256.digest(data))
    }

    fn car_v1(blocks: &[&[u8]]) -> Vec<u8> {
        let mut car = CarHeader::new(vec![raw_cid(b"root")]).to_frame().unwrap();
        for data in blocks {
            car.extend(encode_section(&raw_cid(data), data));
        }
        car
    }

    #[test]
    fn v1_generates_an_index() {
        let store = ReadOnly::new(car_v1(&[b"a", b"b"]), Options::default()).unwrap();
        assert_eq!(store.index_codec().unwrap(), IndexCodec::MultihashSorted);
        assert_eq!(store.roots().unwrap(), vec![raw_cid(b"root")]);
        assert_eq!(store.get(&raw_cid(b"a")).unwrap(), b"a");
        assert_eq!(store.get_size(&raw_cid(b"b")).unwrap(), 1);
        assert!(!store.has(&raw_cid(b"c")).unwrap());
        assert!(matches!(
            store.get(&raw_cid(b"c")),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn v2_reads_its_index() {
        let options = Options {
            index_codec: IndexCodec::Sorted,
            ..Default::default()
        };
        let mut car = Vec::new();
        wrap_v1(&car_v1(&[b"a", b"b"]), &mut car, &options).unwrap();
        // the embedded codec wins over the configured one
        let store = ReadOnly::new(car, Options::default()).unwrap();
        assert_eq!(store.index_codec().unwrap(), IndexCodec::Sorted);
        assert_eq!(store.get(&raw_cid(b"b")).unwrap(), b"b");
    }

    #[test]
    fn all_keys_in_payload_order() {
        let store = ReadOnly::new(car_v1(&[b"b", b"a", b"b"]), Options::default()).unwrap();
        let keys = store
            .all_keys(CancellationToken::new())
            .unwrap()
            .collect::<Vec<_>>();
        assert_eq!(keys, vec![raw_cid(b"b"), raw_cid(b"a"), raw_cid(b"b")]);
    }

    #[test]
    fn all_keys_cancelled() {
        let store = ReadOnly::new(car_v1(&[b"a", b"b"]), Options::default()).unwrap();
        let cancel = CancellationToken::new();
        let mut keys = store.all_keys(cancel.clone()).unwrap();
        assert_eq!(keys.next(), Some(raw_cid(b"a")));
        cancel.cancel();
        assert_eq!(keys.next(), None);
        assert_eq!(keys.next(), None);
    }

    #[test]
    fn drained_keys_release_the_lock() {
        let store = ReadOnly::new(car_v1(&[b"a", b"b"]), Options::default()).unwrap();
        let mut keys = store.all_keys(CancellationToken::new()).unwrap();
        assert_eq!(keys.by_ref().count(), 2);
        store.close().unwrap();
        assert_eq!(keys.next(), None);
    }

    #[test]
    fn cancelled_keys_release_the_lock() {
        let store = ReadOnly::new(car_v1(&[b"a", b"b"]), Options::default()).unwrap();
        let cancel = CancellationToken::new();
        let mut keys = store.all_keys(cancel.clone()).unwrap();
        assert_eq!(keys.next(), Some(raw_cid(b"a")));
        cancel.cancel();
        assert_eq!(keys.next(), None);
        store.close().unwrap();
    }

    #[test]
    fn failed_keys_release_the_lock() {
        let mut car = car_v1(&[b"a"]);
        // a section length running past the end of the payload
        car.push(0x10);
        let store = ReadOnly::with_index(
            car,
            AnyIndex::new(IndexCodec::Insertion),
            Options::default(),
        )
        .unwrap();
        let mut error = None;
        let mut keys = store
            .all_keys(CancellationToken::new())
            .unwrap()
            .on_error(|e| error = Some(e));
        assert_eq!(keys.next(), Some(raw_cid(b"a")));
        assert_eq!(keys.next(), None);
        store.close().unwrap();
        drop(keys);
        assert!(error.is_some());
    }

    #[test]
    fn closed_is_terminal() {
        let store = ReadOnly::new(car_v1(&[b"a"]), Options::default()).unwrap();
        store.close().unwrap();
        assert!(matches!(store.has(&raw_cid(b"a")), Err(Error::Closed)));
        assert!(matches!(store.roots(), Err(Error::Closed)));
        assert!(matches!(
            store.all_keys(CancellationToken::new()),
            Err(Error::Closed)
        ));
        assert!(matches!(store.close(), Err(Error::Closed)));
    }

    #[test]
    fn blockstore_maps_not_found() {
        let store = ReadOnly::new(car_v1(&[b"a"]), Options::default()).unwrap();
        assert_eq!(
            Blockstore::get(&store, &raw_cid(b"a")).unwrap(),
            Some(b"a".to_vec())
        );
        assert_eq!(Blockstore::get(&store, &raw_cid(b"z")).unwrap(), None);
        assert!(Blockstore::put_keyed(&store, &raw_cid(b"z"), b"z").is_err());
        assert!(matches!(
            store.delete_block(&raw_cid(b"a")),
            Err(Error::Unsupported(_))
        ));
    }
}
