// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use carstore::blockstore::{BlockRead, ReadOnly, ReadWrite};
use carstore::car::frame::{CarHeader, encode_section};
use carstore::car::{IndexCodec, generate_index};
use carstore::utils::multihash::prelude::*;
use carstore::{Error, Options};
use cid::Cid;
use pretty_assertions::assert_eq;
use quickcheck_macros::quickcheck;
use rstest::rstest;
use tokio_util::sync::CancellationToken;

const RAW: u64 = 0x55;

const CODES: [MultihashCode; 4] = [
    MultihashCode::Sha2_256,
    MultihashCode::Sha2_512,
    MultihashCode::Blake2b256,
    MultihashCode::Keccak256,
];

fn cid_of(code: MultihashCode, data: &[u8]) -> Cid {
    Cid::new_v1(RAW, code.digest(data))
}

fn raw_cid(data: &[u8]) -> Cid {
    cid_of(MultihashCode::Sha2_256, data)
}

fn keys(store: &impl BlockRead) -> Vec<Cid> {
    store.all_keys(CancellationToken::new()).unwrap().collect()
}

/// Every block is readable through the common read interface.
fn assert_holds(store: &impl BlockRead, blocks: &[(Cid, Vec<u8>)]) {
    for (cid, data) in blocks {
        assert!(store.has(cid).unwrap());
        assert_eq!(&store.get(cid).unwrap(), data);
        assert_eq!(store.get_size(cid).unwrap(), data.len() as u64);
    }
}

#[test]
fn basic_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("basic.car");
    let root = raw_cid(b"root");
    let (h1, h2, h3) = (raw_cid(b"hello"), raw_cid(b"world"), raw_cid(b"never"));

    let store = ReadWrite::open(&path, vec![root], Options::default()).unwrap();
    store.put(&h1, b"hello").unwrap();
    store.put(&h2, b"world").unwrap();
    store.finalize().unwrap();
    drop(store);

    let store = ReadOnly::open(&path, Options::default()).unwrap();
    assert_eq!(store.roots().unwrap(), vec![root]);
    assert_eq!(store.get(&h1).unwrap(), b"hello");
    assert_eq!(store.get(&h2).unwrap(), b"world");
    assert!(!store.has(&h3).unwrap());
}

#[quickcheck]
fn round_trip(blocks: Vec<(Vec<u8>, u8)>) {
    let blocks = blocks
        .into_iter()
        .map(|(data, code)| (cid_of(CODES[code as usize % CODES.len()], &data), data))
        .collect::<Vec<_>>();
    let store = ReadWrite::open_medium(Vec::new(), vec![], Options::default()).unwrap();
    for (cid, data) in &blocks {
        store.put(cid, data).unwrap();
    }
    assert_holds(&store, &blocks);
    store.finalize().unwrap();

    let store = ReadOnly::new(store.into_inner(), Options::default()).unwrap();
    assert_holds(&store, &blocks);
}

#[test]
fn duplicate_puts_are_stored_once() {
    let store = ReadWrite::open_medium(Vec::new(), vec![], Options::default()).unwrap();
    let cid = raw_cid(b"twice");
    store.put(&cid, b"twice").unwrap();
    store.put(&cid, b"twice").unwrap();
    store.finalize().unwrap();

    let store = ReadOnly::new(store.into_inner(), Options::default()).unwrap();
    assert_eq!(keys(&store), vec![cid]);
}

#[rstest]
fn index_is_complete(
    #[values(IndexCodec::Sorted, IndexCodec::MultihashSorted, IndexCodec::Insertion)]
    codec: IndexCodec,
) {
    let options = Options {
        index_codec: codec,
        ..Default::default()
    };
    let blocks = (0..100u32)
        .map(|i| {
            let data = i.to_le_bytes().to_vec();
            (cid_of(CODES[i as usize % CODES.len()], &data), data)
        })
        .collect::<Vec<_>>();
    let store = ReadWrite::open_medium(Vec::new(), vec![], options.clone()).unwrap();
    store
        .put_many(blocks.iter().map(|(cid, data)| (*cid, data)))
        .unwrap();
    store.finalize().unwrap();

    let store = ReadOnly::new(store.into_inner(), options).unwrap();
    assert_eq!(store.index_codec().unwrap(), codec);
    assert_holds(&store, &blocks);
    for i in 100..110u32 {
        assert!(!store.has(&raw_cid(&i.to_le_bytes())).unwrap());
    }
}

#[test]
fn resumption() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resumed.car");
    let root = raw_cid(b"root");
    let blocks = (0..10u8)
        .map(|i| (raw_cid(&[i]), vec![i]))
        .collect::<Vec<_>>();

    let store = ReadWrite::open(&path, vec![root], Options::default()).unwrap();
    for (cid, data) in &blocks {
        store.put(cid, data).unwrap();
    }
    store.discard().unwrap();
    drop(store);

    let store = ReadWrite::open(&path, vec![root], Options::default()).unwrap();
    assert_holds(&store, &blocks);
    let late = raw_cid(b"late");
    store.put(&late, b"late").unwrap();
    let expected = blocks
        .iter()
        .map(|(cid, _)| *cid)
        .chain([late])
        .collect::<Vec<_>>();
    assert_eq!(keys(&store), expected);
    store.finalize().unwrap();
    drop(store);

    let store = ReadOnly::open(&path, Options::default()).unwrap();
    assert_eq!(keys(&store), expected);
}

#[test]
fn resumption_requires_the_same_roots() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roots.car");
    let store = ReadWrite::open(&path, vec![raw_cid(b"a")], Options::default()).unwrap();
    store.discard().unwrap();
    drop(store);
    assert!(matches!(
        ReadWrite::open(&path, vec![raw_cid(b"b")], Options::default()),
        Err(Error::RootsMismatch { .. })
    ));
}

#[test]
fn identity_short_circuit() {
    let cid = cid_of(MultihashCode::Identity, b"inline");
    let store = ReadWrite::open_medium(Vec::new(), vec![], Options::default()).unwrap();
    assert!(store.has(&cid).unwrap());
    assert_eq!(store.get(&cid).unwrap(), b"inline");
    store.finalize().unwrap();

    let store = ReadOnly::new(store.into_inner(), Options::default()).unwrap();
    assert!(store.has(&cid).unwrap());
    assert_eq!(store.get(&cid).unwrap(), b"inline");
}

#[test]
fn oversized_cid_is_rejected() {
    let options = Options {
        max_index_cid_size: 16,
        ..Default::default()
    };
    let store = ReadWrite::open_medium(Vec::new(), vec![], options).unwrap();
    let cid = raw_cid(b"too big");
    assert!(matches!(
        store.put(&cid, b"too big"),
        Err(Error::OversizedCid { size: 36, max: 16, .. })
    ));
    assert!(keys(&store).is_empty());
    let medium = store.into_inner();

    let fresh = ReadWrite::open_medium(Vec::new(), vec![], Options::default()).unwrap();
    assert_eq!(medium, fresh.into_inner());
}

#[test]
fn zero_length_section_policy() {
    let mut car = CarHeader::new(vec![]).to_frame().unwrap();
    car.extend(encode_section(&raw_cid(b"a"), b"a"));
    car.push(0);

    let lenient = Options {
        zero_length_section_as_eof: true,
        ..Default::default()
    };
    let index = generate_index(&car, car.len() as u64, &lenient).unwrap();

    let strict = ReadOnly::with_index(car.clone(), index.clone(), Options::default()).unwrap();
    let mut error = None;
    let found = strict
        .all_keys(CancellationToken::new())
        .unwrap()
        .on_error(|e| error = Some(e))
        .collect::<Vec<_>>();
    assert_eq!(found, vec![raw_cid(b"a")]);
    assert!(matches!(error, Some(Error::NullPadding)));

    let lenient = ReadOnly::with_index(car, index, lenient).unwrap();
    let mut error = None;
    let found = lenient
        .all_keys(CancellationToken::new())
        .unwrap()
        .on_error(|e| error = Some(e))
        .collect::<Vec<_>>();
    assert_eq!(found, vec![raw_cid(b"a")]);
    assert!(error.is_none());
}

#[test]
fn v1_without_index() {
    let mut car = CarHeader::new(vec![raw_cid(b"root")]).to_frame().unwrap();
    car.extend(encode_section(&raw_cid(b"a"), b"a"));
    car.extend(encode_section(&raw_cid(b"b"), b"b"));
    let store = ReadOnly::new(car, Options::default()).unwrap();
    assert_eq!(store.roots().unwrap(), vec![raw_cid(b"root")]);
    assert_holds(
        &store,
        &[(raw_cid(b"a"), b"a".to_vec()), (raw_cid(b"b"), b"b".to_vec())],
    );
}

#[test]
fn concurrent_readers_then_close() {
    let blocks = (0..50u32)
        .map(|i| {
            let data = i.to_le_bytes().to_vec();
            (cid_of(CODES[i as usize % CODES.len()], &data), data)
        })
        .collect::<Vec<_>>();
    let store = ReadWrite::open_medium(Vec::new(), vec![], Options::default()).unwrap();
    store
        .put_many(blocks.iter().map(|(cid, data)| (*cid, data)))
        .unwrap();
    store.finalize().unwrap();
    let store = ReadOnly::new(store.into_inner(), Options::default()).unwrap();

    let (store, blocks) = (&store, &blocks);
    std::thread::scope(|s| {
        let readers = (0..4)
            .map(|_| {
                s.spawn(move || {
                    assert_holds(store, blocks);
                    assert_eq!(keys(store).len(), blocks.len());
                })
            })
            .collect::<Vec<_>>();
        s.spawn(move || {
            for reader in readers {
                reader.join().unwrap();
            }
            store.close().unwrap();
        });
    });
    assert!(matches!(store.has(&blocks[0].0), Err(Error::Closed)));
}

#[test]
fn close_waits_for_an_open_key_stream() {
    let store = ReadWrite::open_medium(Vec::new(), vec![], Options::default()).unwrap();
    store.put(&raw_cid(b"a"), b"a").unwrap();
    store.put(&raw_cid(b"b"), b"b").unwrap();
    store.finalize().unwrap();
    let store = ReadOnly::new(store.into_inner(), Options::default()).unwrap();

    let mut stream = store.all_keys(CancellationToken::new()).unwrap();
    assert_eq!(stream.next(), Some(raw_cid(b"a")));
    std::thread::scope(|s| {
        let closer = s.spawn(|| store.close());
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!closer.is_finished());
        assert_eq!(stream.by_ref().collect::<Vec<_>>(), vec![raw_cid(b"b")]);
        closer.join().unwrap().unwrap();
    });
}
