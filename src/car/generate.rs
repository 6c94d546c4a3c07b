// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Building indexes for CAR files that do not carry one, and wrapping CARv1
//! files into indexed CARv2 files.

use super::frame::SectionReader;
use super::index::{AnyIndex, Index as _, Record, read_index, write_index};
use super::v2::{Layout, PRAGMA, V2Header, Version};
use crate::error::{Error, Result};
use crate::options::Options;
use crate::utils::io::size_of;
use positioned_io::{ReadAt, Size, Slice, WriteAt};
use std::io::{self, BufWriter, Write as _};

/// Scan the CARv1 payload in `reader` and build an index of the variant
/// selected by [`Options::index_codec`].
///
/// Only section lengths and CIDs are read; block data is skipped.
#[tracing::instrument(level = "debug", skip(reader, options))]
pub fn generate_index(reader: impl ReadAt, len: u64, options: &Options) -> Result<AnyIndex> {
    let sections = SectionReader::new(reader, len, options);
    let (_, first) = sections.read_header()?;
    let mut records = vec![];
    for section in sections.sections(first) {
        let section = section?;
        let size = section.cid.encoded_len();
        if size > options.max_index_cid_size {
            return Err(Error::OversizedCid {
                cid: section.cid,
                size,
                max: options.max_index_cid_size,
            });
        }
        records.push(Record::new(section.cid, section.offset));
    }
    let num_blocks = records.len();
    let mut index = AnyIndex::new(options.index_codec);
    index.load(records)?;
    tracing::debug!(num_blocks, "indexed CAR");
    Ok(index)
}

/// Read the index embedded in a CARv2, or generate one from the payload.
pub fn read_or_generate_index(
    reader: &(impl ReadAt + Size),
    options: &Options,
) -> Result<AnyIndex> {
    load_index(reader, &Layout::detect(reader, options)?, options)
}

pub(crate) fn load_index(
    reader: &impl ReadAt,
    layout: &Layout,
    options: &Options,
) -> Result<AnyIndex> {
    match layout.index_offset {
        Some(index_offset) => read_index(io::BufReader::new(positioned_io::Cursor::new_pos(
            reader,
            index_offset,
        ))),
        None => generate_index(payload(reader, layout), layout.data_size, options),
    }
}

/// The CARv1 payload described by `layout`.
pub(crate) fn payload<R: ReadAt>(reader: R, layout: &Layout) -> Slice<R> {
    Slice::new(reader, layout.data_offset, Some(layout.data_size))
}

/// Write `src`, a CARv1, into `dst` as a finalized CARv2 with a generated
/// index, returning the written header.
///
/// ```text
/// [pragma][v2 header][data padding][CARv1][index padding][index]
/// ```
#[tracing::instrument(level = "debug", skip_all)]
pub fn wrap_v1(
    src: &(impl ReadAt + Size),
    mut dst: impl WriteAt,
    options: &Options,
) -> Result<V2Header> {
    let data_size = size_of(src)?;
    let layout = Layout::detect(src, options)?;
    if layout.version != Version::V1 {
        return Err(Error::UnsupportedVersion(2));
    }
    let index = generate_index(src, data_size, options)?;

    let mut header = V2Header::unfinalized(options.data_padding);
    header.data_size = data_size;
    header.index_offset = header.data_offset + data_size + options.index_padding;
    // generated indexes hold every section, identity CIDs included
    header.characteristics.set_fully_indexed(true);

    copy_at(src, data_size, &mut dst, header.data_offset)?;
    let mut writer = BufWriter::new(positioned_io::Cursor::new_pos(
        &mut dst,
        header.index_offset,
    ));
    let index_len = write_index(&index, &mut writer)?;
    writer.flush()?;
    drop(writer);

    dst.write_all_at(0, &PRAGMA)?;
    dst.write_all_at(PRAGMA.len() as u64, &header.to_bytes())?;
    dst.flush()?;
    tracing::debug!(data_size, index_len, "wrapped CARv1");
    Ok(header)
}

/// Copy the first `len` bytes of `src` into `dst` at `pos`.
fn copy_at(src: impl ReadAt, len: u64, dst: impl WriteAt, pos: u64) -> Result<()> {
    let mut reader = positioned_io::Cursor::new(Slice::new(src, 0, Some(len)));
    let mut writer = BufWriter::new(positioned_io::Cursor::new_pos(dst, pos));
    let copied = io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    match copied == len {
        true => Ok(()),
        false => Err(Error::UnexpectedEof("CARv1 payload")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::frame::{CarHeader, encode_section};
    use crate::car::index::{Index as _, IndexCodec};
    use crate::car::v2::{HEADER_SIZE, PRAGMA_SIZE};
    use crate::utils::multihash::prelude::*;
    use cid::Cid;
    use pretty_assertions::assert_eq;

    const RAW: u64 = 0x55;

    fn car_v1(blocks: &[&[u8]]) -> (Vec<u8>, Vec<Cid>) {
        let cids = blocks
            .iter()
            .map(|data| Cid::new_v1(RAW, MultihashCode::Sha2_256.digest(data)))
            .collect::<Vec<_>>();
        let mut car = CarHeader::new(cids[..1].to_vec()).to_frame().unwrap();
        for (cid, data) in cids.iter().zip(blocks) {
            car.extend(encode_section(cid, data));
        }
        (car, cids)
    }

    #[test]
    fn generated_index_finds_every_block() {
        let (car, cids) = car_v1(&[b"a", b"b", b"c"]);
        for codec in [
            IndexCodec::Sorted,
            IndexCodec::MultihashSorted,
            IndexCodec::Insertion,
        ] {
            let options = Options {
                index_codec: codec,
                ..Default::default()
            };
            let index = generate_index(&car, car.len() as u64, &options).unwrap();
            assert_eq!(index.codec(), codec);
            for cid in &cids {
                assert_eq!(index.offsets(cid).unwrap().len(), 1);
            }
        }
    }

    #[test]
    fn generate_rejects_oversized_cids() {
        let (car, _) = car_v1(&[b"a"]);
        let options = Options {
            max_index_cid_size: 16,
            ..Default::default()
        };
        assert!(matches!(
            generate_index(&car, car.len() as u64, &options),
            Err(Error::OversizedCid { size: 36, max: 16, .. })
        ));
    }

    #[test]
    fn wrap_then_read_index() {
        let (car, cids) = car_v1(&[b"hello", b"world"]);
        let options = Options {
            data_padding: 3,
            index_padding: 5,
            ..Default::default()
        };
        let mut wrapped = Vec::new();
        let header = wrap_v1(&car, &mut wrapped, &options).unwrap();
        assert_eq!(header.data_offset, PRAGMA_SIZE + HEADER_SIZE + 3);
        assert_eq!(header.data_size, car.len() as u64);
        assert_eq!(header.index_offset, header.data_offset + car.len() as u64 + 5);

        let layout = Layout::detect(&wrapped, &options).unwrap();
        assert_eq!(layout.version, Version::V2);
        assert!(layout.characteristics.is_fully_indexed());
        let start = layout.data_offset as usize;
        assert_eq!(&wrapped[start..start + car.len()], car.as_slice());

        let index = read_or_generate_index(&wrapped, &options).unwrap();
        let generated = generate_index(&car, car.len() as u64, &options).unwrap();
        assert_eq!(index, generated);
        for cid in &cids {
            assert!(!index.offsets(cid).unwrap().is_empty());
        }
    }

    #[test]
    fn wrap_rejects_v2() {
        let (car, _) = car_v1(&[b"a"]);
        let mut wrapped = Vec::new();
        wrap_v1(&car, &mut wrapped, &Options::default()).unwrap();
        assert!(matches!(
            wrap_v1(&wrapped, Vec::new(), &Options::default()),
            Err(Error::UnsupportedVersion(2))
        ));
    }
}
