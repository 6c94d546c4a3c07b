// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{AllKeys, Backing, BlockRead};
use crate::car::frame::{CarHeader, SectionReader, write_section};
use crate::car::index::{InsertionIndex, write_index};
use crate::car::v2::{PRAGMA, PRAGMA_SIZE, V2Header, Version, read_version};
use crate::error::{Error, Result};
use crate::options::Options;
use crate::utils::io::{RandomAccessFileWriter, Truncate as _, size_of};
use crate::utils::multihash::is_identity;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use parking_lot::RwLock;
use positioned_io::{Slice, WriteAt as _};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write as _};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Appends blocks to a CARv2 and serves lookups while doing so.
///
/// The CARv2 header stays unfinalized until [`finalize`](Self::finalize)
/// writes the index after the payload and then the header. An interrupted
/// session can be resumed by opening the same file with the same roots and
/// [`Options::data_padding`]; the sections already written are indexed
/// again, and a torn trailing section is cut off.
///
/// ```text
/// [pragma][v2 header][data padding][CARv1 header][section]...[section]
///                                                                     ^ cursor
/// ```
pub struct ReadWrite<F> {
    backing: RwLock<Backing<F, InsertionIndex>>,
    options: Options,
}

impl ReadWrite<File> {
    /// Create `path`, or resume the session left in it.
    pub fn open(path: impl AsRef<Path>, roots: Vec<Cid>, options: Options) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::open_medium(file, roots, options)
    }
}

impl<F: RandomAccessFileWriter> ReadWrite<F> {
    /// Start a new CARv2 in an empty `medium`, or resume the one it holds.
    #[tracing::instrument(level = "debug", skip_all, fields(roots = roots.len()))]
    pub fn open_medium(medium: F, roots: Vec<Cid>, options: Options) -> Result<Self> {
        let backing = match size_of(&medium)? {
            0 => create(medium, &roots, &options)?,
            _ => resume(medium, &roots, &options)?,
        };
        Ok(Self {
            backing: RwLock::new(backing),
            options,
        })
    }

    pub fn put(&self, cid: &Cid, data: &[u8]) -> Result<()> {
        self.put_many([(*cid, data)])
    }

    /// Append `blocks` in order, skipping the ones that need not be stored.
    ///
    /// Stops at the first failure. Blocks before it stay written.
    pub fn put_many<D: AsRef<[u8]>>(&self, blocks: impl IntoIterator<Item = (Cid, D)>) -> Result<()> {
        let mut backing = self.backing.write();
        backing.ensure_open()?;
        for (cid, data) in blocks {
            backing.append(&cid, data.as_ref(), &self.options)?;
        }
        Ok(())
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

    /// See [`AllKeys`]. Blocks put while the iterator is alive wait for it to
    /// be dropped.
    pub fn all_keys(&self, cancel: CancellationToken) -> Result<AllKeys<'_, F, InsertionIndex>> {
        let backing = self.backing.read();
        backing.ensure_open()?;
        let (_, first) = backing.sections(&self.options).read_header()?;
        Ok(AllKeys::new(backing, &self.options, first, cancel))
    }

    /// CARs have no tombstones.
    pub fn delete_block(&self, _: &Cid) -> Result<()> {
        Err(Error::Unsupported("deleting blocks from a CAR"))
    }

    /// Write the index and the final header, then close.
    ///
    /// The result is readable with [`ReadOnly`](super::ReadOnly).
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn finalize(&self) -> Result<()> {
        let mut backing = self.backing.write();
        backing.ensure_open()?;
        backing.closed = true;

        let num_blocks = backing.index.len();
        let index = std::mem::take(&mut backing.index).flatten(self.options.index_codec)?;
        let mut header = V2Header {
            data_offset: backing.data_offset,
            data_size: backing.data_size,
            index_offset: backing.data_offset + backing.data_size + self.options.index_padding,
            ..Default::default()
        };
        header
            .characteristics
            .set_fully_indexed(self.options.store_identity_cids);

        let end_of_data = backing.data_offset + backing.data_size;
        let padding = vec![0; self.options.index_padding as usize];
        backing.medium.write_all_at(end_of_data, &padding)?;
        let mut writer = BufWriter::new(positioned_io::Cursor::new_pos(
            &mut backing.medium,
            header.index_offset,
        ));
        let index_len = write_index(&index, &mut writer)?;
        writer.flush()?;
        drop(writer);

        // A reader that sees a finalized header must find a complete index.
        backing.medium.write_all_at(PRAGMA_SIZE, &header.to_bytes())?;
        backing.medium.flush()?;
        debug!(num_blocks, data_size = header.data_size, index_len, "finalized CAR");
        Ok(())
    }

    /// Close without writing an index or finalizing the header.
    ///
    /// The medium keeps every block put so far and can be resumed.
    pub fn discard(&self) -> Result<()> {
        let mut backing = self.backing.write();
        backing.ensure_open()?;
        backing.closed = true;
        backing.medium.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> F {
        self.backing.into_inner().medium
    }
}

impl<F: RandomAccessFileWriter> Backing<F, InsertionIndex> {
    /// Append one block at the cursor, unless it need not be stored.
    fn append(&mut self, cid: &Cid, data: &[u8], options: &Options) -> Result<()> {
        if is_identity(cid) && !options.store_identity_cids {
            return Ok(());
        }
        let size = cid.encoded_len();
        if size > options.max_index_cid_size {
            return Err(Error::OversizedCid {
                cid: *cid,
                size,
                max: options.max_index_cid_size,
            });
        }
        let section_size = (size + data.len()) as u64;
        if section_size > options.max_allowed_section_size {
            return Err(Error::SectionTooLarge {
                size: section_size,
                max: options.max_allowed_section_size,
            });
        }
        if !options.allow_duplicate_puts {
            let stored = match options.use_whole_cids {
                true => self.index.has_exact_cid(cid),
                false => self.index.has_multihash(cid),
            };
            if stored {
                return Ok(());
            }
        }
        let offset = self.data_size;
        let written = write_section(&mut self.medium, self.data_offset + offset, cid, data)?;
        self.index.insert_no_replace(*cid, offset);
        self.data_size += written;
        Ok(())
    }
}

/// Write the pragma, an unfinalized header and the CARv1 header.
fn create<F: RandomAccessFileWriter>(
    mut medium: F,
    roots: &[Cid],
    options: &Options,
) -> Result<Backing<F, InsertionIndex>> {
    let header = V2Header::unfinalized(options.data_padding);
    let v1_header = CarHeader::new(roots.to_vec()).to_frame()?;
    medium.write_all_at(0, &PRAGMA)?;
    medium.write_all_at(PRAGMA_SIZE, &header.to_bytes())?;
    let padding = vec![0; options.data_padding as usize];
    medium.write_all_at(header.data_offset - options.data_padding, &padding)?;
    medium.write_all_at(header.data_offset, &v1_header)?;
    debug!(data_offset = header.data_offset, "created CAR");
    Ok(Backing {
        medium,
        data_offset: header.data_offset,
        data_size: v1_header.len() as u64,
        index: InsertionIndex::default(),
        closed: false,
    })
}

/// Reopen a CARv2 for appending, indexing the sections it already holds.
fn resume<F: RandomAccessFileWriter>(
    mut medium: F,
    roots: &[Cid],
    options: &Options,
) -> Result<Backing<F, InsertionIndex>> {
    let len = size_of(&medium)?;
    match read_version(&medium, len, options)? {
        Version::V2 => {}
        Version::V1 => return Err(Error::UnsupportedVersion(1)),
    }
    let mut header = V2Header::read_at(&medium)?;
    let expected = V2Header::unfinalized(options.data_padding).data_offset;
    if header.data_offset != expected {
        return Err(Error::DataOffsetMismatch {
            expected,
            found: header.data_offset,
        });
    }
    if header.is_finalized() {
        // Drop the index and fall back to an unfinalized header.
        medium.truncate(header.data_end()?)?;
        header = V2Header::unfinalized(options.data_padding);
        medium.write_all_at(PRAGMA_SIZE, &header.to_bytes())?;
    }

    let len = size_of(&medium)?;
    let available = len.saturating_sub(header.data_offset);
    let (index, data_size) = {
        let sections = SectionReader::new(
            Slice::new(&medium, header.data_offset, Some(available)),
            available,
            options,
        );
        let (v1_header, first) = sections.read_header()?;
        if v1_header.roots != roots {
            return Err(Error::RootsMismatch {
                expected: roots.to_vec(),
                found: v1_header.roots,
            });
        }
        let mut index = InsertionIndex::default();
        let mut cursor = first;
        for section in sections.sections(first) {
            match section {
                Ok(section) => {
                    index.insert_no_replace(section.cid, section.offset);
                    cursor = section.end();
                }
                Err(Error::UnexpectedEof(_)) => break,
                Err(e) => return Err(e),
            }
        }
        (index, cursor)
    };
    if data_size < available {
        warn!(
            discarded = available - data_size,
            "truncating incomplete trailing section"
        );
        medium.truncate(header.data_offset + data_size)?;
    }
    debug!(num_blocks = index.len(), data_size, "resumed CAR");
    Ok(Backing {
        medium,
        data_offset: header.data_offset,
        data_size,
        index,
        closed: false,
    })
}

impl<F: RandomAccessFileWriter> BlockRead for ReadWrite<F> {
    type Keys<'a>
        = AllKeys<'a, F, InsertionIndex>
    where
        Self: 'a;

    fn has(&self, cid: &Cid) -> Result<bool> {
        ReadWrite::has(self, cid)
    }

    fn get(&self, cid: &Cid) -> Result<Vec<u8>> {
        ReadWrite::get(self, cid)
    }

    fn get_size(&self, cid: &Cid) -> Result<u64> {
        ReadWrite::get_size(self, cid)
    }

    fn roots(&self) -> Result<Vec<Cid>> {
        ReadWrite::roots(self)
    }

    fn all_keys(&self, cancel: CancellationToken) -> Result<Self::Keys<'_>> {
        ReadWrite::all_keys(self, cancel)
    }
}

impl<F: RandomAccessFileWriter> Blockstore for ReadWrite<F> {
    fn get(&self, k: &Cid) -> anyhow::Result<Option<Vec<u8>>> {
        match ReadWrite::get(self, k) {
            Ok(data) => Ok(Some(data)),
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn has(&self, k: &Cid) -> anyhow::Result<bool> {
        Ok(ReadWrite::has(self, k)?)
    }

    fn put_keyed(&self, k: &Cid, block: &[u8]) -> anyhow::Result<()> {
        Ok(self.put(k, block)?)
    }

    fn put_many_keyed<D, I>(&self, blocks: I) -> anyhow::Result<()>
    where
        Self: Sized,
        D: AsRef<[u8]>,
        I: IntoIterator<Item = (Cid, D)>,
    {
        Ok(self.put_many(blocks)?)
    }
}
