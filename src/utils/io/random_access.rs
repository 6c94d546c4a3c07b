// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use positioned_io::{ReadAt, Size};
use std::fs::File;
use std::io;
use std::path::Path;

/// A file opened for positioned reads, with its length captured on open.
///
/// [`positioned_io::RandomAccessFile`] does not implement [`Size`], which
/// [`ReadOnly`](crate::blockstore::ReadOnly) needs to locate the end of a
/// CARv1 payload.
pub struct RandomAccessFile {
    inner: positioned_io::RandomAccessFile,
    len: u64,
}

impl RandomAccessFile {
    /// Fails if `path` is not a regular file.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::from_file(File::open(path)?)
    }

    pub fn from_file(file: File) -> io::Result<Self> {
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            ));
        }
        let len = metadata.len();
        Ok(Self {
            inner: positioned_io::RandomAccessFile::try_new(file)?,
            len,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Size for RandomAccessFile {
    fn size(&self) -> io::Result<Option<u64>> {
        Ok(Some(self.len))
    }
}

impl ReadAt for RandomAccessFile {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read_at(pos, buf)
    }

    fn read_exact_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_exact_at(pos, buf)
    }
}
