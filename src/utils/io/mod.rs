// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod random_access;

pub use random_access::RandomAccessFile;

use positioned_io::{ReadAt, Size, WriteAt};
use std::{fs::File, io};

/// Anything a read-only CAR can be opened over.
pub trait RandomAccessFileReader: ReadAt + Size + Send + Sync + 'static {}
impl<X: ReadAt + Size + Send + Sync + 'static> RandomAccessFileReader for X {}

/// Shrink the underlying medium to `len` bytes.
pub trait Truncate {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl Truncate for Vec<u8> {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.resize(len, 0);
        Ok(())
    }
}

/// A medium a resumable CAR can be written to.
pub trait RandomAccessFileWriter: ReadAt + WriteAt + Size + Truncate + Send + Sync {}
impl<X: ReadAt + WriteAt + Size + Truncate + Send + Sync> RandomAccessFileWriter for X {}

/// Current length of the medium, treating an unknown size as empty.
pub fn size_of(medium: &impl Size) -> io::Result<u64> {
    Ok(medium.size()?.unwrap_or_default())
}
