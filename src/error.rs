// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use std::io;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the CAR readers, indexes and blockstores.
///
/// None of these are retried internally.
#[derive(Debug, Error)]
pub enum Error {
    /// The index has no entry for the requested hash, or none of the
    /// candidate sections matched it. Expected in steady state.
    #[error("not found")]
    NotFound,
    #[error("malformed section: {0}")]
    Malformed(String),
    #[error("unexpected end of data while reading {0}")]
    UnexpectedEof(&'static str),
    #[error("null padding not allowed, see `Options::zero_length_section_as_eof`")]
    NullPadding,
    #[error("section of {size} bytes exceeds the maximum of {max} bytes")]
    SectionTooLarge { size: u64, max: u64 },
    #[error("header of {size} bytes exceeds the maximum of {max} bytes")]
    HeaderTooLarge { size: u64, max: u64 },
    #[error("unsupported CAR version: {0}")]
    UnsupportedVersion(u64),
    #[error("invalid CAR header: {0}")]
    InvalidHeader(String),
    #[error("blockstore is closed")]
    Closed,
    #[error("CID {cid} is {size} bytes, exceeding the maximum index CID size of {max} bytes")]
    OversizedCid { cid: Cid, size: usize, max: usize },
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("cannot resume: roots in file {found:?} do not match requested roots {expected:?}")]
    RootsMismatch { expected: Vec<Cid>, found: Vec<Cid> },
    #[error(
        "cannot resume: data offset in file is {found}, expected {expected} (data padding must match)"
    )]
    DataOffsetMismatch { expected: u64, found: u64 },
    #[error("unknown index codec: {0:#x}")]
    UnknownIndexCodec(u64),
    #[error("invalid index: {0}")]
    InvalidIndex(String),
    #[error("cbor: {0}")]
    Cbor(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<unsigned_varint::io::ReadError> for Error {
    fn from(err: unsigned_varint::io::ReadError) -> Error {
        match err {
            unsigned_varint::io::ReadError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Error::UnexpectedEof("varint")
            }
            unsigned_varint::io::ReadError::Io(e) => Error::Io(e),
            other => Error::Malformed(other.to_string()),
        }
    }
}
