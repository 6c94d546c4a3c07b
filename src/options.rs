// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::car::index::IndexCodec;
use serde::Deserialize;
use smart_default::SmartDefault;
use std::path::Path;

/// Maximum encoded CID size accepted by the indexes, 2 KiB.
pub const DEFAULT_MAX_INDEX_CID_SIZE: usize = 2 << 10;

/// Maximum size of a single section or of the CARv1 header, 32 MiB.
pub const DEFAULT_MAX_ALLOWED_SECTION_SIZE: u64 = 32 << 20;

/// Configuration for reading, indexing and writing CAR files.
///
/// Constructed once and passed by reference to the constructors of
/// [`ReadOnly`](crate::blockstore::ReadOnly) and
/// [`ReadWrite`](crate::blockstore::ReadWrite).
///
/// # Example
/// ```
/// let options = carstore::Options::from_toml_str("use_whole_cids = true\n").unwrap();
/// assert!(options.use_whole_cids);
/// assert_eq!(options.data_padding, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, SmartDefault, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    /// Zero bytes written between the CARv2 header and the CARv1 payload.
    pub data_padding: u64,
    /// Zero bytes written between the CARv1 payload and the index.
    pub index_padding: u64,
    /// Variant used when an index is generated or flattened.
    #[default(IndexCodec::MultihashSorted)]
    pub index_codec: IndexCodec,
    /// Treat a zero-length section as the end of the payload instead of an
    /// error.
    pub zero_length_section_as_eof: bool,
    /// CIDs with a larger encoding are refused by the indexes.
    #[default(DEFAULT_MAX_INDEX_CID_SIZE)]
    pub max_index_cid_size: usize,
    #[default(DEFAULT_MAX_ALLOWED_SECTION_SIZE)]
    pub max_allowed_header_size: u64,
    #[default(DEFAULT_MAX_ALLOWED_SECTION_SIZE)]
    pub max_allowed_section_size: u64,
    /// Append a block even if an equal one is already stored.
    pub allow_duplicate_puts: bool,
    /// Match on the full CID rather than on the multihash alone.
    pub use_whole_cids: bool,
    /// Write identity CIDs into the payload instead of skipping them.
    pub store_identity_cids: bool,
    /// When `false`, payloads are re-hashed on read and mismatching
    /// candidates are discarded.
    #[default(true)]
    pub trusted: bool,
}

impl Options {
    pub fn from_toml_str(toml_string: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(toml_string)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}
