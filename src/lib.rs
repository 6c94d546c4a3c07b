// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Blockstores and indexes for [CAR](https://ipld.io/specs/transport/car/)
//! files.
//!
//! Open a finished CAR with [`blockstore::ReadOnly`], or build one
//! incrementally with [`blockstore::ReadWrite`]. Both are configured with
//! [`Options`].

pub mod blockstore;
pub mod car;
mod error;
mod options;
pub mod utils;

pub use error::{Error, Result};
pub use options::{DEFAULT_MAX_ALLOWED_SECTION_SIZE, DEFAULT_MAX_INDEX_CID_SIZE, Options};
