// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Reading and writing the CAR container format.
//!
//! See <https://ipld.io/specs/transport/car/carv1/> and
//! <https://ipld.io/specs/transport/car/carv2/>.

pub mod frame;
pub mod generate;
pub mod index;
pub mod v2;

pub use frame::{CarHeader, Section, SectionReader};
pub use generate::{generate_index, read_or_generate_index, wrap_v1};
pub use index::{AnyIndex, Index, IndexCodec, IterableIndex, Record};
pub use v2::{Characteristics, Layout, V2Header, Version, read_version};
