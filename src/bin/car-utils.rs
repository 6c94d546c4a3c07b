// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use carstore::Options;
use carstore::blockstore::ReadOnly;
use carstore::car::{Layout, generate_index, index::write_index, wrap_v1};
use carstore::utils::io::RandomAccessFile;
use cid::Cid;
use clap::{Parser, Subcommand};
use positioned_io::Size as _;
use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
struct Args {
    /// Optional TOML file with `carstore::Options`
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the layout, roots and block count of a CAR
    Inspect { path: PathBuf },
    /// List the CIDs of every section, in payload order
    Ls { path: PathBuf },
    /// Write a standalone index for a CARv1
    Index {
        source: PathBuf,
        destination: PathBuf,
    },
    /// Wrap a CARv1 into a CARv2 with an index
    Wrap {
        source: PathBuf,
        destination: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    _main(Args::parse())
}

fn _main(args: Args) -> anyhow::Result<()> {
    debug!(?args);
    let options = match &args.config {
        Some(path) => Options::from_toml_file(path)?,
        None => Options::default(),
    };
    match args.command {
        Command::Inspect { path } => {
            let reader = RandomAccessFile::open(path)?;
            let layout = Layout::detect(&reader, &options)?;
            let store = ReadOnly::new(reader, options)?;
            println!("version: {:?}", layout.version);
            println!("data offset: {}", layout.data_offset);
            println!("data size: {}", layout.data_size);
            match layout.index_offset {
                Some(offset) => println!("index offset: {offset}"),
                None => println!("index offset: none"),
            }
            println!("index codec: {:?}", store.index_codec()?);
            println!(
                "fully indexed: {}",
                layout.characteristics.is_fully_indexed()
            );
            for root in store.roots()? {
                println!("root: {root}");
            }
            println!("blocks: {}", keys(&store)?.len());
        }
        Command::Ls { path } => {
            for cid in keys(&ReadOnly::open(path, options)?)? {
                println!("{cid}");
            }
        }
        Command::Index {
            source,
            destination,
        } => {
            let reader = RandomAccessFile::open(source)?;
            let len = reader.size()?.unwrap_or_default();
            let index = generate_index(&reader, len, &options)?;
            let mut writer = BufWriter::new(File::create(destination)?);
            let written = write_index(&index, &mut writer)?;
            writer.flush()?;
            println!("wrote {written} bytes of {:?} index", index.codec());
        }
        Command::Wrap {
            source,
            destination,
        } => {
            let reader = RandomAccessFile::open(source)?;
            let mut file = File::create(destination)?;
            let header = wrap_v1(&reader, &mut file, &options)?;
            file.sync_all()?;
            println!(
                "wrote {} payload bytes at {}, index at {}",
                header.data_size, header.data_offset, header.index_offset
            );
        }
    }
    Ok(())
}

/// Collect the CIDs of `store`, failing on the first unreadable section.
fn keys(store: &ReadOnly<RandomAccessFile>) -> anyhow::Result<Vec<Cid>> {
    let mut error = None;
    let cids = store
        .all_keys(CancellationToken::new())?
        .on_error(|e| error = Some(e))
        .collect::<Vec<_>>();
    match error {
        Some(e) => Err(e.into()),
        None => Ok(cids),
    }
}
