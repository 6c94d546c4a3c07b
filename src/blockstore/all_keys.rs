// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::Backing;
use crate::error::Error;
use crate::options::Options;
use cid::Cid;
use parking_lot::RwLockReadGuard;
use positioned_io::ReadAt;
use std::iter::FusedIterator;
use tokio_util::sync::CancellationToken;

/// Lazily walks the sections of a CAR and yields their CIDs in payload order.
///
/// The index is not consulted, so every stored block is yielded even if the
/// index is stale.
///
/// The stream ends when the payload is exhausted, on the first error, or at
/// the first call to `next` after the [`CancellationToken`] is cancelled. That error is
/// passed to the handler registered with [`AllKeys::on_error`], if any.
///
/// Holds a shared lock on the store until the stream ends or the iterator is
/// dropped, whichever comes first.
pub struct AllKeys<'a, M, I> {
    /// `None` once the stream has ended.
    backing: Option<RwLockReadGuard<'a, Backing<M, I>>>,
    options: &'a Options,
    next: Option<u64>,
    cancel: CancellationToken,
    on_error: Option<Box<dyn FnOnce(Error) + 'a>>,
}

impl<'a, M, I> AllKeys<'a, M, I> {
    pub(super) fn new(
        backing: RwLockReadGuard<'a, Backing<M, I>>,
        options: &'a Options,
        first_section: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            backing: Some(backing),
            options,
            next: Some(first_section),
            cancel,
            on_error: None,
        }
    }

    /// Receive the error that ended the stream, instead of it ending silently.
    pub fn on_error(mut self, handler: impl FnOnce(Error) + 'a) -> Self {
        self.on_error = Some(Box::new(handler));
        self
    }
}

impl<M: ReadAt, I> Iterator for AllKeys<'_, M, I> {
    type Item = Cid;

    fn next(&mut self) -> Option<Self::Item> {
        let (Some(backing), Some(pos)) = (self.backing.take(), self.next.take()) else {
            return None;
        };
        if self.cancel.is_cancelled() {
            return None;
        }
        let section = backing.sections(self.options).read_section(pos);
        match section {
            Ok(Some(section)) => {
                self.next = Some(section.end());
                self.backing = Some(backing);
                Some(section.cid)
            }
            Ok(None) => None,
            Err(e) => {
                drop(backing);
                if let Some(handler) = self.on_error.take() {
                    handler(e);
                }
                None
            }
        }
    }
}

impl<M: ReadAt, I> FusedIterator for AllKeys<'_, M, I> {}
