// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Correlation of responses with outstanding requests by transaction id

use std::{
    collections::HashMap,
    io,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio::sync::oneshot;

use crate::{
    error::{Error, ProtocolError},
    frame::tcp::{ResponseFrame, TransactionId},
};

type Reply = Result<ResponseFrame, Error>;

/// Number of distinct transaction ids.
const CAPACITY: usize = 1 << 16;

#[derive(Debug)]
enum Entry {
    /// A caller is waiting for the response.
    Pending {
        seq: u64,
        tx: oneshot::Sender<Reply>,
    },

    /// The caller gave up after its request had been sent. The id stays
    /// reserved until the late response arrives, or until it is reclaimed
    /// because no other id is left.
    Abandoned { seq: u64 },
}

#[derive(Debug, Default)]
struct State {
    next_id: TransactionId,
    next_seq: u64,
    entries: HashMap<TransactionId, Entry>,
    closed: Option<(io::ErrorKind, String)>,
}

impl State {
    fn closed_error(&self) -> Option<Error> {
        self.closed
            .as_ref()
            .map(|(kind, msg)| io::Error::new(*kind, msg.clone()).into())
    }

    fn oldest_abandoned(&self) -> Option<TransactionId> {
        self.entries
            .iter()
            .filter_map(|(id, entry)| match entry {
                Entry::Abandoned { seq } => Some((*seq, *id)),
                Entry::Pending { .. } => None,
            })
            .min()
            .map(|(_, id)| id)
    }
}

/// The table of outstanding transactions of a single connection.
///
/// Shared between the callers that allocate ids and the task that reads
/// responses from the connection.
#[derive(Debug, Default)]
pub(super) struct Transactions {
    state: Mutex<State>,
}

impl Transactions {
    pub(super) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // The state is consistent after every single statement.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves the next free transaction id.
    ///
    /// Ids are handed out in ascending order, wrapping around, and skipping
    /// every id that is still pending or abandoned. If every id is in use
    /// the longest abandoned one is reclaimed.
    pub(super) fn allocate(&self) -> Result<Ticket<'_>, Error> {
        let mut state = self.lock();
        if let Some(err) = state.closed_error() {
            return Err(err);
        }
        let id = if state.entries.len() >= CAPACITY {
            let Some(id) = state.oldest_abandoned() else {
                return Err(ProtocolError::TransactionIdsExhausted.into());
            };
            log::debug!("Reclaiming abandoned transaction {id}");
            state.entries.remove(&id);
            id
        } else {
            loop {
                let id = state.next_id;
                state.next_id = id.wrapping_add(1);
                if !state.entries.contains_key(&id) {
                    break id;
                }
            }
        };
        let seq = state.next_seq;
        state.next_seq += 1;
        let (tx, rx) = oneshot::channel();
        state.entries.insert(id, Entry::Pending { seq, tx });
        Ok(Ticket {
            transactions: self,
            id,
            seq,
            rx,
            sent: false,
        })
    }

    /// Hands a received frame over to the caller waiting for it.
    pub(super) fn resolve(&self, frame: ResponseFrame) {
        let id = frame.hdr.transaction_id;
        let mut state = self.lock();
        match state.entries.remove(&id) {
            Some(Entry::Pending { tx, .. }) => {
                if tx.send(Ok(frame)).is_err() {
                    log::debug!("Caller of transaction {id} is gone");
                }
            }
            Some(Entry::Abandoned { .. }) => {
                log::debug!("Discarding late response of transaction {id}");
            }
            None => {
                log::warn!("Discarding response with unexpected transaction id {id}");
            }
        }
    }

    /// Fails all outstanding and future transactions.
    ///
    /// Only the first reason is kept.
    pub(super) fn close(&self, kind: io::ErrorKind, reason: impl Into<String>) {
        let mut state = self.lock();
        if state.closed.is_none() {
            state.closed = Some((kind, reason.into()));
        }
        let entries = std::mem::take(&mut state.entries);
        for (_, entry) in entries {
            if let Entry::Pending { tx, .. } = entry {
                if let Some(err) = state.closed_error() {
                    let _ = tx.send(Err(err));
                }
            }
        }
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[cfg(test)]
    pub(super) fn set_next_id(&self, id: TransactionId) {
        self.lock().next_id = id;
    }
}

/// The reservation of a transaction id by a single caller.
///
/// Dropping the ticket before the response has been received releases
/// the reservation: an id whose request has never been sent is freed
/// immediately, otherwise it stays reserved until the late response
/// arrives or the id is reclaimed by [`Transactions::allocate`].
#[derive(Debug)]
pub(super) struct Ticket<'a> {
    transactions: &'a Transactions,
    id: TransactionId,
    seq: u64,
    rx: oneshot::Receiver<Reply>,
    sent: bool,
}

impl Ticket<'_> {
    pub(super) fn id(&self) -> TransactionId {
        self.id
    }

    /// Must be invoked as soon as the request has been handed over to the
    /// transport, i.e. before it is flushed.
    pub(super) fn mark_sent(&mut self) {
        self.sent = true;
    }

    pub(super) async fn response(&mut self) -> Reply {
        match (&mut self.rx).await {
            Ok(reply) => reply,
            Err(_) => Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection closed").into()),
        }
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        let mut state = self.transactions.lock();
        let Some(Entry::Pending { seq, .. }) = state.entries.get(&self.id) else {
            return;
        };
        if *seq != self.seq {
            return;
        }
        if self.sent {
            state
                .entries
                .insert(self.id, Entry::Abandoned { seq: self.seq });
        } else {
            state.entries.remove(&self.id);
        }
    }
}
