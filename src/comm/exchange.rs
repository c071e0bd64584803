//! Variable-length all-to-all exchange as an explicit protocol
//!
//! An exchange always runs in the same steps on every process:
//!
//! 1. **Idle**: items are packed per destination
//! 2. **Exchanging**: an all-to-all of counts tells every process how much it
//!    will receive from every other process
//! 3. **Complete**: the items themselves have been exchanged and checked
//!    against the announced counts
//!
//! Each step consumes the previous state, so a process cannot skip the count
//! exchange or read results before the data exchange has happened.

use crate::comm::{Communicator, Payload};
use crate::error::{Result, SetupError};

/// An all-to-all exchange in state `S`
pub struct Exchange<S> {
    state: S,
}

/// Packing items per destination
pub struct Idle<T> {
    outgoing: Vec<Vec<T>>,
}

/// Counts are known on both sides; the data has not moved yet
pub struct Exchanging<T> {
    outgoing: Vec<Vec<T>>,
    recv_counts: Vec<usize>,
}

/// Data has been exchanged
pub struct Complete<T> {
    incoming: Vec<Vec<T>>,
}

impl<T: Payload> Exchange<Idle<T>> {
    /// Starts an exchange within a group of `size` processes
    pub fn new(size: usize) -> Self {
        Self {
            state: Idle {
                outgoing: (0..size).map(|_| Vec::new()).collect(),
            },
        }
    }

    /// Queues `item` for process `dest`; items for one destination keep their order
    ///
    /// # Panics
    ///
    /// Panics if `dest` is not a rank of the group.
    pub fn push(&mut self, dest: usize, item: T) {
        self.state.outgoing[dest].push(item);
    }

    /// Number of items queued for each destination
    pub fn send_counts(&self) -> Vec<usize> {
        self.state.outgoing.iter().map(Vec::len).collect()
    }

    /// Tells every process how many items to expect from this one
    pub fn exchange_counts<C: Communicator>(self, comm: &C) -> Result<Exchange<Exchanging<T>>> {
        if self.state.outgoing.len() != comm.size() {
            return Err(SetupError::protocol(
                comm.rank(),
                format!(
                    "exchange built for {} processes used in a group of {}",
                    self.state.outgoing.len(),
                    comm.size()
                ),
            ));
        }

        let recv_counts = comm.all_to_all(self.send_counts())?;
        Ok(Exchange {
            state: Exchanging {
                outgoing: self.state.outgoing,
                recv_counts,
            },
        })
    }
}

impl<T: Payload> Exchange<Exchanging<T>> {
    /// Number of items that will arrive from each process
    pub fn recv_counts(&self) -> &[usize] {
        &self.state.recv_counts
    }

    /// Total number of items that will arrive
    pub fn total_incoming(&self) -> usize {
        self.state.recv_counts.iter().sum()
    }

    /// Moves the items to their destinations
    pub fn exchange<C: Communicator>(self, comm: &C) -> Result<Exchange<Complete<T>>> {
        let incoming = comm.all_to_allv(self.state.outgoing)?;

        for (source, (chunk, &expected)) in incoming.iter().zip(&self.state.recv_counts).enumerate() {
            if chunk.len() != expected {
                return Err(SetupError::protocol(
                    comm.rank(),
                    format!(
                        "rank {} announced {} items but sent {}",
                        source,
                        expected,
                        chunk.len()
                    ),
                ));
            }
        }

        Ok(Exchange {
            state: Complete { incoming },
        })
    }
}

impl<T> Exchange<Complete<T>> {
    /// Items received from `source`, in the order it queued them
    pub fn from_source(&self, source: usize) -> &[T] {
        &self.state.incoming[source]
    }

    /// Per-source batches of received items
    pub fn into_batches(self) -> Vec<Vec<T>> {
        self.state.incoming
    }

    /// All received items, ordered by source rank and then queueing order
    pub fn into_items(self) -> Vec<T> {
        self.state.incoming.into_iter().flatten().collect()
    }
}

/// Runs all three steps at once
pub fn exchange_all<T, C>(comm: &C, packed: Exchange<Idle<T>>) -> Result<Exchange<Complete<T>>>
where
    T: Payload,
    C: Communicator,
{
    packed.exchange_counts(comm)?.exchange(comm)
}
