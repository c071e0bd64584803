//! Message passing between the processes of a group
//!
//! Every process of the group runs the same code with a distinct rank. All
//! operations block. Collective operations must be called by every process
//! in the same order; implementations detect a process that skips or
//! reorders one and report it as a protocol violation.

pub mod exchange;
pub mod local;
#[cfg(feature = "mpi")]
pub mod mpi_comm;
pub mod payload;

pub use exchange::{exchange_all, Complete, Exchange, Exchanging, Idle};
pub use local::{LocalComm, LocalGroup};
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;
pub use payload::Payload;

use crate::error::{Result, SetupError};

/// Blocking point-to-point and collective communication
pub trait Communicator {
    /// Rank of this process, `0 <= rank < size`
    fn rank(&self) -> usize;

    /// Number of processes in the group
    fn size(&self) -> usize;

    /// Sends a buffer to `dest`
    ///
    /// Buffers from one sender with the same tag arrive in sending order.
    fn send<T: Payload>(&self, dest: usize, tag: u32, data: Vec<T>) -> Result<()>;

    /// Receives the next buffer sent by `source` with `tag`
    fn recv<T: Payload>(&self, source: usize, tag: u32) -> Result<Vec<T>>;

    /// Distributes root's value to every process
    ///
    /// `value` must be `Some` on root; it is ignored elsewhere.
    fn broadcast<T: Payload + Clone>(&self, value: Option<T>, root: usize) -> Result<T>;

    /// Hands chunk `q` of root's `chunks` to process `q`
    ///
    /// `chunks` must be `Some` with exactly `size()` entries on root.
    fn scatter<T: Payload>(&self, chunks: Option<Vec<Vec<T>>>, root: usize) -> Result<Vec<T>>;

    /// Sends `outgoing[q]` to every process `q` and returns what each sent here
    fn all_to_allv<T: Payload>(&self, outgoing: Vec<Vec<T>>) -> Result<Vec<Vec<T>>>;

    /// Waits until every process has reached the barrier
    fn barrier(&self) -> Result<()>;

    /// Terminates the group on behalf of this process
    ///
    /// Every process blocked in, or later entering, a communication call
    /// returns [`SetupError::Aborted`].
    fn abort(&self, error: &SetupError);

    /// Scatters one value per process
    fn scatter_value<T: Payload>(&self, values: Option<Vec<T>>, root: usize) -> Result<T> {
        let chunks = values.map(|values| values.into_iter().map(|v| vec![v]).collect());
        let mut chunk = self.scatter(chunks, root)?;
        match (chunk.pop(), chunk.is_empty()) {
            (Some(value), true) => Ok(value),
            _ => Err(SetupError::protocol(self.rank(), "scatter_value expects one value per process")),
        }
    }

    /// Sends `outgoing[q]` to every process `q`, one value each
    fn all_to_all<T: Payload>(&self, outgoing: Vec<T>) -> Result<Vec<T>> {
        if outgoing.len() != self.size() {
            return Err(SetupError::protocol(
                self.rank(),
                format!("all_to_all needs {} values, got {}", self.size(), outgoing.len()),
            ));
        }
        let incoming = self.all_to_allv(outgoing.into_iter().map(|v| vec![v]).collect())?;
        incoming
            .into_iter()
            .map(|mut chunk| {
                chunk
                    .pop()
                    .ok_or_else(|| SetupError::protocol(self.rank(), "all_to_all received an empty chunk"))
            })
            .collect()
    }

    /// Whether this process is `root`
    fn is_root(&self, root: usize) -> bool {
        self.rank() == root
    }
}
