//! Communication schedule for the distributed product
//!
//! For every local column the schedule records which process owns the
//! matching component of the input vector `v` and its slot there; for every
//! local row, which process owns the matching component of the output vector
//! `u` and its slot there.

use crate::comm::{exchange_all, Communicator, Exchange};
use crate::distribution::VectorDistribution;
use crate::error::{Result, SetupError};
use crate::utils::ceil_div;

/// Where the vector components of a local matrix block live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommSchedule {
    src_proc: Vec<usize>,
    src_index: Vec<usize>,
    dest_proc: Vec<usize>,
    dest_index: Vec<usize>,
    /// For every destination process, the local `v` slots it needs from here
    fanout_send: Vec<Vec<usize>>,
    /// For every source process, the local columns its values fill
    fanout_recv: Vec<Vec<usize>>,
}

impl CommSchedule {
    /// Owner of the `v` component of each local column
    pub fn src_proc(&self) -> &[usize] {
        &self.src_proc
    }

    /// Slot of the `v` component of each local column on its owner
    pub fn src_index(&self) -> &[usize] {
        &self.src_index
    }

    /// Owner of the `u` component of each local row
    pub fn dest_proc(&self) -> &[usize] {
        &self.dest_proc
    }

    /// Slot of the `u` component of each local row on its owner
    pub fn dest_index(&self) -> &[usize] {
        &self.dest_index
    }

    /// Local `v` slots to send to each process during fan-out
    pub fn fanout_send(&self) -> &[Vec<usize>] {
        &self.fanout_send
    }

    /// Local columns filled by each process during fan-out
    pub fn fanout_recv(&self) -> &[Vec<usize>] {
        &self.fanout_recv
    }
}

/// Builds the communication schedule once, before any product
pub trait ScheduleBuilder {
    /// Collective: every process must call it
    ///
    /// # Arguments
    ///
    /// * `n` - Global dimension
    /// * `rowindex` - Global index of each local row
    /// * `colindex` - Global index of each local column
    /// * `v` - Distribution of the input vector
    /// * `u` - Distribution of the output vector
    fn build<C: Communicator>(
        &self,
        comm: &C,
        n: usize,
        rowindex: &[usize],
        colindex: &[usize],
        v: &VectorDistribution,
        u: &VectorDistribution,
    ) -> Result<CommSchedule>;
}

/// Schedule builder using a distributed directory
///
/// Global index `g` is registered at process `g / ceil(n/p)`, which then
/// answers owner queries for it. Each vector needs three exchanges:
/// registration, queries and replies.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryScheduleBuilder;

/// Finds `(owner, slot)` of every index in `wanted`
fn locate<C: Communicator>(
    comm: &C,
    n: usize,
    dist: &VectorDistribution,
    wanted: &[usize],
) -> Result<Vec<(usize, usize)>> {
    let p = comm.size();
    let block = ceil_div(n, p).max(1);
    let directory_of = |g: usize| g / block;
    let base = comm.rank() * block;

    // Register the components owned here
    let mut registration = Exchange::new(p);
    for (local, &g) in dist.vindex().iter().enumerate() {
        registration.push(directory_of(g), (g, comm.rank(), local));
    }
    let registered = exchange_all(comm, registration)?.into_items();

    let mut table: Vec<Option<(usize, usize)>> = vec![None; block];
    for (g, owner, local) in registered {
        let entry = g
            .checked_sub(base)
            .and_then(|i| table.get_mut(i))
            .ok_or_else(|| SetupError::protocol(comm.rank(), format!("index {} registered at the wrong directory", g)))?;
        if let Some((previous, _)) = *entry {
            return Err(SetupError::protocol(
                comm.rank(),
                format!("index {} owned by both rank {} and rank {}", g, previous, owner),
            ));
        }
        *entry = Some((owner, local));
    }

    // Ask the directories
    let mut queries = Exchange::new(p);
    for &g in wanted {
        queries.push(directory_of(g), g);
    }
    let queries = exchange_all(comm, queries)?.into_batches();

    // Answer in query order
    let mut replies = Exchange::new(p);
    for (q, batch) in queries.iter().enumerate() {
        for &g in batch {
            let answer = g
                .checked_sub(base)
                .and_then(|i| table.get(i).copied().flatten())
                .ok_or(SetupError::UnownedIndex { index: g })?;
            replies.push(q, answer);
        }
    }
    let replies = exchange_all(comm, replies)?.into_batches();

    let mut cursors = vec![0usize; p];
    wanted
        .iter()
        .map(|&g| {
            let d = directory_of(g);
            let answer = replies[d]
                .get(cursors[d])
                .copied()
                .ok_or_else(|| SetupError::protocol(comm.rank(), format!("no reply for index {}", g)))?;
            cursors[d] += 1;
            Ok(answer)
        })
        .collect()
}

impl ScheduleBuilder for DirectoryScheduleBuilder {
    fn build<C: Communicator>(
        &self,
        comm: &C,
        n: usize,
        rowindex: &[usize],
        colindex: &[usize],
        v: &VectorDistribution,
        u: &VectorDistribution,
    ) -> Result<CommSchedule> {
        for dist in [v, u] {
            if dist.n() != n {
                return Err(SetupError::DimensionMismatch {
                    matrix: n,
                    vector: dist.n(),
                });
            }
        }

        let (src_proc, src_index): (Vec<usize>, Vec<usize>) = locate(comm, n, v, colindex)?.into_iter().unzip();
        let (dest_proc, dest_index): (Vec<usize>, Vec<usize>) = locate(comm, n, u, rowindex)?.into_iter().unzip();

        // Tell every owner which of its v slots this process needs
        let p = comm.size();
        let mut requests = Exchange::new(p);
        let mut fanout_recv = vec![Vec::new(); p];
        for (j, (&q, &slot)) in src_proc.iter().zip(&src_index).enumerate() {
            requests.push(q, slot);
            fanout_recv[q].push(j);
        }
        let fanout_send = exchange_all(comm, requests)?.into_batches();

        tracing::debug!(
            rank = comm.rank(),
            ncols = colindex.len(),
            nrows = rowindex.len(),
            values_sent = fanout_send.iter().map(Vec::len).sum::<usize>(),
            "communication schedule built"
        );

        Ok(CommSchedule {
            src_proc,
            src_index,
            dest_proc,
            dest_index,
            fanout_send,
            fanout_recv,
        })
    }
}
