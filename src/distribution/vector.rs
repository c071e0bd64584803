//! Distributed resolution of vector index tables
//!
//! The vector distribution file contains one line `n processes` followed by
//! `n` lines `index owner`, with `index` running from 1 to `n` and `owner`
//! in `1..=processes`.
//!
//! Root reads the file in batches of about `n/p` components. Each component
//! is tagged with its owner, its global index and its slot on the owner, the
//! slot being the number of components with the same owner read before it.
//! A batch is scattered in equal slices over all processes, not necessarily
//! to the owners, which keeps every temporary array at O(n/p + p). A final
//! all-to-all exchange moves each (global, slot) pair to its owner.

use std::io::BufRead;
use std::path::Path;

use crate::comm::{Communicator, Exchange, Payload};
use crate::config::SetupConfig;
use crate::distribution::reader::DistributionReader;
use crate::distribution::{expect_root_source, open_on_root};
use crate::error::{FileKind, Result, SetupError};
use crate::utils::ceil_div;

/// A vector component tagged by root, or padding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Assignment {
    /// None marks padding that keeps all slices the same size
    owner: Option<usize>,
    global: usize,
    local: usize,
}

impl Assignment {
    const PADDING: Assignment = Assignment {
        owner: None,
        global: 0,
        local: 0,
    };
}

impl Payload for Assignment {
    const WORDS: usize = 3;

    fn encode(&self, out: &mut Vec<u64>) {
        out.push(self.owner.map_or(u64::MAX, |owner| owner as u64));
        out.push(self.global as u64);
        out.push(self.local as u64);
    }

    fn decode(words: &[u64]) -> Self {
        Assignment {
            owner: (words[0] != u64::MAX).then(|| words[0] as usize),
            global: words[1] as usize,
            local: words[2] as usize,
        }
    }
}

/// The part of a distributed vector owned by one process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorDistribution {
    n: usize,
    vindex: Vec<usize>,
}

impl VectorDistribution {
    /// Builds a distribution from a known local-to-global table
    pub fn new(n: usize, vindex: Vec<usize>) -> Self {
        debug_assert!(vindex.iter().all(|&g| g < n), "global index out of range");
        Self { n, vindex }
    }

    /// Global vector length
    pub fn n(&self) -> usize {
        self.n
    }

    /// Number of local components
    pub fn nv(&self) -> usize {
        self.vindex.len()
    }

    /// Global index of every local slot
    pub fn vindex(&self) -> &[usize] {
        &self.vindex
    }

    /// Takes the local-to-global table
    pub fn into_vindex(self) -> Vec<usize> {
        self.vindex
    }
}

/// Reads the header `n processes`
fn read_vector_header<R: BufRead>(reader: &mut DistributionReader<R>, p: usize) -> Result<usize> {
    let n = reader.next_usize("vector length")?;
    let processes = reader.next_usize("process count")?;
    if processes != p {
        return Err(SetupError::ProcessCountMismatch {
            file: FileKind::Vector,
            declared: processes,
            actual: p,
        });
    }
    Ok(n)
}

/// Reads components `start..end`, tags them and cuts the batch into `p` slices
fn read_batch<R: BufRead>(
    reader: &mut DistributionReader<R>,
    start: usize,
    end: usize,
    p: usize,
    slice: usize,
    counts: &mut [usize],
) -> Result<Vec<Vec<Assignment>>> {
    let mut tagged = Vec::with_capacity(p * slice);

    for k in start..end {
        let index = reader.next_usize("vector index")?;
        let owner = reader.next_usize("owner")?;

        if index == 0 {
            return Err(SetupError::malformed(reader.line(), "vector indices start at 1"));
        }
        if index - 1 != k {
            return Err(SetupError::DistributionInconsistency {
                expected: k,
                found: index - 1,
            });
        }
        if owner == 0 || owner > p {
            return Err(SetupError::malformed(
                reader.line(),
                format!("owner {} outside 1..={}", owner, p),
            ));
        }

        let owner = owner - 1;
        tagged.push(Assignment {
            owner: Some(owner),
            global: k,
            local: counts[owner],
        });
        counts[owner] += 1;
    }

    tagged.resize(p * slice, Assignment::PADDING);
    Ok((0..p).map(|q| tagged[q * slice..(q + 1) * slice].to_vec()).collect())
}

/// Resolves the local index table of a distributed vector
///
/// Must be called by every process of the group. `source` must be `Some`
/// exactly on `config.root`.
///
/// # Returns
///
/// The vector length and, for this process, the global index of every local
/// slot. Slots are assigned in increasing global index order.
pub fn resolve_vector<C, R>(
    comm: &C,
    source: Option<DistributionReader<R>>,
    config: &SetupConfig,
) -> Result<VectorDistribution>
where
    C: Communicator,
    R: BufRead,
{
    config.validate(comm.size())?;
    let root = config.root;
    let p = comm.size();
    let mut source = expect_root_source(comm, source, root)?;

    let declared = match source.as_mut() {
        Some(reader) => Some(read_vector_header(reader, p)?),
        None => None,
    };
    let n = comm.broadcast(declared, root)?;

    let batch = config.vector_batch_size(n, p);
    let slice = ceil_div(batch, p);
    let n_batches = if n == 0 { 0 } else { ceil_div(n, batch) };

    // Per-owner component counters, kept on root only
    let mut counts = source.is_some().then(|| vec![0usize; p]);
    let mut held = Vec::with_capacity(n_batches * slice);

    for b in 0..n_batches {
        let chunks = match (source.as_mut(), counts.as_mut()) {
            (Some(reader), Some(counts)) => {
                let start = b * batch;
                let end = (start + batch).min(n);
                Some(read_batch(reader, start, end, p, slice, counts)?)
            }
            _ => None,
        };

        let mine: Vec<Assignment> = comm.scatter(chunks, root)?;
        if mine.len() != slice {
            return Err(SetupError::protocol(
                comm.rank(),
                format!("expected a slice of {} components, got {}", slice, mine.len()),
            ));
        }
        held.extend(mine);
        tracing::debug!(rank = comm.rank(), batch = b, of = n_batches, "vector batch scattered");
    }

    let nv = comm.scatter_value(counts, root)?;

    // Pack (global, slot) pairs for their owners
    let mut exchange = Exchange::new(p);
    for assignment in &held {
        if let Some(owner) = assignment.owner {
            exchange.push(owner, (assignment.global, assignment.local));
        }
    }
    drop(held);

    let exchange = exchange.exchange_counts(comm)?;
    if exchange.total_incoming() != nv {
        return Err(SetupError::protocol(
            comm.rank(),
            format!("owns {} components but {} will arrive", nv, exchange.total_incoming()),
        ));
    }
    let pairs = exchange.exchange(comm)?.into_items();

    let mut slots: Vec<Option<usize>> = vec![None; nv];
    for (global, local) in pairs {
        let slot = slots
            .get_mut(local)
            .ok_or_else(|| SetupError::protocol(comm.rank(), format!("slot {} outside 0..{}", local, nv)))?;
        if let Some(previous) = *slot {
            return Err(SetupError::protocol(
                comm.rank(),
                format!("slot {} assigned to both {} and {}", local, previous, global),
            ));
        }
        *slot = Some(global);
    }

    let vindex = slots
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| SetupError::protocol(comm.rank(), "a local slot was never assigned"))?;

    tracing::debug!(rank = comm.rank(), n, nv, "vector index table resolved");
    if comm.is_root(root) {
        tracing::info!(n, processes = p, batch, "vector distribution resolved");
    }

    Ok(VectorDistribution { n, vindex })
}

/// Resolves a vector distribution from a file opened on root only
pub fn resolve_vector_file<C, P>(comm: &C, path: P, config: &SetupConfig) -> Result<VectorDistribution>
where
    C: Communicator,
    P: AsRef<Path>,
{
    let source = open_on_root(comm, path, config.root)?;
    resolve_vector(comm, source, config)
}
