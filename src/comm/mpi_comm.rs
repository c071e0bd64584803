//! MPI process group, one rank per OS process
//!
//! Messages are flattened to `u64` words through [`Payload`] and moved with
//! the matching MPI operations. Variable-length collectives first exchange
//! word counts, then the words themselves.

use mpi::collective::CommunicatorCollectives;
use mpi::datatype::{Partition, PartitionMut};
use mpi::environment::Universe;
use mpi::point_to_point::{Destination, Source};
use mpi::topology::{Communicator as _, SimpleCommunicator};
use mpi::traits::Root;

use crate::comm::payload::{counts_and_displacements, decode_all, encode_all};
use crate::comm::{Communicator, Payload};
use crate::error::{Result, SetupError};

/// Communicator over `MPI_COMM_WORLD`
pub struct MpiComm {
    world: SimpleCommunicator,
    rank: usize,
    size: usize,
    /// Finalizes MPI when dropped, after `world`
    _universe: Universe,
}

impl MpiComm {
    /// Initializes MPI and wraps the world communicator
    pub fn init() -> Result<Self> {
        let universe =
            mpi::initialize().ok_or_else(|| SetupError::InvalidConfig("MPI is already initialized".to_string()))?;
        let world = universe.world();
        let rank = usize::try_from(world.rank())
            .map_err(|_| SetupError::InvalidConfig(format!("negative MPI rank {}", world.rank())))?;
        let size = usize::try_from(world.size())
            .map_err(|_| SetupError::InvalidConfig(format!("invalid MPI world size {}", world.size())))?;

        tracing::debug!(rank, size, "MPI initialized");
        Ok(Self {
            world,
            rank,
            size,
            _universe: universe,
        })
    }

    fn mpi_rank(&self, rank: usize, what: &str) -> Result<mpi::Rank> {
        if rank >= self.size {
            return Err(SetupError::protocol(
                self.rank,
                format!("{} rank {} outside group of {}", what, rank, self.size),
            ));
        }
        mpi::Rank::try_from(rank).map_err(|_| SetupError::protocol(self.rank, format!("rank {} exceeds MPI range", rank)))
    }

    fn decode<T: Payload>(&self, words: &[u64]) -> Result<Vec<T>> {
        decode_all(words).ok_or_else(|| {
            SetupError::protocol(
                self.rank,
                format!(
                    "{} words do not hold whole values of {}",
                    words.len(),
                    std::any::type_name::<T>()
                ),
            )
        })
    }
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send<T: Payload>(&self, dest: usize, tag: u32, data: Vec<T>) -> Result<()> {
        let dest = self.mpi_rank(dest, "destination")?;
        let tag = mpi::Tag::try_from(tag).map_err(|_| SetupError::protocol(self.rank, format!("tag {} too large", tag)))?;
        let words = encode_all(&data);
        tracing::trace!(rank = self.rank, dest, tag, words = words.len(), "send");
        self.world.process_at_rank(dest).send_with_tag(&words[..], tag);
        Ok(())
    }

    fn recv<T: Payload>(&self, source: usize, tag: u32) -> Result<Vec<T>> {
        let source = self.mpi_rank(source, "source")?;
        let tag = mpi::Tag::try_from(tag).map_err(|_| SetupError::protocol(self.rank, format!("tag {} too large", tag)))?;
        let (words, _status) = self.world.process_at_rank(source).receive_vec_with_tag::<u64>(tag);
        self.decode(&words)
    }

    fn broadcast<T: Payload + Clone>(&self, value: Option<T>, root: usize) -> Result<T> {
        let root_process = self.world.process_at_rank(self.mpi_rank(root, "root")?);

        let mut words = match (self.rank == root, value) {
            (true, Some(value)) => encode_all(std::slice::from_ref(&value)),
            (true, None) => return Err(SetupError::protocol(self.rank, "broadcast root has no value")),
            (false, _) => Vec::new(),
        };
        let mut len = words.len() as u64;
        root_process.broadcast_into(&mut len);
        words.resize(len as usize, 0);
        root_process.broadcast_into(&mut words[..]);

        let mut values = self.decode::<T>(&words)?;
        match (values.pop(), values.is_empty()) {
            (Some(value), true) => Ok(value),
            _ => Err(SetupError::protocol(self.rank, "broadcast expects exactly one value")),
        }
    }

    fn scatter<T: Payload>(&self, chunks: Option<Vec<Vec<T>>>, root: usize) -> Result<Vec<T>> {
        let root_process = self.world.process_at_rank(self.mpi_rank(root, "root")?);
        let mut count: mpi::Count = 0;

        let words = if self.rank == root {
            let chunks = chunks.ok_or_else(|| SetupError::protocol(self.rank, "scatter root has no data"))?;
            if chunks.len() != self.size {
                return Err(SetupError::protocol(
                    self.rank,
                    format!("scatter needs {} chunks, got {}", self.size, chunks.len()),
                ));
            }
            let encoded: Vec<Vec<u64>> = chunks.iter().map(|chunk| encode_all(chunk)).collect();
            let (counts, displs) = counts_and_displacements(encoded.iter().map(Vec::len))?;
            let flat = encoded.concat();

            root_process.scatter_into_root(&counts[..], &mut count);
            let mut words = vec![0u64; count as usize];
            let partition = Partition::new(&flat[..], &counts[..], &displs[..]);
            root_process.scatter_varcount_into_root(&partition, &mut words[..]);
            words
        } else {
            root_process.scatter_into(&mut count);
            let mut words = vec![0u64; count as usize];
            root_process.scatter_varcount_into(&mut words[..]);
            words
        };

        self.decode(&words)
    }

    fn all_to_allv<T: Payload>(&self, outgoing: Vec<Vec<T>>) -> Result<Vec<Vec<T>>> {
        if outgoing.len() != self.size {
            return Err(SetupError::protocol(
                self.rank,
                format!("all_to_allv needs {} chunks, got {}", self.size, outgoing.len()),
            ));
        }

        let encoded: Vec<Vec<u64>> = outgoing.iter().map(|chunk| encode_all(chunk)).collect();
        let (send_counts, send_displs) = counts_and_displacements(encoded.iter().map(Vec::len))?;
        let flat = encoded.concat();

        let mut recv_counts: Vec<mpi::Count> = vec![0; self.size];
        self.world.all_to_all_into(&send_counts[..], &mut recv_counts[..]);
        let (recv_counts, recv_displs) = counts_and_displacements(recv_counts.iter().map(|&c| c.max(0) as usize))?;

        let total: usize = recv_counts.iter().map(|&c| c as usize).sum();
        let mut received = vec![0u64; total];
        {
            let send = Partition::new(&flat[..], &send_counts[..], &send_displs[..]);
            let mut recv = PartitionMut::new(&mut received[..], &recv_counts[..], &recv_displs[..]);
            self.world.all_to_all_varcount_into(&send, &mut recv);
        }

        recv_counts
            .iter()
            .zip(&recv_displs)
            .map(|(&count, &displ)| {
                let start = displ as usize;
                self.decode(&received[start..start + count as usize])
            })
            .collect()
    }

    fn barrier(&self) -> Result<()> {
        self.world.barrier();
        Ok(())
    }

    fn abort(&self, error: &SetupError) {
        tracing::error!(rank = self.rank, code = error.abort_code(), %error, "aborting MPI job");
        self.world.abort(error.abort_code())
    }
}
