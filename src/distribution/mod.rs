//! Reading distribution files and handing their contents to the owning processes
//!
//! Only the root process reads. Loaders therefore take an
//! `Option<DistributionReader>` that must be `Some` exactly on root; every
//! other process takes part in the collective operations and receives its
//! share.

pub mod matrix;
pub mod reader;
pub mod vector;

pub use matrix::{load_matrix, load_matrix_file, LocalMatrix, MatrixHeader, PartitionPlan};
pub use reader::DistributionReader;
pub use vector::{resolve_vector, resolve_vector_file, VectorDistribution};

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::comm::Communicator;
use crate::error::{Result, SetupError};

/// Checks that the input is held by root and by nobody else
pub(crate) fn expect_root_source<C: Communicator, S>(comm: &C, source: Option<S>, root: usize) -> Result<Option<S>> {
    match (comm.is_root(root), source.is_some()) {
        (true, true) | (false, false) => Ok(source),
        (true, false) => Err(SetupError::protocol(comm.rank(), "root process has no input to read")),
        (false, true) => Err(SetupError::protocol(
            comm.rank(),
            format!("only rank {} may read the input", root),
        )),
    }
}

/// Opens `path` on root; other processes get `None`
pub fn open_on_root<C: Communicator, P: AsRef<Path>>(
    comm: &C,
    path: P,
    root: usize,
) -> Result<Option<DistributionReader<BufReader<File>>>> {
    if comm.is_root(root) {
        DistributionReader::open(path).map(Some)
    } else {
        Ok(None)
    }
}
