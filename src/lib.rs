//! # icrs-dist: distributed setup of sparse matrix-vector products
//!
//! Prepares a sparse matrix and two vectors for the product `u = A v` on a
//! group of `p` processes, as in bulk synchronous parallel SpMV codes.
//!
//! ## Overview
//!
//! Input comes from three distribution files read by a single root process:
//!
//! - a matrix file with the nonzeros of `A` and a partition of them over the
//!   processes
//! - two vector files telling which process owns each component of `v` and `u`
//!
//! ## Setup Components
//!
//! 1. **Matrix loading**: root streams each process its share of nonzeros,
//!    never buffering more than one share
//!
//! 2. **Local conversion**:
//!    - **Radix sort**: two stable bucket sort passes with radix about `sqrt(n)`
//!    - **ICRS**: the local block is stored with local row and column
//!      numbering and column increments
//!
//! 3. **Vector index resolution**: root reads the vector files in batches and
//!    the owners learn the global index of each local slot
//!
//! 4. **Communication schedule**: every process learns where its `v`
//!    components come from and where its partial sums of `u` go
//!
//! ## Usage
//!
//! ```
//! use std::io::Cursor;
//! use icrs_dist::{Communicator, DistributedSpmv, DistributionReader, LocalGroup, SetupConfig, SetupSources};
//!
//! let group = LocalGroup::new(2).unwrap();
//! let config = SetupConfig::for_processes(2);
//!
//! let u = group
//!     .run(|comm| {
//!         let sources = (comm.rank() == 0).then(|| SetupSources {
//!             matrix: DistributionReader::new(Cursor::new("2 2 2 2\n0\n1\n2\n1 1 2.0\n2 2 3.0\n")),
//!             v: DistributionReader::new(Cursor::new("2 2\n1 1\n2 2\n")),
//!             u: DistributionReader::new(Cursor::new("2 2\n1 1\n2 2\n")),
//!         });
//!         let spmv = DistributedSpmv::setup(comm, sources, &config)?;
//!
//!         let v: Vec<f64> = spmv.v().vindex().iter().map(|&g| (g + 1) as f64).collect();
//!         let mut u = vec![0.0; spmv.u().nv()];
//!         spmv.multiply(comm, &v, &mut u)?;
//!         Ok(u)
//!     })
//!     .unwrap();
//!
//! assert_eq!(u, vec![vec![2.0], vec![6.0]]);
//! ```

pub mod comm;
pub mod config;
pub mod distribution;
pub mod error;
pub mod matrix;
pub mod setup;
pub mod spmv;
pub mod utils;

// Re-export primary components
pub use comm::{Communicator, Exchange, LocalComm, LocalGroup, Payload};
#[cfg(feature = "mpi")]
pub use comm::MpiComm;
pub use config::{SetupConfig, DEFAULT_ITERATIONS};
pub use distribution::{
    load_matrix, load_matrix_file, resolve_vector, resolve_vector_file, DistributionReader, LocalMatrix,
    PartitionPlan, VectorDistribution,
};
pub use error::{ErrorKind, FileKind, Result, SetupError};
pub use matrix::{choose_radix, key, radix_sort, stable_bucket_sort, Icrs, KeyMode, Triple, Triples};
pub use setup::{DistributedSpmv, SetupSources};
pub use spmv::{CommSchedule, DirectoryScheduleBuilder, IcrsKernel, MultiplyKernel, ScheduleBuilder};
pub use utils::{icrs_to_sprs, reference_matvec, triples_to_sprs};

/// Version information for the icrs-dist library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
