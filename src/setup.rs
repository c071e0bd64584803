//! End-to-end setup of a distributed sparse matrix-vector product
//!
//! Setup runs once and consists of:
//!
//! 1. Loading the matrix nonzeros and converting the local block to ICRS
//! 2. Resolving the index tables of the input vector `v` and output vector `u`
//! 3. Building the communication schedule
//!
//! After setup, [`DistributedSpmv::multiply`] may be called any number of times.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::comm::Communicator;
use crate::config::SetupConfig;
use crate::distribution::{expect_root_source, load_matrix, resolve_vector, DistributionReader, VectorDistribution};
use crate::error::{Result, SetupError};
use crate::matrix::Icrs;
use crate::spmv::{CommSchedule, DirectoryScheduleBuilder, IcrsKernel, MultiplyKernel, ScheduleBuilder};

/// The three distribution files, held by root only
pub struct SetupSources<R> {
    /// Matrix distribution
    pub matrix: DistributionReader<R>,
    /// Distribution of the input vector `v`
    pub v: DistributionReader<R>,
    /// Distribution of the output vector `u`
    pub u: DistributionReader<R>,
}

impl SetupSources<BufReader<File>> {
    /// Opens all three files
    pub fn open<P: AsRef<Path>>(matrix: P, v: P, u: P) -> Result<Self> {
        Ok(Self {
            matrix: DistributionReader::open(matrix)?,
            v: DistributionReader::open(v)?,
            u: DistributionReader::open(u)?,
        })
    }
}

/// Everything one process needs to take part in distributed products
#[derive(Debug, Clone)]
pub struct DistributedSpmv {
    n: usize,
    matrix: Icrs<f64>,
    v: VectorDistribution,
    u: VectorDistribution,
    schedule: CommSchedule,
}

impl DistributedSpmv {
    /// Runs the setup with the directory schedule builder
    ///
    /// Must be called by every process of the group. `sources` must be `Some`
    /// exactly on `config.root`.
    pub fn setup<C, R>(comm: &C, sources: Option<SetupSources<R>>, config: &SetupConfig) -> Result<Self>
    where
        C: Communicator,
        R: BufRead,
    {
        Self::setup_with(comm, sources, config, &DirectoryScheduleBuilder)
    }

    /// Runs the setup with a custom schedule builder
    pub fn setup_with<C, R, B>(
        comm: &C,
        sources: Option<SetupSources<R>>,
        config: &SetupConfig,
        builder: &B,
    ) -> Result<Self>
    where
        C: Communicator,
        R: BufRead,
        B: ScheduleBuilder,
    {
        config.validate(comm.size())?;
        let (matrix_source, v_source, u_source) = match expect_root_source(comm, sources, config.root)? {
            Some(sources) => (Some(sources.matrix), Some(sources.v), Some(sources.u)),
            None => (None, None, None),
        };

        let local = load_matrix(comm, matrix_source, config)?;
        let n = local.n;
        let matrix = local.into_icrs();
        tracing::debug!(
            rank = comm.rank(),
            nrows = matrix.nrows(),
            ncols = matrix.ncols(),
            nonzeros = matrix.nnz(),
            "local block converted to ICRS"
        );

        let v = resolve_vector(comm, v_source, config)?;
        let u = resolve_vector(comm, u_source, config)?;
        // Every process sees the same broadcast lengths, so all of them stop here together
        for dist in [&v, &u] {
            if dist.n() != n {
                return Err(SetupError::DimensionMismatch {
                    matrix: n,
                    vector: dist.n(),
                });
            }
        }

        let schedule = builder.build(comm, n, matrix.rowindex(), matrix.colindex(), &v, &u)?;

        if comm.is_root(config.root) {
            tracing::info!(n, processes = comm.size(), "distributed product set up");
        }

        Ok(Self {
            n,
            matrix,
            v,
            u,
            schedule,
        })
    }

    /// Opens the files on root and runs [`DistributedSpmv::setup`]
    pub fn from_files<C, P>(comm: &C, matrix: P, v: P, u: P, config: &SetupConfig) -> Result<Self>
    where
        C: Communicator,
        P: AsRef<Path>,
    {
        let sources = if comm.is_root(config.root) {
            Some(SetupSources::open(matrix, v, u)?)
        } else {
            None
        };
        Self::setup(comm, sources, config)
    }

    /// Computes `u = A v` with the ICRS kernel
    ///
    /// `v` holds the components listed by [`DistributedSpmv::v`], and `u` the
    /// components listed by [`DistributedSpmv::u`].
    pub fn multiply<C: Communicator>(&self, comm: &C, v: &[f64], u: &mut [f64]) -> Result<()> {
        self.multiply_with(comm, &IcrsKernel, v, u)
    }

    /// Computes `u = A v` with a custom kernel
    pub fn multiply_with<C, K>(&self, comm: &C, kernel: &K, v: &[f64], u: &mut [f64]) -> Result<()>
    where
        C: Communicator,
        K: MultiplyKernel,
    {
        if v.len() != self.v.nv() || u.len() != self.u.nv() {
            return Err(SetupError::protocol(
                comm.rank(),
                format!(
                    "local vectors have {} and {} components, distribution owns {} and {}",
                    v.len(),
                    u.len(),
                    self.v.nv(),
                    self.u.nv()
                ),
            ));
        }
        kernel.multiply(comm, &self.matrix, &self.schedule, v, u)
    }

    /// Global dimension
    pub fn n(&self) -> usize {
        self.n
    }

    /// Local matrix block
    pub fn matrix(&self) -> &Icrs<f64> {
        &self.matrix
    }

    /// Local part of the input vector
    pub fn v(&self) -> &VectorDistribution {
        &self.v
    }

    /// Local part of the output vector
    pub fn u(&self) -> &VectorDistribution {
        &self.u
    }

    /// Communication schedule
    pub fn schedule(&self) -> &CommSchedule {
        &self.schedule
    }
}
