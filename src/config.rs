//! Configuration for distributed setup

use crate::error::{Result, SetupError};
use crate::utils::ceil_div;

/// Number of products the driver runs by default
pub const DEFAULT_ITERATIONS: usize = 1000;

/// Configuration shared by every process of the group
///
/// Every process must use the same configuration; it determines batch sizes
/// and therefore the shape of the collective operations.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupConfig {
    /// Rank that reads the distribution files
    pub root: usize,

    /// Number of vector components read per batch
    /// If None, `ceil(n / p)` is used
    pub vector_batch: Option<usize>,

    /// Number of products the driver performs
    pub iterations: usize,

    /// Number of processes the driver starts
    pub processes: usize,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            root: 0,
            vector_batch: None,
            iterations: DEFAULT_ITERATIONS,
            processes: num_cpus::get(),
        }
    }
}

impl SetupConfig {
    /// Configuration for a group of `processes` ranks
    pub fn for_processes(processes: usize) -> Self {
        Self {
            processes,
            ..Self::default()
        }
    }

    /// Sets the reading rank
    pub fn with_root(mut self, root: usize) -> Self {
        self.root = root;
        self
    }

    /// Sets the vector batch size
    pub fn with_vector_batch(mut self, batch: usize) -> Self {
        self.vector_batch = Some(batch);
        self
    }

    /// Sets the number of products
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Checks the configuration against a group of `size` processes
    pub fn validate(&self, size: usize) -> Result<()> {
        if self.root >= size {
            return Err(SetupError::InvalidConfig(format!(
                "root rank {} outside group of {}",
                self.root, size
            )));
        }
        if self.vector_batch == Some(0) {
            return Err(SetupError::InvalidConfig("vector batch size must be positive".to_string()));
        }
        Ok(())
    }

    /// Vector components read per batch for a vector of length `n` over `p` processes
    ///
    /// A configured batch is capped at `n`, so batch buffers never outgrow the
    /// vector. The result is at least 1.
    pub fn vector_batch_size(&self, n: usize, p: usize) -> usize {
        self.vector_batch
            .map_or_else(|| ceil_div(n, p), |batch| batch.min(n))
            .max(1)
    }
}
