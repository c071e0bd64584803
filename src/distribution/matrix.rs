//! Distributed loading of matrix nonzeros
//!
//! The matrix distribution file contains one line
//!
//! ```text
//! rows cols nonzeros processes
//! ```
//!
//! followed by `processes + 1` partition starts `Pstart[0..=p]`, meaning that
//! process `q` gets the nonzeros numbered `Pstart[q]..Pstart[q+1]`, followed by
//! `nonzeros` lines `row col value` with 1-based indices.
//!
//! Root reads the nonzeros of one process at a time and sends them off before
//! reading the next share, so its buffer never holds more than the largest
//! share.

use std::io::BufRead;
use std::path::Path;

use crate::comm::Communicator;
use crate::config::SetupConfig;
use crate::distribution::reader::DistributionReader;
use crate::distribution::{expect_root_source, open_on_root};
use crate::error::{FileKind, Result, SetupError};
use crate::matrix::{Icrs, Triples};

const TAG_ROWS: u32 = 0;
const TAG_COLS: u32 = 1;
const TAG_VALUES: u32 = 2;

/// First line of a matrix distribution file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixHeader {
    /// Number of rows
    pub rows: usize,
    /// Number of columns
    pub cols: usize,
    /// Total number of nonzeros
    pub nonzeros: usize,
    /// Number of processes the matrix is distributed over
    pub processes: usize,
}

/// Assignment of consecutive nonzeros to processes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    starts: Vec<usize>,
}

impl PartitionPlan {
    /// Validates partition starts for `nonzeros` nonzeros
    ///
    /// The starts must begin at 0, never decrease and end at `nonzeros`.
    pub fn new(starts: Vec<usize>, nonzeros: usize) -> Result<Self> {
        if starts.len() < 2 {
            return Err(SetupError::InvalidPartition(format!(
                "need at least 2 starts, got {}",
                starts.len()
            )));
        }
        if starts[0] != 0 {
            return Err(SetupError::InvalidPartition(format!(
                "first start is {}, must be 0",
                starts[0]
            )));
        }
        if let Some(q) = starts.windows(2).position(|w| w[0] > w[1]) {
            return Err(SetupError::InvalidPartition(format!(
                "start of process {} ({}) exceeds start of process {} ({})",
                q,
                starts[q],
                q + 1,
                starts[q + 1]
            )));
        }
        let last = starts[starts.len() - 1];
        if last != nonzeros {
            return Err(SetupError::InvalidPartition(format!(
                "last start is {}, matrix has {} nonzeros",
                last, nonzeros
            )));
        }
        Ok(Self { starts })
    }

    /// Number of processes
    pub fn processes(&self) -> usize {
        self.starts.len() - 1
    }

    /// Partition starts `Pstart[0..=p]`
    pub fn starts(&self) -> &[usize] {
        &self.starts
    }

    /// Number of nonzeros of process `q`
    pub fn count(&self, q: usize) -> usize {
        self.starts[q + 1] - self.starts[q]
    }

    /// Number of nonzeros of every process
    pub fn counts(&self) -> Vec<usize> {
        self.starts.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Largest share of any process
    pub fn max_count(&self) -> usize {
        self.starts.windows(2).map(|w| w[1] - w[0]).max().unwrap_or(0)
    }
}

/// The nonzeros a process owns after loading
#[derive(Debug, Clone)]
pub struct LocalMatrix {
    /// Global matrix dimension
    pub n: usize,
    /// Local nonzeros with 0-based global indices, in file order
    pub triples: Triples<f64>,
    /// Largest number of nonzeros root buffered for another process (0 elsewhere)
    pub staging_peak: usize,
}

impl LocalMatrix {
    /// Number of local nonzeros
    pub fn nnz(&self) -> usize {
        self.triples.len()
    }

    /// Converts the local nonzeros to ICRS
    pub fn into_icrs(self) -> Icrs<f64> {
        Icrs::from_triples(self.n, self.triples)
    }
}

/// Reads and validates the header and partition plan
pub fn read_matrix_header<R: BufRead>(
    reader: &mut DistributionReader<R>,
    p: usize,
) -> Result<(MatrixHeader, PartitionPlan)> {
    let header = MatrixHeader {
        rows: reader.next_usize("row count")?,
        cols: reader.next_usize("column count")?,
        nonzeros: reader.next_usize("nonzero count")?,
        processes: reader.next_usize("process count")?,
    };

    if header.processes != p {
        return Err(SetupError::ProcessCountMismatch {
            file: FileKind::Matrix,
            declared: header.processes,
            actual: p,
        });
    }
    if header.rows != header.cols {
        return Err(SetupError::NonSquareMatrix {
            rows: header.rows,
            cols: header.cols,
        });
    }

    let starts = (0..=p)
        .map(|_| reader.next_usize("partition start"))
        .collect::<Result<Vec<_>>>()?;
    let plan = PartitionPlan::new(starts, header.nonzeros)?;

    Ok((header, plan))
}

/// Appends the next `count` nonzeros of the file to `out`, converting to 0-based indices
fn read_share<R: BufRead>(
    reader: &mut DistributionReader<R>,
    n: usize,
    count: usize,
    out: &mut Triples<f64>,
) -> Result<()> {
    for _ in 0..count {
        let row = reader.next_index("row index", n)?;
        let col = reader.next_index("column index", n)?;
        let value = reader.next_f64("value")?;
        out.push(row, col, value);
    }
    Ok(())
}

/// Loads the matrix and hands every process its nonzeros
///
/// Must be called by every process of the group. `source` must be `Some`
/// exactly on `config.root`.
///
/// # Returns
///
/// The global dimension and the nonzeros owned by this process.
pub fn load_matrix<C, R>(
    comm: &C,
    source: Option<DistributionReader<R>>,
    config: &SetupConfig,
) -> Result<LocalMatrix>
where
    C: Communicator,
    R: BufRead,
{
    config.validate(comm.size())?;
    let root = config.root;
    let p = comm.size();
    let mut source = expect_root_source(comm, source, root)?;

    let layout = match source.as_mut() {
        Some(reader) => {
            let (header, plan) = read_matrix_header(reader, p)?;
            tracing::info!(
                n = header.rows,
                nonzeros = header.nonzeros,
                processes = p,
                largest_share = plan.max_count(),
                "matrix header read"
            );
            Some((header, plan))
        }
        None => None,
    };

    let n = comm.broadcast(layout.as_ref().map(|(header, _)| header.rows), root)?;
    let nz = comm.scatter_value(layout.as_ref().map(|(_, plan)| plan.counts()), root)?;

    let (triples, staging_peak) = match (source.as_mut(), layout.as_ref()) {
        (Some(reader), Some((_, plan))) => {
            let mut triples = Triples::with_capacity(nz);
            let mut staging_peak = 0;

            // Shares appear in the file in process order
            for q in 0..p {
                if q == root {
                    read_share(reader, n, plan.count(q), &mut triples)?;
                    continue;
                }

                let mut staging = Triples::with_capacity(plan.count(q));
                read_share(reader, n, plan.count(q), &mut staging)?;
                staging_peak = staging_peak.max(staging.len());

                let (rows, cols, values) = staging.into_parts();
                comm.send(q, TAG_ROWS, rows)?;
                comm.send(q, TAG_COLS, cols)?;
                comm.send(q, TAG_VALUES, values)?;
                tracing::debug!(dest = q, nonzeros = plan.count(q), "matrix share sent");
            }
            (triples, staging_peak)
        }
        _ => {
            // Received buffers become the local triples directly
            let rows: Vec<usize> = comm.recv(root, TAG_ROWS)?;
            let cols: Vec<usize> = comm.recv(root, TAG_COLS)?;
            let values: Vec<f64> = comm.recv(root, TAG_VALUES)?;

            if rows.len() != nz || cols.len() != nz || values.len() != nz {
                return Err(SetupError::protocol(
                    comm.rank(),
                    format!(
                        "expected {} nonzeros, received {} rows, {} columns, {} values",
                        nz,
                        rows.len(),
                        cols.len(),
                        values.len()
                    ),
                ));
            }
            (Triples::new(rows, cols, values), 0)
        }
    };

    tracing::debug!(rank = comm.rank(), n, nonzeros = triples.len(), "matrix share loaded");

    Ok(LocalMatrix {
        n,
        triples,
        staging_peak,
    })
}

/// Loads the matrix from a file opened on root only
pub fn load_matrix_file<C, P>(comm: &C, path: P, config: &SetupConfig) -> Result<LocalMatrix>
where
    C: Communicator,
    P: AsRef<Path>,
{
    let source = open_on_root(comm, path, config.root)?;
    load_matrix(comm, source, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_partition_plan() {
        let plan = PartitionPlan::new(vec![0, 3, 3, 5], 5).unwrap();
        assert_eq!(plan.processes(), 3);
        assert_eq!(plan.counts(), vec![3, 0, 2]);
        assert_eq!(plan.count(2), 2);
        assert_eq!(plan.max_count(), 3);
    }

    #[test]
    fn test_invalid_partition_plans() {
        assert!(PartitionPlan::new(vec![1, 3, 5], 5).is_err());
        assert!(PartitionPlan::new(vec![0, 4, 3], 3).is_err());
        assert!(PartitionPlan::new(vec![0, 3, 4], 5).is_err());
        assert!(PartitionPlan::new(vec![0], 0).is_err());
    }

    #[test]
    fn test_header_validation() {
        let mut reader = DistributionReader::new(Cursor::new("4 4 5 3\n0\n3\n5\n"));
        assert!(matches!(
            read_matrix_header(&mut reader, 2),
            Err(SetupError::ProcessCountMismatch {
                file: FileKind::Matrix,
                declared: 3,
                actual: 2
            })
        ));

        let mut reader = DistributionReader::new(Cursor::new("4 5 5 2\n0\n3\n5\n"));
        assert!(matches!(
            read_matrix_header(&mut reader, 2),
            Err(SetupError::NonSquareMatrix { rows: 4, cols: 5 })
        ));

        let mut reader = DistributionReader::new(Cursor::new("4 4 5 2\n0\n3\n5\n"));
        let (header, plan) = read_matrix_header(&mut reader, 2).unwrap();
        assert_eq!(header.nonzeros, 5);
        assert_eq!(plan.counts(), vec![3, 2]);
    }
}
