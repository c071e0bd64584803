//! Error types for distributed setup
//!
//! Every error is fatal for the whole process group: the process that detects
//! it returns the error and the group is aborted, so that peers blocked in a
//! collective wake up with [`SetupError::Aborted`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`SetupError`]
pub type Result<T> = std::result::Result<T, SetupError>;

/// Which distribution file an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Matrix distribution file
    Matrix,
    /// Vector distribution file
    Vector,
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileKind::Matrix => write!(f, "matrix"),
            FileKind::Vector => write!(f, "vector"),
        }
    }
}

/// Coarse classification of [`SetupError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Process or dimension counts in a header do not fit the group or each other
    MalformedHeader,
    /// The designated reader could not open its input
    FileUnavailable,
    /// Vector indices are not contiguous and ascending, or an index has no owner
    DistributionInconsistency,
    /// A token could not be parsed or is out of range
    MalformedEntry,
    /// Message passing broke down or another process aborted the group
    Communication,
}

/// Errors that can occur while setting up the distributed product
#[derive(Error, Debug)]
pub enum SetupError {
    /// The input file could not be opened on the root process
    #[error("cannot open {}: {source}", path.display())]
    FileUnavailable {
        /// Path that was requested
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },

    /// Reading from an already opened input failed
    #[error("read error at line {line}: {source}")]
    Read {
        /// Line being read
        line: usize,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },

    /// Header declares a different number of processes than the group has
    #[error("{file} file is distributed over {declared} processes, group has {actual}")]
    ProcessCountMismatch {
        /// File carrying the header
        file: FileKind,
        /// Count in the header
        declared: usize,
        /// Size of the process group
        actual: usize,
    },

    /// Matrix is not square
    #[error("matrix must be square, got {rows} x {cols}")]
    NonSquareMatrix {
        /// Declared rows
        rows: usize,
        /// Declared columns
        cols: usize,
    },

    /// Partition plan violates `Pstart[0] = 0`, monotonicity or `Pstart[p] = nz`
    #[error("invalid partition plan: {0}")]
    InvalidPartition(String),

    /// Vector length does not match the matrix dimension
    #[error("vector has length {vector}, matrix dimension is {matrix}")]
    DimensionMismatch {
        /// Matrix dimension
        matrix: usize,
        /// Vector length
        vector: usize,
    },

    /// Vector file line carries an unexpected global index
    #[error("vector file out of order: expected index {expected}, found {found}")]
    DistributionInconsistency {
        /// 0-based index expected on this line
        expected: usize,
        /// 0-based index found
        found: usize,
    },

    /// A global index was looked up but nobody registered it
    #[error("global index {index} has no registered owner")]
    UnownedIndex {
        /// 0-based global index
        index: usize,
    },

    /// Unparsable or out of range token
    #[error("malformed entry at line {line}: {message}")]
    MalformedEntry {
        /// 1-based line number
        line: usize,
        /// Description of the problem
        message: String,
    },

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Processes disagree about the communication protocol
    #[error("protocol violation on rank {rank}: {message}")]
    ProtocolViolation {
        /// Rank that detected the violation
        rank: usize,
        /// Description of the problem
        message: String,
    },

    /// Another process aborted the group
    #[error("process group aborted by rank {origin}")]
    Aborted {
        /// Rank that raised the abort
        origin: usize,
    },
}

impl SetupError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SetupError::FileUnavailable { .. } => ErrorKind::FileUnavailable,
            SetupError::ProcessCountMismatch { .. }
            | SetupError::NonSquareMatrix { .. }
            | SetupError::InvalidPartition(_)
            | SetupError::DimensionMismatch { .. }
            | SetupError::InvalidConfig(_) => ErrorKind::MalformedHeader,
            SetupError::DistributionInconsistency { .. } | SetupError::UnownedIndex { .. } => {
                ErrorKind::DistributionInconsistency
            }
            SetupError::Read { .. } | SetupError::MalformedEntry { .. } => ErrorKind::MalformedEntry,
            SetupError::ProtocolViolation { .. } | SetupError::Aborted { .. } => {
                ErrorKind::Communication
            }
        }
    }

    /// Whether this error only reports that some other rank failed
    pub fn is_abort(&self) -> bool {
        matches!(self, SetupError::Aborted { .. })
    }

    /// Exit code used when the whole group terminates on this error
    pub fn abort_code(&self) -> i32 {
        match self {
            SetupError::ProcessCountMismatch { file: FileKind::Matrix, .. } => -8,
            SetupError::NonSquareMatrix { .. } => -9,
            SetupError::ProcessCountMismatch { file: FileKind::Vector, .. } => -10,
            SetupError::DistributionInconsistency { .. } => -11,
            SetupError::FileUnavailable { .. } => -2,
            SetupError::Read { .. } | SetupError::MalformedEntry { .. } => -3,
            SetupError::InvalidPartition(_)
            | SetupError::DimensionMismatch { .. }
            | SetupError::InvalidConfig(_)
            | SetupError::UnownedIndex { .. } => -4,
            SetupError::ProtocolViolation { .. } | SetupError::Aborted { .. } => -5,
        }
    }

    /// Process exit status: the magnitude of [`SetupError::abort_code`]
    ///
    /// Shells report negative exit codes modulo 256, so -8 would show up as
    /// 248. The driver exits with 8 instead.
    pub fn exit_status(&self) -> i32 {
        self.abort_code().abs()
    }

    pub(crate) fn malformed(line: usize, message: impl Into<String>) -> Self {
        SetupError::MalformedEntry {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn protocol(rank: usize, message: impl Into<String>) -> Self {
        SetupError::ProtocolViolation {
            rank,
            message: message.into(),
        }
    }
}
