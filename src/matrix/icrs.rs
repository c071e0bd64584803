//! Incremental Compressed Row Storage (ICRS) with local indices

use std::fmt;
use num_traits::Num;

use crate::matrix::sort::choose_radix;
use crate::matrix::triple::{Triple, Triples};

/// A local sparse matrix block in ICRS format
///
/// Only the nonempty rows and columns of the block get a local index:
/// - rowindex: global index of each local row, strictly increasing
/// - colindex: global index of each local column, strictly increasing
/// - values: nonzeros sorted by row, ties decided by column
/// - inc: column increments, one per nonzero plus a closing sentinel
///
/// `inc[k]` is the local column of nonzero `k` minus that of nonzero `k-1`
/// when both are in the same row; when `k > 0` starts a new row, `ncols` is
/// added. The column of the virtual nonzero `-1` is 0. The sentinel
/// `inc[nz]` brings the running column to exactly `ncols`, which ends the
/// last row.
#[derive(Clone, PartialEq)]
pub struct Icrs<T> {
    n: usize,
    rowindex: Vec<usize>,
    colindex: Vec<usize>,
    values: Vec<T>,
    inc: Vec<usize>,
}

impl<T: Copy> Icrs<T> {
    /// Converts triples with global indices into ICRS with local indices
    ///
    /// Needs time and memory O(nz + sqrt(n)).
    ///
    /// # Arguments
    ///
    /// * `n` - Global matrix dimension; every index in `triples` must be `< n`
    /// * `triples` - Local nonzeros in arbitrary order
    pub fn from_triples(n: usize, mut triples: Triples<T>) -> Self {
        let radix = choose_radix(n);

        // Sort nonzeros by column index
        triples.sort_by_col(n, radix);

        // Register local columns and relabel the nonzeros with them
        let mut colindex = Vec::new();
        for col in triples.cols_mut() {
            let jglob = *col;
            if colindex.last() != Some(&jglob) {
                colindex.push(jglob);
            }
            *col = colindex.len() - 1;
        }
        let ncols = colindex.len();

        // Sort by row; local columns stay ascending within each row
        triples.sort_by_row(n, radix);

        let (rows, cols, values) = triples.into_parts();
        let nz = values.len();

        let mut rowindex = Vec::new();
        let mut inc = Vec::with_capacity(nz + 1);
        for k in 0..nz {
            let new_row = rowindex.last() != Some(&rows[k]);
            if new_row {
                rowindex.push(rows[k]);
            }

            let inck = if k == 0 {
                cols[0]
            } else if new_row {
                // cols[k] - cols[k-1] + ncols >= 1
                cols[k] + ncols - cols[k - 1]
            } else {
                cols[k] - cols[k - 1]
            };
            inc.push(inck);
        }
        inc.push(if nz == 0 { 0 } else { ncols - cols[nz - 1] });

        Self {
            n,
            rowindex,
            colindex,
            values,
            inc,
        }
    }

    /// Global matrix dimension
    pub fn n(&self) -> usize {
        self.n
    }

    /// Number of nonzeros
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Number of nonempty local rows
    pub fn nrows(&self) -> usize {
        self.rowindex.len()
    }

    /// Number of nonempty local columns
    pub fn ncols(&self) -> usize {
        self.colindex.len()
    }

    /// Global index of each local row
    pub fn rowindex(&self) -> &[usize] {
        &self.rowindex
    }

    /// Global index of each local column
    pub fn colindex(&self) -> &[usize] {
        &self.colindex
    }

    /// Values in row-major order
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Column increments including the closing sentinel (length `nnz + 1`)
    pub fn inc(&self) -> &[usize] {
        &self.inc
    }

    /// Iterates over `(local_row, local_col, value)` by undoing the increments
    pub fn local_entries(&self) -> LocalEntries<'_, T> {
        LocalEntries {
            matrix: self,
            k: 0,
            row: 0,
            col: self.inc[0],
        }
    }

    /// Iterates over the nonzeros with global indices
    pub fn iter(&self) -> impl Iterator<Item = Triple<T>> + '_ {
        self.local_entries().map(move |(i, j, value)| Triple {
            row: self.rowindex[i],
            col: self.colindex[j],
            value,
        })
    }

    /// Converts back to triples with global indices in row-major order
    pub fn to_triples(&self) -> Triples<T> {
        self.iter().collect()
    }
}

impl<T: Copy + Num> Icrs<T> {
    /// Local product `u = A v` over local indices
    ///
    /// `v` holds one entry per local column and the result one entry per
    /// local row.
    ///
    /// # Panics
    ///
    /// Panics if `v.len() != ncols`.
    pub fn local_product(&self, v: &[T]) -> Vec<T> {
        let ncols = self.ncols();
        assert_eq!(v.len(), ncols, "input length must equal the number of local columns");

        let mut u = Vec::with_capacity(self.nrows());
        let mut k = 0;
        let mut j = self.inc[0];
        for _ in 0..self.nrows() {
            let mut sum = T::zero();
            while j < ncols {
                sum = sum + self.values[k] * v[j];
                k += 1;
                j += self.inc[k];
            }
            u.push(sum);
            j -= ncols;
        }
        u
    }
}

/// Iterator decoding an [`Icrs`] into local coordinates
pub struct LocalEntries<'a, T> {
    matrix: &'a Icrs<T>,
    k: usize,
    row: usize,
    col: usize,
}

impl<'a, T: Copy> Iterator for LocalEntries<'a, T> {
    type Item = (usize, usize, T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.k >= self.matrix.nnz() {
            return None;
        }

        let ncols = self.matrix.ncols();
        while self.col >= ncols {
            self.col -= ncols;
            self.row += 1;
        }

        let item = (self.row, self.col, self.matrix.values[self.k]);
        self.k += 1;
        self.col += self.matrix.inc[self.k];
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.matrix.nnz() - self.k;
        (remaining, Some(remaining))
    }
}

impl<T: fmt::Debug + Copy> fmt::Debug for Icrs<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Icrs {{")?;
        writeln!(f, "  n: {}", self.n)?;
        writeln!(f, "  local: {} rows × {} cols", self.nrows(), self.ncols())?;
        writeln!(f, "  nnz: {}", self.nnz())?;

        let max_to_print = 5.min(self.nnz());
        if max_to_print > 0 {
            writeln!(f, "  content sample:")?;
            for t in self.iter().take(max_to_print) {
                writeln!(f, "    ({}, {}) = {:?}", t.row, t.col, t.value)?;
            }
            if self.nnz() > max_to_print {
                writeln!(f, "    ... ({} more)", self.nnz() - max_to_print)?;
            }
        }

        write!(f, "}}")
    }
}
