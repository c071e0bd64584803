//! Triple (coordinate) storage for local matrix nonzeros

use std::fmt;

use crate::matrix::sort::radix_sort;

/// A single nonzero with global indices
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triple<T> {
    /// Global row index
    pub row: usize,
    /// Global column index
    pub col: usize,
    /// Numerical value
    pub value: T,
}

/// Nonzeros in triple format
///
/// Stored as three parallel arrays so that the radix sort can key on either
/// index array while the other two ride along. The arrays always have the
/// same length.
#[derive(Clone, PartialEq)]
pub struct Triples<T> {
    rows: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<T>,
}

impl<T: Copy> Triples<T> {
    /// Creates a triple container from parallel arrays
    ///
    /// # Panics
    ///
    /// Panics if the three arrays differ in length.
    pub fn new(rows: Vec<usize>, cols: Vec<usize>, values: Vec<T>) -> Self {
        assert_eq!(rows.len(), cols.len(), "rows.len() must equal cols.len()");
        assert_eq!(rows.len(), values.len(), "rows.len() must equal values.len()");

        Self { rows, cols, values }
    }

    /// Creates an empty container able to hold `capacity` nonzeros
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
            cols: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    /// Appends one nonzero
    pub fn push(&mut self, row: usize, col: usize, value: T) {
        self.rows.push(row);
        self.cols.push(col);
        self.values.push(value);
    }

    /// Number of nonzeros
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no nonzeros
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of nonzeros that fit without reallocating
    pub fn capacity(&self) -> usize {
        self.rows.capacity().min(self.cols.capacity()).min(self.values.capacity())
    }

    /// Row indices
    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    /// Column indices
    pub fn cols(&self) -> &[usize] {
        &self.cols
    }

    /// Values
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Returns the k'th nonzero
    pub fn get(&self, k: usize) -> Option<Triple<T>> {
        (k < self.len()).then(|| Triple {
            row: self.rows[k],
            col: self.cols[k],
            value: self.values[k],
        })
    }

    /// Iterates over the nonzeros in storage order
    pub fn iter(&self) -> impl Iterator<Item = Triple<T>> + '_ {
        self.rows
            .iter()
            .zip(&self.cols)
            .zip(&self.values)
            .map(|((&row, &col), &value)| Triple { row, col, value })
    }

    /// Splits into `(rows, cols, values)`
    pub fn into_parts(self) -> (Vec<usize>, Vec<usize>, Vec<T>) {
        (self.rows, self.cols, self.values)
    }

    /// Stable sort by row index; every row index must be `< n`
    pub fn sort_by_row(&mut self, n: usize, radix: usize) {
        radix_sort(n, &mut self.rows, &mut self.cols, &mut self.values, radix);
    }

    /// Stable sort by column index; every column index must be `< n`
    pub fn sort_by_col(&mut self, n: usize, radix: usize) {
        radix_sort(n, &mut self.cols, &mut self.rows, &mut self.values, radix);
    }

    /// Mutable access to the column array, used to relabel columns in place
    pub(crate) fn cols_mut(&mut self) -> &mut [usize] {
        &mut self.cols
    }
}

impl<T: Copy> FromIterator<Triple<T>> for Triples<T> {
    fn from_iter<I: IntoIterator<Item = Triple<T>>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut triples = Triples::with_capacity(iter.size_hint().0);
        for t in iter {
            triples.push(t.row, t.col, t.value);
        }
        triples
    }
}

impl<T: fmt::Debug + Copy> fmt::Debug for Triples<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Triples {{")?;
        writeln!(f, "  nz: {}", self.len())?;

        let max_to_print = 5.min(self.len());
        for k in 0..max_to_print {
            writeln!(f, "    ({}, {}, {:?})", self.rows[k], self.cols[k], self.values[k])?;
        }
        if self.len() > max_to_print {
            writeln!(f, "    ... ({} more)", self.len() - max_to_print)?;
        }

        write!(f, "}}")
    }
}
