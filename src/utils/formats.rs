//! Bridges between our storage formats and sprs, used for reference products

use ndarray::Array1;
use num_traits::Num;
use sprs::{CsMat, TriMat};

use crate::matrix::{Icrs, Triples};

/// Converts a local ICRS block to a sprs CSR matrix over local indices
///
/// The result has `nrows` rows and `ncols` columns.
pub fn icrs_to_sprs<T>(matrix: &Icrs<T>) -> CsMat<T>
where
    T: Copy + Num + Default,
{
    let mut indptr = vec![0; matrix.nrows() + 1];
    let mut indices = Vec::with_capacity(matrix.nnz());
    let mut data = Vec::with_capacity(matrix.nnz());

    for (i, j, value) in matrix.local_entries() {
        indptr[i + 1] += 1;
        indices.push(j);
        data.push(value);
    }
    for i in 0..matrix.nrows() {
        indptr[i + 1] += indptr[i];
    }

    CsMat::new((matrix.nrows(), matrix.ncols()), indptr, indices, data)
}

/// Builds an `n x n` CSR matrix from triples with global indices
///
/// Duplicate entries are summed.
pub fn triples_to_sprs(n: usize, triples: &Triples<f64>) -> CsMat<f64> {
    TriMat::from_triplets(
        (n, n),
        triples.rows().to_vec(),
        triples.cols().to_vec(),
        triples.values().to_vec(),
    )
    .to_csr()
}

/// Sequential `A v` for checking distributed products
pub fn reference_matvec(n: usize, triples: &Triples<f64>, v: &Array1<f64>) -> Array1<f64> {
    let a = triples_to_sprs(n, triples);
    &a * v
}
