/////////////////////////////////////////////////////////////////////////////////////////////
//
// Supplies helpers for inspecting and converting compressed sparse column matrices.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use faer::{
    sparse::{SparseColMat, Triplet},
    Mat,
};

/// A single `(row, col, value)` entry used to assemble sparse matrices.
pub type SparseEntry = Triplet<usize, usize, f64>;

/// Returns the sorted indices of the columns holding at least one nonzero value.
///
/// Explicitly stored zeros do not count.
///
/// # Examples
///
/// ```
/// use feti_prep_utils::{nonzero_columns, sparse_from_entries, SparseEntry};
///
/// let b = sparse_from_entries(
///     2,
///     5,
///     &[
///         SparseEntry::new(0, 3, 1.0),
///         SparseEntry::new(1, 1, -1.0),
///         SparseEntry::new(1, 3, 1.0),
///         SparseEntry::new(0, 4, 0.0),
///     ],
/// )
/// .unwrap();
///
/// assert_eq!(nonzero_columns(&b), vec![1, 3]);
/// ```
pub fn nonzero_columns(matrix: &SparseColMat<usize, f64>) -> Vec<usize> {
    (0..matrix.ncols())
        .filter(|&col| matrix.val_of_col(col).iter().any(|val| *val != 0.0))
        .collect()
}

/// Expands a sparse matrix into a dense one.
pub fn sparse_to_dense(matrix: &SparseColMat<usize, f64>) -> Mat<f64> {
    let mut dense = Mat::<f64>::zeros(matrix.nrows(), matrix.ncols());
    let symbolic = matrix.symbolic();

    for col in 0..matrix.ncols() {
        let row_indices = symbolic.row_idx_of_col_raw(col);
        let col_values = matrix.val_of_col(col);

        for (idx, &row) in row_indices.iter().enumerate() {
            dense[(row, col)] += col_values[idx];
        }
    }

    dense
}

/// Builds a sparse matrix from the nonzero entries of a dense one.
pub fn sparse_from_dense(matrix: &Mat<f64>) -> Result<SparseColMat<usize, f64>, String> {
    let mut entries = Vec::new();

    for col in 0..matrix.ncols() {
        for row in 0..matrix.nrows() {
            let val = matrix[(row, col)];
            if val != 0.0 {
                entries.push(SparseEntry::new(row, col, val));
            }
        }
    }

    sparse_from_entries(matrix.nrows(), matrix.ncols(), &entries)
}

/// Assembles a sparse matrix from `(row, col, value)` entries.
///
/// Duplicate entries are summed. The error carries a description of the
/// offending input, e.g. an entry outside the requested shape.
pub fn sparse_from_entries(
    nrows: usize,
    ncols: usize,
    entries: &[SparseEntry],
) -> Result<SparseColMat<usize, f64>, String> {
    SparseColMat::try_new_from_triplets(nrows, ncols, entries)
        .map_err(|e| format!("{nrows}x{ncols} assembly from {} entries: {e:?}", entries.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use equator::assert;
    use faer::mat;

    #[test]
    fn dense_round_trip_preserves_values() {
        let dense = mat![[1.0, 0.0, -2.0], [0.0, 0.0, 3.5f64]];
        let sparse = sparse_from_dense(&dense).unwrap();

        assert!(sparse.nrows() == 2);
        assert!(sparse.ncols() == 3);
        assert!(sparse_to_dense(&sparse) == dense);
    }

    #[test]
    fn duplicate_entries_are_summed() {
        let sparse = sparse_from_entries(
            1,
            2,
            &[
                SparseEntry::new(0, 1, 1.5),
                SparseEntry::new(0, 1, 2.0),
                SparseEntry::new(0, 0, -1.0),
            ],
        )
        .unwrap();

        assert!(sparse_to_dense(&sparse) == mat![[-1.0, 3.5f64]]);
    }

    #[test]
    fn out_of_bounds_entry_is_rejected() {
        let result = sparse_from_entries(2, 2, &[SparseEntry::new(2, 0, 1.0)]);
        assert!(result.is_err());
    }

    #[test]
    fn empty_matrix_has_no_nonzero_columns() {
        let sparse = sparse_from_entries(0, 4, &[]).unwrap();
        assert!(nonzero_columns(&sparse).is_empty());
        assert!(sparse_to_dense(&sparse).ncols() == 4);
    }
}
