/////////////////////////////////////////////////////////////////////////////////////////////
//
// Supplies general-purpose utilities for dense matrices and index sets.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use faer::Mat;

/// Returns an owned `Mat<T>` from a subset of row indices.
///
/// Row indices may repeat; each occurrence produces its own output row.
///
/// # Examples
///
/// ```
/// use faer::mat;
/// use feti_prep_utils::select_mat_rows;
///
/// let matrix = mat![
///     [0.0, 1.0],
///     [1.0, 1.0],
///     [2.0, 2.0],
///     [3.0, 3.0f64],
/// ];
///
/// let sub_matrix = select_mat_rows(&matrix, &[0usize, 2, 2]);
///
/// assert_eq!(
///     sub_matrix,
///     mat![
///         [0.0, 1.0],
///         [2.0, 2.0],
///         [2.0, 2.0f64],
///     ]
/// );
/// ```
#[inline(always)]
pub fn select_mat_rows<T>(existing_mat: &Mat<T>, row_indices: &[usize]) -> Mat<T>
where
    T: Clone,
{
    Mat::from_fn(row_indices.len(), existing_mat.ncols(), |i, j| {
        existing_mat.get(row_indices[i], j).clone()
    })
}

/// Stacks `top` over `bottom`.
///
/// # Panics
///
/// Panics if the two matrices have a different number of columns.
///
/// # Examples
///
/// ```
/// use faer::mat;
/// use feti_prep_utils::stack_rows;
///
/// let top = mat![[1.0, 2.0f64]];
/// let bottom = mat![[3.0, 4.0], [5.0, 6.0f64]];
///
/// assert_eq!(
///     stack_rows(&top, &bottom),
///     mat![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0f64]],
/// );
/// ```
#[inline(always)]
pub fn stack_rows<T>(top: &Mat<T>, bottom: &Mat<T>) -> Mat<T>
where
    T: Clone,
{
    assert!(
        top.ncols() == bottom.ncols(),
        "stacked matrices must have the same number of columns"
    );

    let split = top.nrows();

    Mat::from_fn(split + bottom.nrows(), top.ncols(), |i, j| {
        if i < split {
            top.get(i, j).clone()
        } else {
            bottom.get(i - split, j).clone()
        }
    })
}

/// Returns the indices in `[0, n)` that are not contained in `sorted_subset`.
///
/// `sorted_subset` must be sorted ascending; duplicates are tolerated.
///
/// # Examples
///
/// ```
/// use feti_prep_utils::complement_indices;
///
/// assert_eq!(complement_indices(6, &[0, 2, 2, 5]), vec![1, 3, 4]);
/// ```
pub fn complement_indices(n: usize, sorted_subset: &[usize]) -> Vec<usize> {
    let mut complement = Vec::with_capacity(n.saturating_sub(sorted_subset.len()));
    let mut cursor = sorted_subset.iter().peekable();

    for idx in 0..n {
        while cursor.next_if(|&&s| s < idx).is_some() {}

        if cursor.peek().is_some_and(|&&s| s == idx) {
            continue;
        }
        complement.push(idx);
    }

    complement
}

/// Largest absolute entry of a dense matrix, `0.0` for an empty matrix.
#[inline(always)]
pub fn max_abs(matrix: &Mat<f64>) -> f64 {
    let mut max_val = 0.0f64;
    for j in 0..matrix.ncols() {
        for i in 0..matrix.nrows() {
            max_val = max_val.max(matrix[(i, j)].abs());
        }
    }
    max_val
}

/// Returns `max |A - Aᵀ|` for a square matrix.
///
/// # Panics
///
/// Panics if the matrix is not square.
pub fn max_asymmetry(matrix: &Mat<f64>) -> f64 {
    assert!(matrix.nrows() == matrix.ncols(), "square matrix required");

    let n = matrix.nrows();
    let mut max_diff = 0.0f64;
    for j in 0..n {
        for i in (j + 1)..n {
            max_diff = max_diff.max((matrix[(i, j)] - matrix[(j, i)]).abs());
        }
    }
    max_diff
}
