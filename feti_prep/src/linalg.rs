/////////////////////////////////////////////////////////////////////////////////////////////
//
// Adds helper linear algebra routines: pivot-checked sparse interior factorisation and
// QR-based removal of redundant kernel columns.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # linalg
//!
//! Helper linear algebra functionality.
//!
//! [`InteriorSolver`] wraps a sparse LU factorisation with partial pivoting
//! and refuses to hand out a solver for a block that is singular relative to
//! its own scale, so a singular interior block surfaces as an error instead
//! of as silently inflated values.
//!
//! [`reduce_redundant_kernel`] detects linearly dependent columns of a
//! stacked pair of kernel bases from the diagonal of an unpivoted QR `R`
//! factor.

use faer::{
    linalg::solvers::Solve,
    sparse::{
        linalg::{solvers::Lu, LuError},
        SparseColMat,
    },
    Mat,
};

use crate::error::UnitError;
use feti_prep_utils::stack_rows;

/// Sparse LU factorisation of a square block that passed the singularity check.
pub struct InteriorSolver {
    lu: Lu<usize, f64>,
    dim: usize,
}

impl InteriorSolver {
    /// Factorises `a` with sparse LU and partial pivoting.
    ///
    /// The pivots of the sparse factor are not exposed, so singularity is
    /// detected in two places:
    ///
    /// - structurally, when elimination step `k` finds no candidate pivot
    ///   (`pivot_index = k`, `pivot = 0`);
    /// - numerically, by solving `A x = 1`. The smallest pivot magnitude is
    ///   bounded above by roughly `1 / max|x|`, so a block fails when `x` is
    ///   not finite or `1 / max|x| <= pivot_tolerance * max|a|`. `pivot_index`
    ///   is then the row of the largest entry of `x`.
    ///
    /// An all-zero block fails on pivot 0.
    pub fn factorise(a: &SparseColMat<usize, f64>, pivot_tolerance: f64) -> Result<Self, UnitError> {
        if a.nrows() != a.ncols() {
            return Err(UnitError::dimensions(
                "interior block columns",
                a.nrows(),
                a.ncols(),
            ));
        }

        let dim = a.nrows();
        let scale = a.val().iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
        let has_nan = a.val().iter().any(|v| v.is_nan());
        if dim > 0 && (scale == 0.0 || !scale.is_finite() || has_nan) {
            return Err(UnitError::SingularInteriorBlock {
                pivot_index: 0,
                pivot: scale,
            });
        }

        let lu = a.sp_lu().map_err(|err| match err {
            LuError::SymbolicSingular { index } => UnitError::SingularInteriorBlock {
                pivot_index: index,
                pivot: 0.0,
            },
            LuError::Generic(err) => UnitError::SparseAssembly {
                context: "interior LU factorisation".to_string(),
                detail: format!("{err:?}"),
            },
        })?;

        let ones = Mat::<f64>::from_fn(dim, 1, |_, _| 1.0);
        let x = lu.solve(&ones);

        let mut growth = (0usize, 0.0f64);
        for (row, &v) in x.col(0).iter().enumerate() {
            if !v.is_finite() {
                return Err(UnitError::SingularInteriorBlock {
                    pivot_index: row,
                    pivot: 0.0,
                });
            }
            if v.abs() > growth.1 {
                growth = (row, v.abs());
            }
        }

        if growth.1 > 0.0 {
            let pivot = 1.0 / growth.1;
            if pivot <= pivot_tolerance * scale {
                return Err(UnitError::SingularInteriorBlock {
                    pivot_index: growth.0,
                    pivot,
                });
            }
        }

        Ok(Self { lu, dim })
    }

    /// Order of the factorised block.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Solves `A X = rhs` for every column of `rhs`.
    ///
    /// Fails with [`UnitError::SingularInteriorBlock`] if the solution is not
    /// finite.
    pub fn solve(&self, rhs: &Mat<f64>) -> Result<Mat<f64>, UnitError> {
        let x = self.lu.solve(rhs);

        for j in 0..x.ncols() {
            if let Some(row) = x.col(j).iter().position(|v| !v.is_finite()) {
                return Err(UnitError::SingularInteriorBlock {
                    pivot_index: row,
                    pivot: 0.0,
                });
            }
        }

        Ok(x)
    }
}

/// Result of [`reduce_redundant_kernel`].
#[derive(Debug, Clone)]
pub struct KernelReduction {
    /// Rows of the reduced basis belonging to the first subdomain.
    pub first: Mat<f64>,

    /// Rows of the reduced basis belonging to the second subdomain.
    pub second: Mat<f64>,

    /// Number of columns of the stacked input.
    pub candidate_columns: usize,

    /// Number of columns kept.
    pub retained_columns: usize,

    /// `true` if a redundant column was found and the basis was replaced by
    /// orthonormal columns.
    pub reduced: bool,
}

/// Removes linearly dependent columns of `[first; second]`.
///
/// An unpivoted QR factorisation `[first; second] = Q R` is computed. Every
/// diagonal entry of `R` with `|r_ii| <= tolerance` flags a redundant
/// direction. Without flagged entries the inputs are returned unchanged.
/// Otherwise they are replaced by the thin-`Q` columns at the unflagged
/// diagonal positions, split back at the row boundary of `first`, so the
/// returned columns are orthonormal over the stacked rows.
pub fn reduce_redundant_kernel(
    first: Mat<f64>,
    second: Mat<f64>,
    tolerance: f64,
) -> Result<KernelReduction, UnitError> {
    if first.ncols() != second.ncols() {
        return Err(UnitError::dimensions(
            "kernel basis columns",
            first.ncols(),
            second.ncols(),
        ));
    }

    let candidate_columns = first.ncols();
    if candidate_columns == 0 {
        return Ok(KernelReduction {
            first,
            second,
            candidate_columns,
            retained_columns: 0,
            reduced: false,
        });
    }

    let split = first.nrows();
    let stacked = stack_rows(&first, &second);

    let qr = stacked.qr();
    let r = qr.thin_R();

    let diag_len = r.nrows().min(r.ncols());
    let retained: Vec<usize> = (0..diag_len)
        .filter(|&i| r.get(i, i).abs() > tolerance)
        .collect();

    if retained.len() == diag_len {
        return Ok(KernelReduction {
            first,
            second,
            candidate_columns,
            retained_columns: candidate_columns,
            reduced: false,
        });
    }

    let q = qr.compute_thin_Q();
    let first = Mat::from_fn(split, retained.len(), |i, j| q[(i, retained[j])]);
    let second = Mat::from_fn(stacked.nrows() - split, retained.len(), |i, j| {
        q[(split + i, retained[j])]
    });

    Ok(KernelReduction {
        first,
        second,
        candidate_columns,
        retained_columns: retained.len(),
        reduced: true,
    })
}
