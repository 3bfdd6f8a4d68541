/////////////////////////////////////////////////////////////////////////////////////////////
//
// Defines the per-subdomain data owned by the store and validates its shape invariants.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # subdomain
//!
//! A [`Subdomain`] is one partition of the finite-element mesh, holding its
//! local stiffness system, its interface constraints and the basis of its
//! rigid-body (zero-energy) modes. Subdomain data is immutable once handed to
//! the store; everything computed from it is derived.

use faer::{sparse::SparseColMat, Mat};
use serde::{Deserialize, Serialize};

use crate::error::{UnitError, UnitId};

/// Identifies a subdomain by its cluster and its position within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubdomainId {
    pub cluster: usize,
    pub index: usize,
}

impl SubdomainId {
    pub fn new(cluster: usize, index: usize) -> Self {
        Self { cluster, index }
    }
}

impl From<SubdomainId> for UnitId {
    fn from(id: SubdomainId) -> Self {
        UnitId::Subdomain {
            cluster: id.cluster,
            subdomain: id.index,
        }
    }
}

/// Matrices and vectors describing a single subdomain.
#[derive(Debug, Clone)]
pub struct Subdomain {
    /// Position of the subdomain in the cluster layout.
    pub id: SubdomainId,

    /// Stiffness matrix, `n_dofs × n_dofs`.
    pub k: SparseColMat<usize, f64>,

    /// Regularized stiffness matrix, same shape as `k`. Passed through to the
    /// outer solver.
    pub k_reg: SparseColMat<usize, f64>,

    /// Corner constraint matrix, columns are local DOFs. Passed through to
    /// the outer solver.
    pub b0: SparseColMat<usize, f64>,

    /// Interface constraint matrix. Rows are global Lagrange multipliers,
    /// columns are local DOFs.
    pub b1: SparseColMat<usize, f64>,

    /// Kernel (rigid-body mode) basis, `n_dofs × kernel_dim`.
    pub r: Mat<f64>,

    /// Load vector.
    pub f: Vec<f64>,

    /// Constraint right-hand side contributions.
    pub c: Vec<f64>,

    /// Multiplicity weights.
    pub weight: Vec<f64>,

    /// Local indices associated with `weight`.
    pub index_weight: Vec<usize>,

    /// Externally supplied boundary Schur complement, only present when the
    /// run takes Dirichlet blocks from an external source.
    pub external_schur: Option<Mat<f64>>,
}

impl Subdomain {
    /// Returns a [`SubdomainBuilder`] for the three matrices every
    /// preprocessing stage needs.
    pub fn builder(
        id: SubdomainId,
        k: SparseColMat<usize, f64>,
        b1: SparseColMat<usize, f64>,
        r: Mat<f64>,
    ) -> SubdomainBuilder {
        SubdomainBuilder::new(id, k, b1, r)
    }

    /// Number of local degrees of freedom.
    #[inline]
    pub fn n_dofs(&self) -> usize {
        self.k.nrows()
    }

    /// Dimension of the kernel basis.
    #[inline]
    pub fn kernel_dim(&self) -> usize {
        self.r.ncols()
    }

    /// Checks every shape invariant of the subdomain.
    pub fn validate(&self) -> Result<(), UnitError> {
        let n = self.k.nrows();

        check("K columns", n, self.k.ncols())?;
        check("Kreg rows", n, self.k_reg.nrows())?;
        check("Kreg columns", n, self.k_reg.ncols())?;
        check("B0 columns", n, self.b0.ncols())?;
        check("B1 columns", n, self.b1.ncols())?;
        check("R rows", n, self.r.nrows())?;
        check("f length", n, self.f.len())?;
        check("c length", n, self.c.len())?;
        check("weight length", n, self.weight.len())?;
        check("index weight length", self.weight.len(), self.index_weight.len())?;

        if let Some(schur) = &self.external_schur {
            check("external Schur columns", schur.nrows(), schur.ncols())?;
        }

        Ok(())
    }
}

#[inline]
fn check(context: &str, expected: usize, found: usize) -> Result<(), UnitError> {
    if expected == found {
        Ok(())
    } else {
        Err(UnitError::dimensions(context, expected, found))
    }
}

/// Convenience builder for constructing a [`Subdomain`].
///
/// Optional data defaults to what a subdomain without loads or corner
/// constraints would carry: `Kreg = K`, an empty `B0` with `n_dofs` columns,
/// zero `f` and `c`, unit `weight`, and `index_weight = 0..n_dofs`.
pub struct SubdomainBuilder {
    id: SubdomainId,
    k: SparseColMat<usize, f64>,
    b1: SparseColMat<usize, f64>,
    r: Mat<f64>,
    k_reg: Option<SparseColMat<usize, f64>>,
    b0: Option<SparseColMat<usize, f64>>,
    f: Option<Vec<f64>>,
    c: Option<Vec<f64>>,
    weight: Option<Vec<f64>>,
    index_weight: Option<Vec<usize>>,
    external_schur: Option<Mat<f64>>,
}

impl SubdomainBuilder {
    fn new(
        id: SubdomainId,
        k: SparseColMat<usize, f64>,
        b1: SparseColMat<usize, f64>,
        r: Mat<f64>,
    ) -> Self {
        Self {
            id,
            k,
            b1,
            r,
            k_reg: None,
            b0: None,
            f: None,
            c: None,
            weight: None,
            index_weight: None,
            external_schur: None,
        }
    }

    /// Sets the regularized stiffness matrix.
    pub fn k_reg(mut self, k_reg: SparseColMat<usize, f64>) -> Self {
        self.k_reg = Some(k_reg);
        self
    }

    /// Sets the corner constraint matrix.
    pub fn b0(mut self, b0: SparseColMat<usize, f64>) -> Self {
        self.b0 = Some(b0);
        self
    }

    /// Sets the load vector.
    pub fn f(mut self, f: Vec<f64>) -> Self {
        self.f = Some(f);
        self
    }

    /// Sets the constraint right-hand side.
    pub fn c(mut self, c: Vec<f64>) -> Self {
        self.c = Some(c);
        self
    }

    /// Sets the multiplicity weights.
    pub fn weight(mut self, weight: Vec<f64>) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Sets the weight index vector.
    pub fn index_weight(mut self, index_weight: Vec<usize>) -> Self {
        self.index_weight = Some(index_weight);
        self
    }

    /// Attaches an externally computed boundary Schur complement.
    pub fn external_schur(mut self, schur: Mat<f64>) -> Self {
        self.external_schur = Some(schur);
        self
    }

    /// Builds the subdomain and validates its invariants.
    pub fn build(self) -> Result<Subdomain, UnitError> {
        let n = self.k.nrows();

        let b0 = match self.b0 {
            Some(b0) => b0,
            None => feti_prep_utils::sparse_from_entries(0, n, &[]).map_err(|detail| {
                UnitError::SparseAssembly {
                    context: "empty B0".to_string(),
                    detail,
                }
            })?,
        };

        let subdomain = Subdomain {
            id: self.id,
            k_reg: self.k_reg.unwrap_or_else(|| self.k.clone()),
            k: self.k,
            b0,
            b1: self.b1,
            r: self.r,
            f: self.f.unwrap_or_else(|| vec![0.0; n]),
            c: self.c.unwrap_or_else(|| vec![0.0; n]),
            weight: self.weight.unwrap_or_else(|| vec![1.0; n]),
            index_weight: self.index_weight.unwrap_or_else(|| (0..n).collect()),
            external_schur: self.external_schur,
        };

        subdomain.validate()?;

        Ok(subdomain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feti_prep_utils::{sparse_from_dense, sparse_from_entries, SparseEntry};

    fn identity(n: usize) -> SparseColMat<usize, f64> {
        let entries: Vec<SparseEntry> = (0..n).map(|i| SparseEntry::new(i, i, 1.0)).collect();
        sparse_from_entries(n, n, &entries).unwrap()
    }

    #[test]
    fn builder_fills_defaults() {
        let b1 = sparse_from_entries(2, 3, &[SparseEntry::new(0, 2, 1.0)]).unwrap();
        let subdomain = Subdomain::builder(SubdomainId::new(1, 4), identity(3), b1, Mat::zeros(3, 1))
            .build()
            .unwrap();

        assert_eq!(subdomain.n_dofs(), 3);
        assert_eq!(subdomain.kernel_dim(), 1);
        assert_eq!(subdomain.b0.nrows(), 0);
        assert_eq!(subdomain.b0.ncols(), 3);
        assert_eq!(subdomain.weight, vec![1.0; 3]);
        assert_eq!(subdomain.index_weight, vec![0, 1, 2]);
        assert_eq!(subdomain.k_reg.nrows(), 3);
    }

    #[test]
    fn kernel_rows_must_match_dofs() {
        let b1 = sparse_from_entries(1, 3, &[]).unwrap();
        let err = Subdomain::builder(SubdomainId::new(0, 0), identity(3), b1, Mat::zeros(2, 1))
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            UnitError::InconsistentDimensions {
                expected: 3,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn b1_columns_must_match_dofs() {
        let b1 = sparse_from_entries(1, 4, &[]).unwrap();
        let result = Subdomain::builder(SubdomainId::new(0, 0), identity(3), b1, Mat::zeros(3, 0)).build();
        assert!(result.is_err());
    }

    #[test]
    fn non_square_stiffness_is_rejected() {
        let k = sparse_from_dense(&Mat::from_fn(3, 2, |i, j| (i + j) as f64)).unwrap();
        let b1 = sparse_from_entries(1, 2, &[]).unwrap();
        let result = Subdomain::builder(SubdomainId::new(0, 0), k, b1, Mat::zeros(3, 0)).build();
        assert!(result.is_err());
    }

    #[test]
    fn index_weight_follows_weight_length() {
        let b1 = sparse_from_entries(1, 2, &[]).unwrap();
        let result = Subdomain::builder(SubdomainId::new(0, 0), identity(2), b1, Mat::zeros(2, 0))
            .index_weight(vec![0])
            .build();
        assert!(matches!(
            result,
            Err(UnitError::InconsistentDimensions {
                expected: 2,
                found: 1,
                ..
            })
        ));
    }
}
