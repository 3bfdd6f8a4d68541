/////////////////////////////////////////////////////////////////////////////////////////////
//
// Builds the Dirichlet preconditioner of a subdomain by static condensation of its stiffness
// matrix onto the interface degrees of freedom.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # dirichlet
//!
//! The Dirichlet preconditioner of a subdomain is the Schur complement of its
//! stiffness matrix on the boundary DOFs `J` (the columns of `B1` holding a
//! nonzero), eliminating the interior DOFs `I`:
//!
//! ```text
//! S = K_JJ - K_IJᵀ K_II⁻¹ K_IJ
//! ```
//!
//! Each subdomain is processed independently, so the builder is a pure
//! function of the subdomain and the parameters.

use faer::Mat;
use serde::{Deserialize, Serialize};

use crate::{config::Params, error::UnitError, linalg::InteriorSolver, subdomain::Subdomain};
use feti_prep_utils::{complement_indices, nonzero_columns, sparse_from_entries, SparseEntry};

/// Boundary DOFs of a subdomain and the Schur complement on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirichletPreconditioner {
    /// Sorted, distinct local DOFs touched by the interface constraints.
    pub boundary_dofs: Vec<usize>,

    /// Dense `|J| × |J|` Schur complement.
    pub schur: Mat<f64>,
}

/// Computes the Dirichlet preconditioner of `subdomain`.
///
/// With `params.dirichlet_from_external_source` the Schur complement is taken
/// from [`Subdomain::external_schur`] instead of being computed. The boundary
/// DOFs are derived from `B1` in both cases.
pub fn compute_dirichlet(
    subdomain: &Subdomain,
    params: &Params,
) -> Result<DirichletPreconditioner, UnitError> {
    let boundary_dofs = nonzero_columns(&subdomain.b1);

    let schur = if params.dirichlet_from_external_source {
        external_schur(subdomain, boundary_dofs.len())?
    } else {
        condense(subdomain, &boundary_dofs, params.pivot_tolerance)?
    };

    Ok(DirichletPreconditioner {
        boundary_dofs,
        schur,
    })
}

fn external_schur(subdomain: &Subdomain, boundary: usize) -> Result<Mat<f64>, UnitError> {
    let schur = subdomain
        .external_schur
        .as_ref()
        .ok_or(UnitError::MissingExternalSchur)?;

    if schur.nrows() != boundary {
        return Err(UnitError::dimensions(
            "external Schur rows",
            boundary,
            schur.nrows(),
        ));
    }
    if schur.ncols() != boundary {
        return Err(UnitError::dimensions(
            "external Schur columns",
            boundary,
            schur.ncols(),
        ));
    }

    Ok(schur.clone())
}

/// Where a DOF lands after partitioning.
#[derive(Clone, Copy)]
enum Slot {
    Interior(usize),
    Boundary(usize),
}

/// Eliminates the interior DOFs of the stiffness matrix.
fn condense(
    subdomain: &Subdomain,
    boundary_dofs: &[usize],
    pivot_tolerance: f64,
) -> Result<Mat<f64>, UnitError> {
    let n = subdomain.n_dofs();
    let interior_dofs = complement_indices(n, boundary_dofs);
    let (ni, nj) = (interior_dofs.len(), boundary_dofs.len());

    let mut slots = vec![Slot::Interior(0); n];
    for (local, &dof) in interior_dofs.iter().enumerate() {
        slots[dof] = Slot::Interior(local);
    }
    for (local, &dof) in boundary_dofs.iter().enumerate() {
        slots[dof] = Slot::Boundary(local);
    }

    // K_II stays sparse; K_IJ is dense because it is the right-hand side of
    // the interior solve.
    let mut k_ii = Vec::with_capacity(subdomain.k.val().len());
    let mut k_ij = Mat::<f64>::zeros(ni, nj);
    let mut k_jj = Mat::<f64>::zeros(nj, nj);

    // Single pass over the stored entries; the K_JI block is not needed.
    let k = &subdomain.k;
    let symbolic = k.symbolic();
    for col in 0..n {
        let row_indices = symbolic.row_idx_of_col_raw(col);
        let col_values = k.val_of_col(col);

        for (idx, &row) in row_indices.iter().enumerate() {
            let val = col_values[idx];
            match (slots[row], slots[col]) {
                (Slot::Interior(i), Slot::Interior(j)) => k_ii.push(SparseEntry::new(i, j, val)),
                (Slot::Interior(i), Slot::Boundary(j)) => k_ij[(i, j)] += val,
                (Slot::Boundary(i), Slot::Boundary(j)) => k_jj[(i, j)] += val,
                (Slot::Boundary(_), Slot::Interior(_)) => {}
            }
        }
    }

    if ni == 0 || nj == 0 {
        return Ok(k_jj);
    }

    let k_ii = sparse_from_entries(ni, ni, &k_ii).map_err(|detail| UnitError::SparseAssembly {
        context: "interior stiffness block".to_string(),
        detail,
    })?;

    let solver = InteriorSolver::factorise(&k_ii, pivot_tolerance)?;
    let x = solver.solve(&k_ij)?;

    Ok(k_jj - k_ij.transpose() * x)
}
