/////////////////////////////////////////////////////////////////////////////////////////////
//
// Generates deterministic synthetic subdomain problems for testing and demonstrating the
// preprocessing stages.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Synthetic problems built from square grids.
//!
//! A [`GridStrip`] describes clusters made of a row of square subdomains with
//! `m × m` nodes each, neighbouring squares sharing one edge of `m` nodes.
//! Every node carries `dim` DOFs. The stiffness matrix is the 5-point graph
//! Laplacian of the grid applied to each DOF component, so its kernel is
//! spanned by the `dim` constant translations. Every shared node and
//! component gets one Lagrange multiplier, with `+1` on the left square and
//! `-1` on the right square.
use faer::{sparse::SparseColMat, Mat};

use crate::{
    error::{PreprocessError, UnitError},
    store::{ClusterLayout, LoadError, Matrix, MatrixKind, SubdomainLoader, SubdomainStore, VectorKind},
    subdomain::{Subdomain, SubdomainId},
};
use feti_prep_utils::{sparse_from_dense, sparse_from_entries, SparseEntry};

/// Clusters of square grid subdomains laid out in a row.
///
/// Also serves as an in-memory [`SubdomainLoader`]; it carries no external
/// Schur complements.
///
/// # Examples
///
/// ```
/// use feti_prep::GridStrip;
///
/// let strip = GridStrip::new(3, 2).clusters(2).subdomains_per_cluster(4);
/// let store = strip.store().unwrap();
///
/// assert_eq!(store.num_clusters(), 2);
/// assert_eq!(store.subdomain(1, 3).unwrap().n_dofs(), 18);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridStrip {
    nodes_per_side: usize,
    dofs_per_node: usize,
    clusters: usize,
    subdomains_per_cluster: usize,
}

impl GridStrip {
    /// One cluster of two `nodes_per_side × nodes_per_side` squares.
    pub fn new(nodes_per_side: usize, dofs_per_node: usize) -> Self {
        Self {
            nodes_per_side: nodes_per_side.max(1),
            dofs_per_node: dofs_per_node.max(1),
            clusters: 1,
            subdomains_per_cluster: 2,
        }
    }

    /// Sets the number of clusters.
    pub fn clusters(mut self, clusters: usize) -> Self {
        self.clusters = clusters;
        self
    }

    /// Sets the number of squares in each cluster.
    pub fn subdomains_per_cluster(mut self, subdomains: usize) -> Self {
        self.subdomains_per_cluster = subdomains;
        self
    }

    /// Cluster layout of the problem.
    pub fn layout(&self) -> ClusterLayout {
        ClusterLayout::Uniform {
            clusters: self.clusters,
            subdomains_per_cluster: self.subdomains_per_cluster,
        }
    }

    /// DOFs per subdomain.
    pub fn n_dofs(&self) -> usize {
        self.nodes_per_side * self.nodes_per_side * self.dofs_per_node
    }

    /// Lagrange multipliers per cluster.
    pub fn multipliers(&self) -> usize {
        self.subdomains_per_cluster.saturating_sub(1) * self.nodes_per_side * self.dofs_per_node
    }

    #[inline]
    fn dof(&self, x: usize, y: usize, d: usize) -> usize {
        (y * self.nodes_per_side + x) * self.dofs_per_node + d
    }

    #[inline]
    fn multiplier(&self, interface: usize, y: usize, d: usize) -> usize {
        (interface * self.nodes_per_side + y) * self.dofs_per_node + d
    }

    /// Grid Laplacian stiffness matrix, identical for every subdomain.
    pub fn stiffness(&self) -> Result<SparseColMat<usize, f64>, UnitError> {
        self.stiffness_with_shift(0.0)
    }

    /// Stiffness regularized by fixing node 0.
    pub fn regularized_stiffness(&self) -> Result<SparseColMat<usize, f64>, UnitError> {
        self.stiffness_with_shift(4.0)
    }

    fn stiffness_with_shift(&self, shift: f64) -> Result<SparseColMat<usize, f64>, UnitError> {
        let m = self.nodes_per_side;
        let mut entries = Vec::new();

        for y in 0..m {
            for x in 0..m {
                let mut neighbours = Vec::with_capacity(4);
                if x > 0 {
                    neighbours.push((x - 1, y));
                }
                if x + 1 < m {
                    neighbours.push((x + 1, y));
                }
                if y > 0 {
                    neighbours.push((x, y - 1));
                }
                if y + 1 < m {
                    neighbours.push((x, y + 1));
                }

                for d in 0..self.dofs_per_node {
                    let dof = self.dof(x, y, d);
                    let fixed = if x == 0 && y == 0 { shift } else { 0.0 };
                    entries.push(SparseEntry::new(dof, dof, neighbours.len() as f64 + fixed));
                    for &(nx, ny) in &neighbours {
                        entries.push(SparseEntry::new(dof, self.dof(nx, ny, d), -1.0));
                    }
                }
            }
        }

        assemble(self.n_dofs(), self.n_dofs(), &entries, "grid stiffness")
    }

    /// Interface constraint matrix of the square at `index` within its cluster.
    pub fn interface(&self, index: usize) -> Result<SparseColMat<usize, f64>, UnitError> {
        let (m, s) = (self.nodes_per_side, self.subdomains_per_cluster);
        let mut entries = Vec::new();

        for y in 0..m {
            for d in 0..self.dofs_per_node {
                if index + 1 < s {
                    entries.push(SparseEntry::new(
                        self.multiplier(index, y, d),
                        self.dof(m - 1, y, d),
                        1.0,
                    ));
                }
                if index > 0 {
                    entries.push(SparseEntry::new(
                        self.multiplier(index - 1, y, d),
                        self.dof(0, y, d),
                        -1.0,
                    ));
                }
            }
        }

        assemble(self.multipliers(), self.n_dofs(), &entries, "grid B1")
    }

    /// Translation modes, one column per DOF component.
    pub fn kernel(&self) -> Mat<f64> {
        let dim = self.dofs_per_node;
        Mat::from_fn(self.n_dofs(), dim, |i, j| if i % dim == j { 1.0 } else { 0.0 })
    }

    /// Inverse multiplicity of every DOF.
    pub fn weights(&self, index: usize) -> Vec<f64> {
        let (m, s, dim) = (self.nodes_per_side, self.subdomains_per_cluster, self.dofs_per_node);
        (0..self.n_dofs())
            .map(|dof| {
                let x = (dof / dim) % m;
                let shared = (x + 1 == m && index + 1 < s) || (x == 0 && index > 0);
                if shared {
                    0.5
                } else {
                    1.0
                }
            })
            .collect()
    }

    fn load_vector_at(&self, kind: VectorKind, index: usize) -> Vec<f64> {
        let n = self.n_dofs();
        match kind {
            VectorKind::F => vec![1.0 / n as f64; n],
            VectorKind::C => vec![0.0; n],
            VectorKind::Weight => self.weights(index),
            VectorKind::IndexWeight => (0..n).map(|i| i as f64).collect(),
        }
    }

    fn check_id(&self, cluster: usize, index: usize) -> Result<(), PreprocessError> {
        if cluster >= self.clusters {
            return Err(PreprocessError::IndexOutOfRange {
                cluster,
                subdomain: None,
            });
        }
        if index >= self.subdomains_per_cluster {
            return Err(PreprocessError::IndexOutOfRange {
                cluster,
                subdomain: Some(index),
            });
        }
        Ok(())
    }

    /// Builds the subdomain at `(cluster, index)`.
    pub fn subdomain(&self, cluster: usize, index: usize) -> Result<Subdomain, PreprocessError> {
        self.check_id(cluster, index)?;

        let id = SubdomainId::new(cluster, index);
        let build = || -> Result<Subdomain, UnitError> {
            Subdomain::builder(id, self.stiffness()?, self.interface(index)?, self.kernel())
                .k_reg(self.regularized_stiffness()?)
                .f(self.load_vector_at(VectorKind::F, index))
                .c(self.load_vector_at(VectorKind::C, index))
                .weight(self.weights(index))
                .build()
        };

        build().map_err(|error| PreprocessError::Invalid {
            unit: id.into(),
            error,
        })
    }

    /// Builds every subdomain of one cluster.
    pub fn cluster(&self, cluster: usize) -> Result<Vec<Subdomain>, PreprocessError> {
        (0..self.subdomains_per_cluster)
            .map(|index| self.subdomain(cluster, index))
            .collect()
    }

    /// Builds a store holding every cluster.
    pub fn store(&self) -> Result<SubdomainStore, PreprocessError> {
        let clusters = (0..self.clusters)
            .map(|c| self.cluster(c))
            .collect::<Result<Vec<_>, _>>()?;
        SubdomainStore::from_clusters(clusters)
    }
}

impl SubdomainLoader for GridStrip {
    fn load_matrix(
        &self,
        kind: MatrixKind,
        cluster: usize,
        subdomain: usize,
        sparse: bool,
        _symmetric: bool,
    ) -> Result<Matrix, LoadError> {
        self.check_id(cluster, subdomain)?;

        let matrix = match kind {
            MatrixKind::K => self.stiffness()?,
            MatrixKind::Kreg => self.regularized_stiffness()?,
            MatrixKind::B0 => assemble(0, self.n_dofs(), &[], "grid B0")?,
            MatrixKind::B1 => self.interface(subdomain)?,
            MatrixKind::R => sparse_from_dense(&self.kernel())?,
            MatrixKind::Schur => {
                return Err("synthetic problems carry no external Schur complement".into())
            }
        };

        Ok(if sparse {
            Matrix::Sparse(matrix)
        } else {
            Matrix::Dense(Matrix::Sparse(matrix).into_dense())
        })
    }

    fn load_vector(
        &self,
        kind: VectorKind,
        cluster: usize,
        subdomain: usize,
    ) -> Result<Vec<f64>, LoadError> {
        self.check_id(cluster, subdomain)?;
        Ok(self.load_vector_at(kind, subdomain))
    }
}

fn assemble(
    nrows: usize,
    ncols: usize,
    entries: &[SparseEntry],
    context: &str,
) -> Result<SparseColMat<usize, f64>, UnitError> {
    sparse_from_entries(nrows, ncols, entries).map_err(|detail| UnitError::SparseAssembly {
        context: context.to_string(),
        detail,
    })
}
