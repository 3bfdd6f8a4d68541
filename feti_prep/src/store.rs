/////////////////////////////////////////////////////////////////////////////////////////////
//
// Holds every loaded subdomain, grouped by cluster, and loads them through a pluggable source.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # store
//!
//! The [`SubdomainStore`] owns the subdomain data of every cluster. It is
//! filled once, either directly from in-memory [`Subdomain`]s or through a
//! [`SubdomainLoader`], and is read-only afterwards. Each preprocessing stage
//! borrows it immutably, so units of work running on separate threads never
//! contend on it.
//!
//! The on-disk representation of matrices and vectors is the loader's
//! concern. The store only states which matrix or vector it needs and
//! whether it expects a sparse and/or symmetric result.

use std::{error::Error, ops::Range, sync::Arc};

use faer::{sparse::SparseColMat, Mat};

use crate::{
    config::{DualPreconditioner, Params},
    dispatcher::Dispatcher,
    error::{PreprocessError, Stage, UnitError, UnitFailure},
    progress::{report, ProgressMsg, ProgressSink},
    subdomain::{Subdomain, SubdomainId},
};

/// Boxed error returned by a [`SubdomainLoader`].
pub type LoadError = Box<dyn Error + Send + Sync>;

/// Matrices a [`SubdomainLoader`] can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatrixKind {
    /// Stiffness matrix.
    K,
    /// Regularized stiffness matrix.
    Kreg,
    /// Corner constraint matrix.
    B0,
    /// Interface constraint matrix.
    B1,
    /// Kernel basis.
    R,
    /// Externally computed Dirichlet Schur complement.
    Schur,
}

impl MatrixKind {
    /// Label used by matrix sources to name the matrix.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatrixKind::K => "K",
            MatrixKind::Kreg => "Kreg",
            MatrixKind::B0 => "B0",
            MatrixKind::B1 => "B1",
            MatrixKind::R => "R",
            MatrixKind::Schur => "S",
        }
    }
}

/// Vectors a [`SubdomainLoader`] can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorKind {
    /// Load vector.
    F,
    /// Constraint right-hand side.
    C,
    /// Multiplicity weights.
    Weight,
    /// Local indices of the weights, stored as floating point.
    IndexWeight,
}

impl VectorKind {
    /// Label used by matrix sources to name the vector.
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorKind::F => "f",
            VectorKind::C => "c",
            VectorKind::Weight => "weight",
            VectorKind::IndexWeight => "loc_ind_weight",
        }
    }
}

/// A matrix produced by a loader, in whichever storage the source uses.
#[derive(Debug, Clone)]
pub enum Matrix {
    Sparse(SparseColMat<usize, f64>),
    Dense(Mat<f64>),
}

impl Matrix {
    /// Number of rows.
    pub fn nrows(&self) -> usize {
        match self {
            Matrix::Sparse(m) => m.nrows(),
            Matrix::Dense(m) => m.nrows(),
        }
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        match self {
            Matrix::Sparse(m) => m.ncols(),
            Matrix::Dense(m) => m.ncols(),
        }
    }

    /// Converts to compressed sparse column storage, dropping explicit zeros
    /// of a dense source.
    pub fn into_sparse(self) -> Result<SparseColMat<usize, f64>, String> {
        match self {
            Matrix::Sparse(m) => Ok(m),
            Matrix::Dense(m) => feti_prep_utils::sparse_from_dense(&m),
        }
    }

    /// Converts to dense storage.
    pub fn into_dense(self) -> Mat<f64> {
        match self {
            Matrix::Sparse(m) => feti_prep_utils::sparse_to_dense(&m),
            Matrix::Dense(m) => m,
        }
    }
}

/// A source of subdomain matrices and vectors.
///
/// Implementations are called concurrently from worker threads when the
/// store is loaded with multiprocessing enabled.
pub trait SubdomainLoader: Sync {
    /// Loads one matrix of a subdomain.
    ///
    /// `sparse` and `symmetric` describe how the source stores the matrix:
    /// a symmetric matrix may be stored as one triangle and must be returned
    /// in full.
    fn load_matrix(
        &self,
        kind: MatrixKind,
        cluster: usize,
        subdomain: usize,
        sparse: bool,
        symmetric: bool,
    ) -> Result<Matrix, LoadError>;

    /// Loads one vector of a subdomain.
    fn load_vector(
        &self,
        kind: VectorKind,
        cluster: usize,
        subdomain: usize,
    ) -> Result<Vec<f64>, LoadError>;
}

/// Number of subdomains in each cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterLayout {
    /// `clusters` clusters of `subdomains_per_cluster` subdomains each.
    Uniform {
        clusters: usize,
        subdomains_per_cluster: usize,
    },

    /// One entry per cluster.
    PerCluster(Vec<usize>),
}

impl ClusterLayout {
    /// Subdomain count of every cluster.
    pub fn counts(&self) -> Vec<usize> {
        match self {
            ClusterLayout::Uniform {
                clusters,
                subdomains_per_cluster,
            } => vec![*subdomains_per_cluster; *clusters],
            ClusterLayout::PerCluster(counts) => counts.clone(),
        }
    }

    /// Every subdomain id in cluster-major order.
    pub fn ids(&self) -> Vec<SubdomainId> {
        self.counts()
            .into_iter()
            .enumerate()
            .flat_map(|(cluster, n)| (0..n).map(move |index| SubdomainId::new(cluster, index)))
            .collect()
    }
}

/// Subdomain data grouped by cluster.
#[derive(Debug, Clone)]
pub struct SubdomainStore {
    clusters: Vec<Vec<Subdomain>>,
}

impl SubdomainStore {
    /// Builds a store from subdomains already in memory.
    ///
    /// Every subdomain must be stored at the position its id names and must
    /// satisfy its shape invariants.
    pub fn from_clusters(clusters: Vec<Vec<Subdomain>>) -> Result<Self, PreprocessError> {
        if clusters.is_empty() {
            return Err(PreprocessError::InvalidLayout {
                reason: "no clusters".to_string(),
            });
        }

        for (c, cluster) in clusters.iter().enumerate() {
            for (i, subdomain) in cluster.iter().enumerate() {
                if subdomain.id != SubdomainId::new(c, i) {
                    return Err(PreprocessError::InvalidLayout {
                        reason: format!(
                            "subdomain ({}, {}) stored at position ({}, {})",
                            subdomain.id.cluster, subdomain.id.index, c, i
                        ),
                    });
                }

                subdomain
                    .validate()
                    .map_err(|error| PreprocessError::Invalid {
                        unit: subdomain.id.into(),
                        error,
                    })?;
            }
        }

        Ok(Self { clusters })
    }

    /// Loads every subdomain named by `layout` from `loader`.
    ///
    /// One unit of work is run per subdomain. All failures are collected and
    /// returned together as a [`Stage::Load`] batch.
    pub fn load<L: SubdomainLoader + ?Sized>(
        loader: &L,
        layout: &ClusterLayout,
        params: &Params,
        dispatcher: &Dispatcher,
        progress: &Option<Arc<dyn ProgressSink>>,
    ) -> Result<Self, PreprocessError> {
        let counts = layout.counts();
        if counts.is_empty() {
            return Err(PreprocessError::InvalidLayout {
                reason: "no clusters".to_string(),
            });
        }

        let external_schur = params.dirichlet_from_external_source
            && params.dual_preconditioner == DualPreconditioner::Dirichlet;

        let ids = layout.ids();
        let loaded = dispatcher.try_map(Stage::Load, &ids, |&id| {
            let subdomain = load_subdomain(loader, id, external_schur)
                .map_err(|error| UnitFailure::new(id.into(), error))?;

            report(progress, || ProgressMsg::SubdomainLoaded {
                cluster: id.cluster,
                subdomain: id.index,
            });

            Ok(subdomain)
        })?;

        let mut loaded = loaded.into_iter();
        let clusters = counts
            .iter()
            .map(|&n| loaded.by_ref().take(n).collect())
            .collect();

        Ok(Self { clusters })
    }

    /// Number of clusters.
    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// Total number of subdomains across all clusters.
    pub fn num_subdomains(&self) -> usize {
        self.clusters.iter().map(Vec::len).sum()
    }

    /// All clusters in order.
    pub fn clusters(&self) -> &[Vec<Subdomain>] {
        &self.clusters
    }

    /// The subdomains of one cluster.
    pub fn cluster(&self, cluster: usize) -> Result<&[Subdomain], PreprocessError> {
        self.clusters
            .get(cluster)
            .map(Vec::as_slice)
            .ok_or(PreprocessError::IndexOutOfRange {
                cluster,
                subdomain: None,
            })
    }

    /// The subdomain at `(cluster, index)`.
    pub fn subdomain(&self, cluster: usize, index: usize) -> Result<&Subdomain, PreprocessError> {
        self.cluster(cluster)?
            .get(index)
            .ok_or(PreprocessError::IndexOutOfRange {
                cluster,
                subdomain: Some(index),
            })
    }

    /// Indices of the subdomains sharing `cluster`, in order.
    pub fn neighbors(&self, cluster: usize) -> Result<Range<usize>, PreprocessError> {
        Ok(0..self.cluster(cluster)?.len())
    }

    /// Every subdomain in cluster-major order.
    pub fn iter(&self) -> impl Iterator<Item = &Subdomain> {
        self.clusters.iter().flatten()
    }
}

fn load_subdomain<L: SubdomainLoader + ?Sized>(
    loader: &L,
    id: SubdomainId,
    external_schur: bool,
) -> Result<Subdomain, UnitError> {
    let matrix = |kind: MatrixKind, sparse: bool, symmetric: bool| -> Result<Matrix, UnitError> {
        loader
            .load_matrix(kind, id.cluster, id.index, sparse, symmetric)
            .map_err(|source| UnitError::Load {
                kind: kind.as_str(),
                source,
            })
    };
    let sparse = |kind: MatrixKind, symmetric: bool| -> Result<SparseColMat<usize, f64>, UnitError> {
        matrix(kind, true, symmetric)?
            .into_sparse()
            .map_err(|detail| UnitError::SparseAssembly {
                context: kind.as_str().to_string(),
                detail,
            })
    };
    let vector = |kind: VectorKind| -> Result<Vec<f64>, UnitError> {
        loader
            .load_vector(kind, id.cluster, id.index)
            .map_err(|source| UnitError::Load {
                kind: kind.as_str(),
                source,
            })
    };

    let k = sparse(MatrixKind::K, false)?;
    let k_reg = sparse(MatrixKind::Kreg, true)?;
    let b0 = sparse(MatrixKind::B0, false)?;
    let b1 = sparse(MatrixKind::B1, false)?;
    let r = matrix(MatrixKind::R, true, false)?.into_dense();

    let index_weight = indices_from_values(
        VectorKind::IndexWeight.as_str(),
        &vector(VectorKind::IndexWeight)?,
    )?;

    let mut builder = Subdomain::builder(id, k, b1, r)
        .k_reg(k_reg)
        .b0(b0)
        .f(vector(VectorKind::F)?)
        .c(vector(VectorKind::C)?)
        .weight(vector(VectorKind::Weight)?)
        .index_weight(index_weight);

    if external_schur {
        builder = builder.external_schur(matrix(MatrixKind::Schur, false, true)?.into_dense());
    }

    builder.build()
}

/// Converts a floating-point index vector to indices, truncating toward zero.
fn indices_from_values(context: &str, values: &[f64]) -> Result<Vec<usize>, UnitError> {
    values
        .iter()
        .enumerate()
        .map(|(position, &value)| {
            if value.is_finite() && value >= 0.0 {
                Ok(value.trunc() as usize)
            } else {
                Err(UnitError::InvalidIndex {
                    context: context.to_string(),
                    position,
                    value,
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::UnitId, progress::RecordingSink, synthetic::GridStrip};

    /// Wraps a loader, corrupting or failing selected subdomains.
    struct FaultyLoader {
        inner: GridStrip,
        fail_at: Vec<SubdomainId>,
        negative_index_at: Option<SubdomainId>,
    }

    impl SubdomainLoader for FaultyLoader {
        fn load_matrix(
            &self,
            kind: MatrixKind,
            cluster: usize,
            subdomain: usize,
            sparse: bool,
            symmetric: bool,
        ) -> Result<Matrix, LoadError> {
            if kind == MatrixKind::B1 && self.fail_at.contains(&SubdomainId::new(cluster, subdomain)) {
                return Err(format!("no B1 for ({cluster}, {subdomain})").into());
            }
            self.inner
                .load_matrix(kind, cluster, subdomain, sparse, symmetric)
        }

        fn load_vector(
            &self,
            kind: VectorKind,
            cluster: usize,
            subdomain: usize,
        ) -> Result<Vec<f64>, LoadError> {
            let mut values = self.inner.load_vector(kind, cluster, subdomain)?;
            if kind == VectorKind::IndexWeight
                && self.negative_index_at == Some(SubdomainId::new(cluster, subdomain))
            {
                values[1] = -1.0;
            }
            Ok(values)
        }
    }

    fn strip() -> GridStrip {
        GridStrip::new(3, 2).clusters(2).subdomains_per_cluster(3)
    }

    #[test]
    fn load_fills_every_cluster_in_order() {
        let strip = strip();
        let sink = Arc::new(RecordingSink::default());
        let progress: Option<Arc<dyn ProgressSink>> = Some(sink.clone());

        for params in [Params::default(), Params::builder().num_workers(2).build()] {
            let dispatcher = Dispatcher::new(&params).unwrap();
            let store =
                SubdomainStore::load(&strip, &strip.layout(), &params, &dispatcher, &progress)
                    .unwrap();

            assert_eq!(store.num_clusters(), 2);
            assert_eq!(store.num_subdomains(), 6);
            for c in 0..2 {
                assert_eq!(store.neighbors(c).unwrap(), 0..3);
                for i in 0..3 {
                    let subdomain = store.subdomain(c, i).unwrap();
                    assert_eq!(subdomain.id, SubdomainId::new(c, i));
                    assert_eq!(subdomain.n_dofs(), 18);
                    assert_eq!(subdomain.kernel_dim(), 2);
                    assert!(subdomain.external_schur.is_none());
                }
            }
        }

        let loaded = sink
            .messages()
            .iter()
            .filter(|m| matches!(m, ProgressMsg::SubdomainLoaded { .. }))
            .count();
        assert_eq!(loaded, 12);
    }

    #[test]
    fn out_of_range_lookups_fail() {
        let strip = strip();
        let store = strip.store().unwrap();

        assert!(matches!(
            store.subdomain(0, 3),
            Err(PreprocessError::IndexOutOfRange {
                cluster: 0,
                subdomain: Some(3)
            })
        ));
        assert!(matches!(
            store.neighbors(2),
            Err(PreprocessError::IndexOutOfRange {
                cluster: 2,
                subdomain: None
            })
        ));
    }

    #[test]
    fn load_failures_are_aggregated() {
        let loader = FaultyLoader {
            inner: strip(),
            fail_at: vec![SubdomainId::new(0, 1), SubdomainId::new(1, 2)],
            negative_index_at: Some(SubdomainId::new(1, 0)),
        };
        let params = Params::builder().num_workers(4).build();
        let dispatcher = Dispatcher::new(&params).unwrap();

        let err = SubdomainStore::load(&loader, &loader.inner.layout(), &params, &dispatcher, &None)
            .unwrap_err();

        assert!(matches!(err, PreprocessError::Batch { stage: Stage::Load, .. }));
        let units: Vec<UnitId> = err.failures().iter().map(|f| f.unit).collect();
        assert_eq!(
            units,
            vec![
                SubdomainId::new(0, 1).into(),
                SubdomainId::new(1, 0).into(),
                SubdomainId::new(1, 2).into(),
            ]
        );
        assert!(matches!(
            err.failures()[0].error,
            UnitError::Load { kind: "B1", .. }
        ));
        assert!(matches!(
            err.failures()[1].error,
            UnitError::InvalidIndex { position: 1, .. }
        ));
    }

    #[test]
    fn external_schur_is_requested_only_when_configured() {
        let strip = strip();
        let params = Params::builder().dirichlet_from_external_source(true).build();
        let err = SubdomainStore::load(
            &strip,
            &strip.layout(),
            &params,
            &Dispatcher::sequential(),
            &None,
        )
        .unwrap_err();

        // Synthetic problems carry no external Schur complement.
        assert!(err
            .failures()
            .iter()
            .all(|f| matches!(f.error, UnitError::Load { kind: "S", .. })));
        assert_eq!(err.failures().len(), 6);
    }

    #[test]
    fn index_values_truncate() {
        assert_eq!(
            indices_from_values("w", &[0.0, 1.9, 7.2]).unwrap(),
            vec![0, 1, 7]
        );
        assert!(indices_from_values("w", &[f64::NAN]).is_err());
    }

    #[test]
    fn from_clusters_rejects_misplaced_subdomains() {
        let strip = strip();
        let mut cluster = strip.cluster(0).unwrap();
        cluster.swap(0, 1);

        assert!(matches!(
            SubdomainStore::from_clusters(vec![cluster]),
            Err(PreprocessError::InvalidLayout { .. })
        ));
        assert!(matches!(
            SubdomainStore::from_clusters(Vec::new()),
            Err(PreprocessError::InvalidLayout { .. })
        ));
    }

    #[test]
    fn dense_matrices_convert_to_sparse() {
        let dense = Matrix::Dense(Mat::from_fn(2, 3, |i, j| if i == j { 2.0 } else { 0.0 }));
        assert_eq!(dense.nrows(), 2);
        assert_eq!(dense.ncols(), 3);

        let sparse = dense.into_sparse().unwrap();
        assert_eq!(feti_prep_utils::nonzero_columns(&sparse), vec![0, 1]);
    }
}
