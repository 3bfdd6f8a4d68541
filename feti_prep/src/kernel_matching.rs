/////////////////////////////////////////////////////////////////////////////////////////////
//
// Builds the kernel compatibility constraints (B0) coupling the rigid-body modes of adjacent
// subdomains within a cluster.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # kernel_matching
//!
//! Two subdomains of a cluster are coupled when their interface constraint
//! matrices `B1` both act on more than `pair_adjacency_threshold` common
//! Lagrange multiplier rows. For each coupled pair `(j, k)` the kernel bases
//! restricted to the shared interface DOFs, `R_g_j` and `R_g_k`, are checked
//! for redundant directions, and one constraint row per surviving direction
//! `l` is emitted:
//!
//! ```text
//! B0_j[g, iB0_j] = +R_g_j[:, l]
//! B0_k[g, iB0_k] = -R_g_k[:, l]
//! ```
//!
//! Pair evaluation ([`match_pair`]) is a pure function and can run on any
//! thread. Row indices `g` are assigned afterwards by [`assemble_cluster`],
//! which walks the pairs in lexicographic order, so the numbering never
//! depends on the execution mode.

use std::sync::Arc;

use faer::{sparse::SparseColMat, Mat};
use serde::{Deserialize, Serialize};

use crate::{
    config::Params,
    error::{UnitError, UnitFailure, UnitId, UnitWarning, WarningKind},
    linalg::reduce_redundant_kernel,
    progress::{report, ProgressMsg, ProgressSink},
    subdomain::Subdomain,
};
use feti_prep_utils::{select_mat_rows, sparse_from_entries, SparseEntry};

/// Row-wise pattern of the nonzero entries of a subdomain's `B1`.
///
/// Columns are ascending within each row. Built once per subdomain and
/// shared by all of its pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfacePattern {
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
}

impl InterfacePattern {
    /// Transposes the nonzero pattern of `b1` into row-major form.
    pub fn new(b1: &SparseColMat<usize, f64>) -> Self {
        let nrows = b1.nrows();
        let symbolic = b1.symbolic();

        let mut counts = vec![0usize; nrows + 1];
        for col in 0..b1.ncols() {
            let row_indices = symbolic.row_idx_of_col_raw(col);
            let col_values = b1.val_of_col(col);
            for (idx, &row) in row_indices.iter().enumerate() {
                if col_values[idx] != 0.0 {
                    counts[row + 1] += 1;
                }
            }
        }
        for row in 0..nrows {
            counts[row + 1] += counts[row];
        }

        let row_ptr = counts.clone();
        let mut next = counts;
        let mut col_idx = vec![0usize; row_ptr[nrows]];

        for col in 0..b1.ncols() {
            let row_indices = symbolic.row_idx_of_col_raw(col);
            let col_values = b1.val_of_col(col);
            for (idx, &row) in row_indices.iter().enumerate() {
                if col_values[idx] != 0.0 {
                    col_idx[next[row]] = col;
                    next[row] += 1;
                }
            }
        }

        Self { row_ptr, col_idx }
    }

    /// Number of multiplier rows.
    pub fn nrows(&self) -> usize {
        self.row_ptr.len() - 1
    }

    /// Local DOFs with a nonzero entry in `row`.
    pub fn row(&self, row: usize) -> &[usize] {
        &self.col_idx[self.row_ptr[row]..self.row_ptr[row + 1]]
    }

    fn is_active(&self, row: usize) -> bool {
        self.row_ptr[row + 1] > self.row_ptr[row]
    }

    /// Concatenated DOFs of `rows`, in row order.
    fn dofs_of_rows(&self, rows: &[usize]) -> Vec<usize> {
        rows.iter().flat_map(|&row| self.row(row).iter().copied()).collect()
    }
}

/// Multiplier rows on which both patterns have a nonzero entry.
pub fn shared_rows(
    first: &InterfacePattern,
    second: &InterfacePattern,
) -> Result<Vec<usize>, UnitError> {
    if first.nrows() != second.nrows() {
        return Err(UnitError::dimensions(
            "B1 rows of the second subdomain",
            first.nrows(),
            second.nrows(),
        ));
    }

    Ok((0..first.nrows())
        .filter(|&row| first.is_active(row) && second.is_active(row))
        .collect())
}

/// Every unordered pair `(j, k)`, `j < k`, of `n` subdomains in
/// lexicographic order.
pub fn cluster_pairs(n: usize) -> Vec<(usize, usize)> {
    (0..n)
        .flat_map(|j| (j + 1..n).map(move |k| (j, k)))
        .collect()
}

/// Kernel directions shared by a coupled pair, restricted to the interface.
#[derive(Debug, Clone)]
pub struct PairCoupling {
    /// `iB0_j`: interface DOFs of the first subdomain, in shared-row order.
    pub first_dofs: Vec<usize>,

    /// `iB0_k`: interface DOFs of the second subdomain, in shared-row order.
    pub second_dofs: Vec<usize>,

    /// `R_g_j`, one column per emitted constraint row.
    pub first_basis: Mat<f64>,

    /// `R_g_k`, one column per emitted constraint row.
    pub second_basis: Mat<f64>,

    /// Number of shared multiplier rows.
    pub shared_rows: usize,

    /// Kernel dimension before redundancy removal.
    pub candidate_columns: usize,

    /// `true` if redundant directions were removed.
    pub reduced: bool,
}

impl PairCoupling {
    /// Number of constraint rows this pair contributes.
    pub fn rows(&self) -> usize {
        self.first_basis.ncols()
    }
}

/// Result of evaluating one subdomain pair.
#[derive(Debug, Clone)]
pub enum PairOutcome {
    /// Too few shared rows, or no interface DOFs: no constraints.
    Skipped { shared_rows: usize },

    /// The pair contributes [`PairCoupling::rows`] constraint rows.
    Coupled(PairCoupling),

    /// Redundancy removal kept no direction of a nonempty kernel. No rows
    /// are emitted and a warning is raised.
    Degenerate { candidate_columns: usize },
}

/// Evaluates a subdomain pair without assigning row indices.
pub fn match_pair(
    first: &Subdomain,
    first_pattern: &InterfacePattern,
    second: &Subdomain,
    second_pattern: &InterfacePattern,
    params: &Params,
) -> Result<PairOutcome, UnitError> {
    let rows = shared_rows(first_pattern, second_pattern)?;

    if rows.len() <= params.pair_adjacency_threshold {
        return Ok(PairOutcome::Skipped {
            shared_rows: rows.len(),
        });
    }

    let first_dofs = first_pattern.dofs_of_rows(&rows);
    let second_dofs = second_pattern.dofs_of_rows(&rows);
    if first_dofs.is_empty() || second_dofs.is_empty() {
        return Ok(PairOutcome::Skipped {
            shared_rows: rows.len(),
        });
    }

    for subdomain in [first, second] {
        if subdomain.r.nrows() != subdomain.n_dofs() {
            return Err(UnitError::dimensions(
                "kernel basis rows",
                subdomain.n_dofs(),
                subdomain.r.nrows(),
            ));
        }
    }

    let reduction = reduce_redundant_kernel(
        select_mat_rows(&first.r, &first_dofs),
        select_mat_rows(&second.r, &second_dofs),
        params.kernel_redundancy_tolerance,
    )?;

    if reduction.retained_columns == 0 && reduction.candidate_columns > 0 {
        return Ok(PairOutcome::Degenerate {
            candidate_columns: reduction.candidate_columns,
        });
    }

    Ok(PairOutcome::Coupled(PairCoupling {
        first_dofs,
        second_dofs,
        first_basis: reduction.first,
        second_basis: reduction.second,
        shared_rows: rows.len(),
        candidate_columns: reduction.candidate_columns,
        reduced: reduction.reduced,
    }))
}

/// A pair outcome tagged with its pair.
#[derive(Debug)]
pub struct PairEvaluation {
    pub first: usize,
    pub second: usize,
    pub outcome: Result<PairOutcome, UnitError>,
}

/// Hands out consecutive constraint row indices of a cluster.
#[derive(Debug, Default)]
pub struct RowCounter {
    next: usize,
}

impl RowCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next unused row index.
    pub fn allocate(&mut self) -> usize {
        let row = self.next;
        self.next += 1;
        row
    }

    /// Last allocated index plus one, `0` if nothing was allocated.
    pub fn total(&self) -> usize {
        self.next
    }
}

/// Collects the `(row, dof, value)` entries of one subdomain's B0.
#[derive(Debug)]
pub struct TripletAccumulator {
    n_dofs: usize,
    entries: Vec<SparseEntry>,
}

impl TripletAccumulator {
    pub fn with_capacity(n_dofs: usize, capacity: usize) -> Self {
        Self {
            n_dofs,
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Adds `sign * values[i]` at `(row, dofs[i])` for every `i`.
    pub fn push_row(&mut self, row: usize, dofs: &[usize], values: &[f64], sign: f64) {
        self.entries.extend(
            dofs.iter()
                .zip(values)
                .map(|(&dof, &val)| SparseEntry::new(row, dof, sign * val)),
        );
    }

    /// Number of entries collected so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Assembles a `total_rows × n_dofs` matrix. Duplicate entries are summed.
    pub fn finish(self, total_rows: usize) -> Result<SparseColMat<usize, f64>, UnitError> {
        sparse_from_entries(total_rows, self.n_dofs, &self.entries).map_err(|detail| {
            UnitError::SparseAssembly {
                context: "kernel B0".to_string(),
                detail,
            }
        })
    }
}

/// Kernel compatibility constraints of one cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConstraints {
    /// Number of constraint rows of the cluster.
    pub total_rows: usize,

    /// One `total_rows × n_dofs` matrix per subdomain, in subdomain order.
    #[serde(with = "sparse_list")]
    pub b0: Vec<SparseColMat<usize, f64>>,
}

/// Assembled constraints plus the warnings raised while building them.
#[derive(Debug, Clone)]
pub struct ClusterOutcome {
    pub constraints: ClusterConstraints,
    pub coupled_pairs: usize,
    pub warnings: Vec<UnitWarning>,
}

/// Assigns constraint rows to the evaluated pairs of a cluster and assembles
/// one B0 matrix per subdomain.
///
/// Evaluations may arrive in any order; rows are allocated in lexicographic
/// pair order. If any pair failed, every failure is returned and nothing is
/// assembled.
pub fn assemble_cluster(
    subdomains: &[Subdomain],
    cluster: usize,
    mut evaluations: Vec<PairEvaluation>,
    progress: &Option<Arc<dyn ProgressSink>>,
) -> Result<ClusterOutcome, Vec<UnitFailure>> {
    evaluations.sort_by_key(|e| (e.first, e.second));

    let mut failures = Vec::new();
    let mut outcomes = Vec::with_capacity(evaluations.len());
    for evaluation in evaluations {
        let unit = UnitId::Pair {
            cluster,
            first: evaluation.first,
            second: evaluation.second,
        };
        match evaluation.outcome {
            Ok(outcome) => outcomes.push((unit, evaluation.first, evaluation.second, outcome)),
            Err(error) => failures.push(UnitFailure::new(unit, error)),
        }
    }
    if !failures.is_empty() {
        return Err(failures);
    }

    let mut capacity = vec![0usize; subdomains.len()];
    for (_, j, k, outcome) in &outcomes {
        if let PairOutcome::Coupled(coupling) = outcome {
            capacity[*j] += coupling.first_dofs.len() * coupling.rows();
            capacity[*k] += coupling.second_dofs.len() * coupling.rows();
        }
    }

    let mut accumulators: Vec<TripletAccumulator> = subdomains
        .iter()
        .zip(&capacity)
        .map(|(subdomain, &cap)| TripletAccumulator::with_capacity(subdomain.n_dofs(), cap))
        .collect();

    let mut counter = RowCounter::new();
    let mut coupled_pairs = 0;
    let mut warnings = Vec::new();

    for (unit, j, k, outcome) in outcomes {
        match outcome {
            PairOutcome::Skipped { shared_rows } => {
                report(progress, || ProgressMsg::PairSkipped {
                    cluster,
                    first: j,
                    second: k,
                    shared_rows,
                });
            }
            PairOutcome::Degenerate { candidate_columns } => {
                let warning = UnitWarning {
                    unit,
                    kind: WarningKind::RedundancyDetectionDegenerate { candidate_columns },
                };
                report(progress, || ProgressMsg::Warning(warning));
                warnings.push(warning);
            }
            PairOutcome::Coupled(coupling) => {
                if coupling.reduced {
                    report(progress, || ProgressMsg::KernelReduced {
                        cluster,
                        first: j,
                        second: k,
                        candidate_columns: coupling.candidate_columns,
                        retained_columns: coupling.rows(),
                    });
                }

                for l in 0..coupling.rows() {
                    let row = counter.allocate();
                    let first_values: Vec<f64> = coupling.first_basis.col(l).iter().copied().collect();
                    let second_values: Vec<f64> =
                        coupling.second_basis.col(l).iter().copied().collect();

                    accumulators[j].push_row(row, &coupling.first_dofs, &first_values, 1.0);
                    accumulators[k].push_row(row, &coupling.second_dofs, &second_values, -1.0);
                }
                // Pairs of subdomains without kernel emit no rows.
                if coupling.rows() > 0 {
                    coupled_pairs += 1;
                }
            }
        }
    }

    let total_rows = counter.total();
    let b0 = accumulators
        .into_iter()
        .zip(subdomains)
        .map(|(acc, subdomain)| {
            acc.finish(total_rows)
                .map_err(|error| UnitFailure::new(subdomain.id.into(), error))
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(|failure| vec![failure])?;

    report(progress, || ProgressMsg::ClusterAssembled {
        cluster,
        coupled_pairs,
        total_rows,
    });

    Ok(ClusterOutcome {
        constraints: ClusterConstraints { total_rows, b0 },
        coupled_pairs,
        warnings,
    })
}

/// Builds the kernel compatibility constraints of one cluster on the
/// calling thread.
pub fn build_b0(
    subdomains: &[Subdomain],
    cluster: usize,
    params: &Params,
) -> Result<ClusterOutcome, Vec<UnitFailure>> {
    let patterns: Vec<InterfacePattern> = subdomains
        .iter()
        .map(|subdomain| InterfacePattern::new(&subdomain.b1))
        .collect();

    let evaluations = cluster_pairs(subdomains.len())
        .into_iter()
        .map(|(j, k)| PairEvaluation {
            first: j,
            second: k,
            outcome: match_pair(
                &subdomains[j],
                &patterns[j],
                &subdomains[k],
                &patterns[k],
                params,
            ),
        })
        .collect();

    assemble_cluster(subdomains, cluster, evaluations, &None)
}

/// Serializes sparse matrices as `(nrows, ncols, triplets)`.
mod sparse_list {
    use faer::sparse::SparseColMat;
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

    use feti_prep_utils::{sparse_from_entries, SparseEntry};

    #[derive(Serialize, Deserialize)]
    struct StoredSparse {
        nrows: usize,
        ncols: usize,
        triplets: Vec<(usize, usize, f64)>,
    }

    impl From<&SparseColMat<usize, f64>> for StoredSparse {
        fn from(matrix: &SparseColMat<usize, f64>) -> Self {
            let symbolic = matrix.symbolic();
            let mut triplets = Vec::new();
            for col in 0..matrix.ncols() {
                let row_indices = symbolic.row_idx_of_col_raw(col);
                let col_values = matrix.val_of_col(col);
                for (idx, &row) in row_indices.iter().enumerate() {
                    triplets.push((row, col, col_values[idx]));
                }
            }
            Self {
                nrows: matrix.nrows(),
                ncols: matrix.ncols(),
                triplets,
            }
        }
    }

    pub fn serialize<S: Serializer>(
        matrices: &[SparseColMat<usize, f64>],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let stored: Vec<StoredSparse> = matrices.iter().map(StoredSparse::from).collect();
        stored.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<SparseColMat<usize, f64>>, D::Error> {
        let stored = Vec::<StoredSparse>::deserialize(deserializer)?;
        stored
            .into_iter()
            .map(|m| {
                let entries: Vec<SparseEntry> = m
                    .triplets
                    .iter()
                    .map(|&(row, col, val)| SparseEntry::new(row, col, val))
                    .collect();
                sparse_from_entries(m.nrows, m.ncols, &entries).map_err(D::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::GridStrip;
    use equator::assert;
    use faer::utils::approx::*;
    use feti_prep_utils::{sparse_to_dense, stack_rows};

    fn params(threshold: usize) -> Params {
        Params::builder().pair_adjacency_threshold(threshold).build()
    }

    fn dense_b0(outcome: &ClusterOutcome) -> Vec<Mat<f64>> {
        outcome.constraints.b0.iter().map(sparse_to_dense).collect()
    }

    #[test]
    fn pairs_are_lexicographic() {
        assert!(cluster_pairs(4) == vec![(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]);
        assert!(cluster_pairs(1).is_empty());
    }

    #[test]
    fn pattern_lists_nonzero_columns_per_row() {
        let b1 = sparse_from_entries(
            3,
            4,
            &[
                SparseEntry::new(0, 3, 1.0),
                SparseEntry::new(0, 1, -1.0),
                SparseEntry::new(2, 2, 1.0),
                SparseEntry::new(1, 0, 0.0),
            ],
        )
        .unwrap();

        let pattern = InterfacePattern::new(&b1);
        assert!(pattern.nrows() == 3);
        assert!(pattern.row(0) == &[1, 3][..]);
        assert!(pattern.row(1).is_empty());
        assert!(pattern.row(2) == &[2][..]);
    }

    #[test]
    fn pairs_without_kernel_are_not_counted_as_coupled() {
        let strip = GridStrip::new(3, 2).subdomains_per_cluster(3);
        let mut subdomains = strip.cluster(0).unwrap();
        for subdomain in &mut subdomains {
            subdomain.r = Mat::zeros(subdomain.n_dofs(), 0);
        }

        let patterns: Vec<InterfacePattern> = subdomains
            .iter()
            .map(|s| InterfacePattern::new(&s.b1))
            .collect();
        let evaluations = cluster_pairs(subdomains.len())
            .into_iter()
            .map(|(j, k)| PairEvaluation {
                first: j,
                second: k,
                outcome: match_pair(
                    &subdomains[j],
                    &patterns[j],
                    &subdomains[k],
                    &patterns[k],
                    &params(0),
                ),
            })
            .collect();

        let sink = Arc::new(crate::progress::RecordingSink::default());
        let progress: Option<Arc<dyn ProgressSink>> = Some(sink.clone());
        let outcome = assemble_cluster(&subdomains, 0, evaluations, &progress).unwrap();

        assert!(outcome.coupled_pairs == 0);
        assert!(outcome.constraints.total_rows == 0);
        assert!(outcome.warnings.is_empty());
        assert!(outcome.constraints.b0.iter().all(|b0| b0.nrows() == 0));

        let assembled = sink.messages().into_iter().find_map(|msg| match msg {
            ProgressMsg::ClusterAssembled { coupled_pairs, .. } => Some(coupled_pairs),
            _ => None,
        });
        assert!(assembled == Some(0));
    }

    #[test]
    fn two_square_scenario_couples_translations() {
        // Two 2x2-node squares with two DOFs per node share one edge: four
        // multiplier rows, two translation modes, two constraint rows.
        let strip = GridStrip::new(2, 2).subdomains_per_cluster(2);
        let subdomains = strip.cluster(0).unwrap();

        let outcome = build_b0(&subdomains, 0, &params(0)).unwrap();
        assert!(outcome.constraints.total_rows == 2);
        assert!(outcome.coupled_pairs == 1);
        assert!(outcome.warnings.is_empty());

        let b0 = dense_b0(&outcome);
        assert!(b0[0].shape() == (2, 8));
        assert!(b0[1].shape() == (2, 8));

        // Right edge of the first square: nodes 1 and 3. Left edge of the
        // second: nodes 0 and 2.
        for d in 0..2 {
            for node in [1, 3] {
                assert!(b0[0][(d, node * 2 + d)] == 1.0);
            }
            for node in [0, 2] {
                assert!(b0[1][(d, node * 2 + d)] == -1.0);
            }
        }

        let nnz = |m: &Mat<f64>| {
            (0..m.nrows())
                .flat_map(|i| (0..m.ncols()).map(move |j| (i, j)))
                .filter(|&(i, j)| m[(i, j)] != 0.0)
                .count()
        };
        assert!(nnz(&b0[0]) == 4);
        assert!(nnz(&b0[1]) == 4);
    }

    #[test]
    fn threshold_is_strict() {
        // 12 nodes per edge with 2 DOFs each: exactly 24 shared rows.
        let at = GridStrip::new(12, 2).subdomains_per_cluster(2);
        let outcome = build_b0(&at.cluster(0).unwrap(), 0, &Params::default()).unwrap();
        assert!(outcome.constraints.total_rows == 0);
        assert!(outcome.coupled_pairs == 0);
        assert!(outcome.constraints.b0[0].shape() == (0, 288));

        // 5 nodes per edge with 5 DOFs each: 25 shared rows.
        let above = GridStrip::new(5, 5).subdomains_per_cluster(2);
        let outcome = build_b0(&above.cluster(0).unwrap(), 0, &Params::default()).unwrap();
        assert!(outcome.constraints.total_rows == 5);
        assert!(outcome.coupled_pairs == 1);
    }

    #[test]
    fn signs_are_opposite_on_the_two_sides() {
        let strip = GridStrip::new(3, 2).subdomains_per_cluster(2);
        let subdomains = strip.cluster(0).unwrap();
        let patterns: Vec<InterfacePattern> = subdomains
            .iter()
            .map(|s| InterfacePattern::new(&s.b1))
            .collect();

        let coupling = match match_pair(
            &subdomains[0],
            &patterns[0],
            &subdomains[1],
            &patterns[1],
            &params(0),
        )
        .unwrap()
        {
            PairOutcome::Coupled(coupling) => coupling,
            other => panic!("expected a coupled pair, got {other:?}"),
        };

        let outcome = build_b0(&subdomains, 0, &params(0)).unwrap();
        let b0 = dense_b0(&outcome);

        for l in 0..coupling.rows() {
            for (i, &dof) in coupling.first_dofs.iter().enumerate() {
                assert!(b0[0][(l, dof)] == coupling.first_basis[(i, l)]);
            }
            for (i, &dof) in coupling.second_dofs.iter().enumerate() {
                assert!(b0[1][(l, dof)] == -coupling.second_basis[(i, l)]);
            }
        }
    }

    #[test]
    fn redundant_kernel_direction_is_dropped() {
        let strip = GridStrip::new(3, 2).subdomains_per_cluster(2);
        let mut subdomains = strip.cluster(0).unwrap();

        // Append a third kernel column equal to the sum of the translations.
        for subdomain in &mut subdomains {
            let r = subdomain.r.clone();
            subdomain.r = Mat::from_fn(r.nrows(), 3, |i, j| {
                if j < 2 {
                    r[(i, j)]
                } else {
                    r[(i, 0)] + r[(i, 1)]
                }
            });
        }

        let sink = Arc::new(crate::progress::RecordingSink::default());
        let progress: Option<Arc<dyn ProgressSink>> = Some(sink.clone());
        let patterns: Vec<InterfacePattern> = subdomains
            .iter()
            .map(|s| InterfacePattern::new(&s.b1))
            .collect();
        let evaluation = PairEvaluation {
            first: 0,
            second: 1,
            outcome: match_pair(
                &subdomains[0],
                &patterns[0],
                &subdomains[1],
                &patterns[1],
                &params(0),
            ),
        };
        let coupling = match &evaluation.outcome {
            Ok(PairOutcome::Coupled(coupling)) => coupling.clone(),
            other => panic!("expected a coupled pair, got {other:?}"),
        };

        let outcome = assemble_cluster(&subdomains, 0, vec![evaluation], &progress).unwrap();
        assert!(outcome.constraints.total_rows == 2);

        let stacked = stack_rows(&coupling.first_basis, &coupling.second_basis);
        let gram = stacked.transpose() * &stacked;
        let approx_eq = CwiseMat(ApproxEq::eps() * 256.0);
        assert!(gram ~ Mat::<f64>::identity(2, 2));

        assert!(sink.messages().iter().any(|m| matches!(
            m,
            ProgressMsg::KernelReduced {
                candidate_columns: 3,
                retained_columns: 2,
                ..
            }
        )));
    }

    #[test]
    fn chain_numbers_rows_in_pair_order() {
        let strip = GridStrip::new(3, 2).subdomains_per_cluster(3);
        let subdomains = strip.cluster(0).unwrap();

        let outcome = build_b0(&subdomains, 0, &params(0)).unwrap();
        assert!(outcome.constraints.total_rows == 4);
        assert!(outcome.coupled_pairs == 2);

        let b0 = dense_b0(&outcome);
        let row_is_empty = |m: &Mat<f64>, row: usize| (0..m.ncols()).all(|j| m[(row, j)] == 0.0);

        // Pair (0, 1) owns rows 0 and 1, pair (1, 2) rows 2 and 3.
        assert!(!row_is_empty(&b0[0], 0) && !row_is_empty(&b0[0], 1));
        assert!(row_is_empty(&b0[0], 2) && row_is_empty(&b0[0], 3));
        assert!((0..4).all(|row| !row_is_empty(&b0[1], row)));
        assert!(row_is_empty(&b0[2], 0) && row_is_empty(&b0[2], 1));
        assert!(!row_is_empty(&b0[2], 2) && !row_is_empty(&b0[2], 3));

        // Evaluation order does not change the numbering.
        let patterns: Vec<InterfacePattern> = subdomains
            .iter()
            .map(|s| InterfacePattern::new(&s.b1))
            .collect();
        let reversed: Vec<PairEvaluation> = cluster_pairs(3)
            .into_iter()
            .rev()
            .map(|(j, k)| PairEvaluation {
                first: j,
                second: k,
                outcome: match_pair(
                    &subdomains[j],
                    &patterns[j],
                    &subdomains[k],
                    &patterns[k],
                    &params(0),
                ),
            })
            .collect();
        let shuffled = assemble_cluster(&subdomains, 0, reversed, &None).unwrap();
        for (a, b) in dense_b0(&shuffled).iter().zip(&b0) {
            assert!(a == b);
        }
    }

    #[test]
    fn pairs_without_shared_rows_are_skipped() {
        let strip = GridStrip::new(3, 1).subdomains_per_cluster(3);
        let subdomains = strip.cluster(0).unwrap();
        let patterns: Vec<InterfacePattern> = subdomains
            .iter()
            .map(|s| InterfacePattern::new(&s.b1))
            .collect();

        let outcome = match_pair(
            &subdomains[0],
            &patterns[0],
            &subdomains[2],
            &patterns[2],
            &params(0),
        )
        .unwrap();
        assert!(matches!(outcome, PairOutcome::Skipped { shared_rows: 0 }));
    }

    #[test]
    fn mismatched_kernel_dimension_fails_only_its_pairs() {
        let strip = GridStrip::new(3, 2).subdomains_per_cluster(3);
        let mut subdomains = strip.cluster(0).unwrap();
        let r = subdomains[2].r.clone();
        subdomains[2].r = Mat::from_fn(r.nrows(), 3, |i, j| if j < 2 { r[(i, j)] } else { 1.0 });

        let failures = build_b0(&subdomains, 0, &params(0)).unwrap_err();
        assert!(failures.len() == 1);
        assert!(
            failures[0].unit
                == UnitId::Pair {
                    cluster: 0,
                    first: 1,
                    second: 2
                }
        );
        assert!(matches!(
            failures[0].error,
            UnitError::InconsistentDimensions { .. }
        ));
    }

    #[test]
    fn zero_kernel_on_interface_is_degenerate() {
        let strip = GridStrip::new(3, 2).subdomains_per_cluster(2);
        let mut subdomains = strip.cluster(0).unwrap();
        for subdomain in &mut subdomains {
            subdomain.r = Mat::zeros(subdomain.n_dofs(), 2);
        }

        let outcome = build_b0(&subdomains, 0, &params(0)).unwrap();
        assert!(outcome.constraints.total_rows == 0);
        assert!(outcome.coupled_pairs == 0);
        assert!(
            outcome.warnings
                == vec![UnitWarning {
                    unit: UnitId::Pair {
                        cluster: 0,
                        first: 0,
                        second: 1
                    },
                    kind: WarningKind::RedundancyDetectionDegenerate {
                        candidate_columns: 2
                    },
                }]
        );
    }

    #[test]
    fn duplicate_triplets_are_summed() {
        let mut acc = TripletAccumulator::with_capacity(3, 4);
        acc.push_row(0, &[1, 1], &[0.5, 0.25], 1.0);
        acc.push_row(1, &[2], &[2.0], -1.0);
        assert!(acc.len() == 3);

        let dense = sparse_to_dense(&acc.finish(2).unwrap());
        assert!(dense[(0, 1)] == 0.75);
        assert!(dense[(1, 2)] == -2.0);
    }

    #[test]
    fn constraints_survive_json_round_trip() {
        let strip = GridStrip::new(2, 2).subdomains_per_cluster(2);
        let outcome = build_b0(&strip.cluster(0).unwrap(), 0, &params(0)).unwrap();

        let text = serde_json::to_string(&outcome.constraints).unwrap();
        let back: ClusterConstraints = serde_json::from_str(&text).unwrap();

        assert!(back.total_rows == outcome.constraints.total_rows);
        for (a, b) in back.b0.iter().zip(&outcome.constraints.b0) {
            assert!(sparse_to_dense(a) == sparse_to_dense(b));
        }
    }
}
