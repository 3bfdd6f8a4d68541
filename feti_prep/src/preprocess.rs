/////////////////////////////////////////////////////////////////////////////////////////////
//
// Orchestrates the preprocessing stages over a subdomain store and persists their outputs.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # preprocess
//!
//! [`FetiPreprocessor`] runs the two preprocessing stages over a
//! [`SubdomainStore`]:
//!
//! 1. one Dirichlet preconditioner per subdomain, and
//! 2. the kernel compatibility constraints (B0) of every cluster.
//!
//! Each stage is split into independent units (one per subdomain, or one per
//! subdomain pair) that are fanned out through the [`Dispatcher`]. A stage
//! always runs every unit; failing units are collected and reported together.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    config::{DualPreconditioner, Params},
    dirichlet::{compute_dirichlet, DirichletPreconditioner},
    dispatcher::Dispatcher,
    error::{ArtifactIOError, ArtifactIOResult, PreprocessError, Stage, UnitFailure, UnitWarning},
    kernel_matching::{
        assemble_cluster, cluster_pairs, match_pair, ClusterConstraints, InterfacePattern,
        PairEvaluation,
    },
    progress::{report, ProgressMsg, ProgressSink},
    store::{ClusterLayout, SubdomainLoader, SubdomainStore},
    subdomain::Subdomain,
};

/// Convenience builder for constructing a [`FetiPreprocessor`].
pub struct FetiPreprocessorBuilder {
    params: Params,
    progress_callback: Option<Arc<dyn ProgressSink>>,
}

impl FetiPreprocessorBuilder {
    fn new() -> Self {
        Self {
            params: Params::default(),
            progress_callback: None,
        }
    }

    /// Sets custom preprocessing parameters.
    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Optional callback for reporting progress.
    pub fn progress_callback(mut self, progress_callback: Arc<dyn ProgressSink>) -> Self {
        self.progress_callback = Some(progress_callback);
        self
    }

    /// Builds the preprocessor, creating its worker pool if one is requested.
    pub fn build(self) -> Result<FetiPreprocessor, PreprocessError> {
        Ok(FetiPreprocessor {
            dispatcher: Dispatcher::new(&self.params)?,
            params: self.params,
            progress_callback: self.progress_callback,
        })
    }
}

/// Runs the preprocessing stages of a FETI/HFETI solve.
///
/// # Examples
///
/// ```
/// use feti_prep::{FetiPreprocessor, GridStrip, Params};
///
/// let strip = GridStrip::new(4, 2).clusters(2).subdomains_per_cluster(3);
///
/// let preprocessor = FetiPreprocessor::builder()
///     .params(Params::builder().num_workers(2).pair_adjacency_threshold(4).build())
///     .build()?;
///
/// let store = preprocessor.load_store(&strip, &strip.layout())?;
/// let output = preprocessor.run(&store)?;
///
/// // Two coupled pairs per cluster, two translation modes each.
/// assert_eq!(output.kernel_b0[0].total_rows, 4);
/// assert_eq!(output.dirichlet.unwrap()[1].len(), 3);
/// # Ok::<(), feti_prep::PreprocessError>(())
/// ```
#[derive(Debug)]
pub struct FetiPreprocessor {
    /// Parameters shared by every stage.
    pub params: Params,

    dispatcher: Dispatcher,

    progress_callback: Option<Arc<dyn ProgressSink>>,
}

/// Kernel compatibility constraints of every cluster.
#[derive(Debug, Clone)]
pub struct KernelConstraints {
    /// One entry per cluster, in cluster order.
    pub clusters: Vec<ClusterConstraints>,

    /// Non-fatal conditions met while building the constraints.
    pub warnings: Vec<UnitWarning>,
}

impl FetiPreprocessor {
    /// Returns a [`FetiPreprocessorBuilder`] with default parameters.
    pub fn builder() -> FetiPreprocessorBuilder {
        FetiPreprocessorBuilder::new()
    }

    /// Loads every subdomain named by `layout` from `loader`.
    pub fn load_store<L: SubdomainLoader + ?Sized>(
        &self,
        loader: &L,
        layout: &ClusterLayout,
    ) -> Result<SubdomainStore, PreprocessError> {
        SubdomainStore::load(
            loader,
            layout,
            &self.params,
            &self.dispatcher,
            &self.progress_callback,
        )
    }

    /// Computes the Dirichlet preconditioner of every subdomain, grouped by
    /// cluster.
    pub fn dirichlet_preconditioners(
        &self,
        store: &SubdomainStore,
    ) -> Result<Vec<Vec<DirichletPreconditioner>>, PreprocessError> {
        let subdomains: Vec<&Subdomain> = store.iter().collect();

        report(&self.progress_callback, || ProgressMsg::Message {
            message: format!(
                "Computing Dirichlet preconditioners for {} subdomains",
                subdomains.len()
            ),
        });

        let preconditioners =
            self.dispatcher
                .try_map(Stage::Dirichlet, &subdomains, |subdomain| {
                    let precond = compute_dirichlet(subdomain, &self.params)
                        .map_err(|error| UnitFailure::new(subdomain.id.into(), error))?;

                    report(&self.progress_callback, || ProgressMsg::DirichletComputed {
                        cluster: subdomain.id.cluster,
                        subdomain: subdomain.id.index,
                        boundary_dofs: precond.boundary_dofs.len(),
                    });

                    Ok(precond)
                })?;

        Ok(regroup(store, preconditioners))
    }

    /// Builds the kernel compatibility constraints of every cluster.
    ///
    /// The pairs of all clusters are evaluated as a single batch; rows are
    /// then numbered cluster by cluster in lexicographic pair order.
    pub fn kernel_constraints(
        &self,
        store: &SubdomainStore,
    ) -> Result<KernelConstraints, PreprocessError> {
        let subdomains: Vec<&Subdomain> = store.iter().collect();
        let patterns = regroup(
            store,
            self.dispatcher
                .map(&subdomains, |subdomain| InterfacePattern::new(&subdomain.b1)),
        );

        let units: Vec<(usize, usize, usize)> = store
            .clusters()
            .iter()
            .enumerate()
            .flat_map(|(c, cluster)| {
                cluster_pairs(cluster.len())
                    .into_iter()
                    .map(move |(j, k)| (c, j, k))
            })
            .collect();

        report(&self.progress_callback, || ProgressMsg::Message {
            message: format!(
                "Matching kernels of {} subdomain pairs in {} clusters",
                units.len(),
                store.num_clusters()
            ),
        });

        let evaluations = self.dispatcher.map(&units, |&(c, j, k)| {
            let cluster = &store.clusters()[c];
            (
                c,
                PairEvaluation {
                    first: j,
                    second: k,
                    outcome: match_pair(
                        &cluster[j],
                        &patterns[c][j],
                        &cluster[k],
                        &patterns[c][k],
                        &self.params,
                    ),
                },
            )
        });

        let mut per_cluster: Vec<Vec<PairEvaluation>> =
            (0..store.num_clusters()).map(|_| Vec::new()).collect();
        for (c, evaluation) in evaluations {
            per_cluster[c].push(evaluation);
        }

        let mut clusters = Vec::with_capacity(store.num_clusters());
        let mut warnings = Vec::new();
        let mut failures = Vec::new();

        for (c, evaluations) in per_cluster.into_iter().enumerate() {
            match assemble_cluster(
                store.cluster(c)?,
                c,
                evaluations,
                &self.progress_callback,
            ) {
                Ok(outcome) => {
                    clusters.push(outcome.constraints);
                    warnings.extend(outcome.warnings);
                }
                Err(cluster_failures) => failures.extend(cluster_failures),
            }
        }

        if !failures.is_empty() {
            return Err(PreprocessError::Batch {
                stage: Stage::KernelMatching,
                failures,
            });
        }

        Ok(KernelConstraints { clusters, warnings })
    }

    /// Runs every configured stage over `store`.
    ///
    /// Both stages always run. If either fails, no output is returned and
    /// the failures of both stages are reported together.
    pub fn run(&self, store: &SubdomainStore) -> Result<PreprocessOutput, PreprocessError> {
        let dirichlet = match self.params.dual_preconditioner {
            DualPreconditioner::Dirichlet => self.dirichlet_preconditioners(store).map(Some),
            DualPreconditioner::None => Ok(None),
        };
        let kernel = self.kernel_constraints(store);

        match (dirichlet, kernel) {
            (Ok(dirichlet), Ok(kernel)) => Ok(PreprocessOutput {
                dirichlet,
                kernel_b0: kernel.clusters,
                warnings: kernel.warnings,
            }),
            (
                Err(PreprocessError::Batch {
                    stage,
                    mut failures,
                }),
                Err(PreprocessError::Batch {
                    failures: later, ..
                }),
            ) => {
                failures.extend(later);
                Err(PreprocessError::Batch { stage, failures })
            }
            (Err(err), _) | (_, Err(err)) => Err(err),
        }
    }
}

/// Splits a cluster-major list back into one list per cluster.
fn regroup<T>(store: &SubdomainStore, items: Vec<T>) -> Vec<Vec<T>> {
    let mut items = items.into_iter();
    store
        .clusters()
        .iter()
        .map(|cluster| items.by_ref().take(cluster.len()).collect())
        .collect()
}

/// Everything the preprocessing stages produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessOutput {
    /// Dirichlet preconditioners per cluster and subdomain, absent when the
    /// dual preconditioner is [`DualPreconditioner::None`].
    pub dirichlet: Option<Vec<Vec<DirichletPreconditioner>>>,

    /// Kernel compatibility constraints per cluster.
    pub kernel_b0: Vec<ClusterConstraints>,

    /// Non-fatal conditions met during preprocessing.
    pub warnings: Vec<UnitWarning>,
}

const JSON_FORMAT_NAME: &str = "feti_prep.json";
const JSON_VERSION: u32 = 1;

/// Borrowing envelope for SAVE.
#[derive(Serialize)]
struct JsonEnvelopeRef<'a, T: ?Sized> {
    format: &'static str,
    version: u32,
    #[serde(flatten)]
    output: &'a T,
}

/// Owning envelope for LOAD.
#[derive(Deserialize)]
struct JsonEnvelopeOwned<T> {
    format: String,
    version: u32,
    #[serde(flatten)]
    output: T,
}

impl PreprocessOutput {
    /// Save the outputs to a **JSON envelope** `{ format, version, ... }`.
    ///
    /// Sparse matrices are stored as `(nrows, ncols, triplets)`.
    ///
    /// ### Errors
    /// - Returns `ArtifactIOError::{Create, Serialize, Flush}` on I/O or
    ///   serialization failures.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ArtifactIOResult<()> {
        let path_ref = path.as_ref();
        let file = File::create(path_ref).map_err(|e| ArtifactIOError::Create {
            path: path_ref.to_path_buf(),
            source: e,
        })?;
        let mut w = BufWriter::new(file);

        let env = JsonEnvelopeRef {
            format: JSON_FORMAT_NAME,
            version: JSON_VERSION,
            output: self,
        };

        serde_json::to_writer(&mut w, &env).map_err(|e| ArtifactIOError::Serialize {
            path: path_ref.to_path_buf(),
            source: e,
        })?;
        w.flush().map_err(|e| ArtifactIOError::Flush {
            path: path_ref.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }

    /// Load outputs from a versioned **JSON envelope**, validating format & version.
    ///
    /// ### Errors
    /// - Returns `ArtifactIOError::{Open, Parse, FormatMismatch, VersionMismatch}`
    ///   as appropriate.
    pub fn load_json<P: AsRef<Path>>(path: P) -> ArtifactIOResult<Self> {
        let path_ref = path.as_ref();

        let file = File::open(path_ref).map_err(|e| ArtifactIOError::Open {
            path: path_ref.to_path_buf(),
            source: e,
        })?;
        let reader = BufReader::new(file);

        let env: JsonEnvelopeOwned<Self> =
            serde_json::from_reader(reader).map_err(|e| ArtifactIOError::Parse {
                path: path_ref.to_path_buf(),
                source: e,
            })?;

        if env.format != JSON_FORMAT_NAME {
            return Err(ArtifactIOError::FormatMismatch {
                path: path_ref.to_path_buf(),
                found: env.format,
                expected: JSON_FORMAT_NAME,
            });
        }

        if env.version != JSON_VERSION {
            return Err(ArtifactIOError::VersionMismatch {
                path: path_ref.to_path_buf(),
                found: env.version,
                expected: JSON_VERSION,
            });
        }

        Ok(env.output)
    }
}
