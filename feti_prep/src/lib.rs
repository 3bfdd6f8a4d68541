/////////////////////////////////////////////////////////////////////////////////////////////
//
// Exposes the public API and high-level documentation for FETI/HFETI preprocessing.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Preprocessing for FETI and hybrid FETI domain decomposition.
//!
//! The Finite Element Tearing and Interconnecting (FETI) method splits a mesh
//! into subdomains, each with its own stiffness matrix `K`, and glues them back
//! together with Lagrange multipliers through interface constraint matrices
//! `B1`. The hybrid variant (HFETI) groups subdomains into clusters and adds a
//! second level of constraints, `B0`, that ties the rigid body motions of
//! neighbouring subdomains inside each cluster together `1`.
//!
//! Before the dual iterations can start, two quantities are needed for every
//! subdomain. This crate computes both:
//!
//! - **Dirichlet preconditioners** - the Schur complement of `K` on the
//!   interface DOFs, used to precondition the dual problem `2`.
//! - **Kernel-matching constraints** - for each pair of subdomains in a
//!   cluster that shares enough interface rows, one `B0` row per independent
//!   rigid body mode, with `+` on the first subdomain and `-` on the second.
//!
//! Subdomains are independent units of work, and so are subdomain pairs. Both
//! stages fan their units out over a [`rayon`] thread pool and return results
//! that do not depend on the number of workers.
//!
//! # Features
//! - Subdomain data loaded through a pluggable [`SubdomainLoader`]
//! - Dense Schur complements via pivot-checked LU factorisation
//! - QR-based removal of redundant rigid body modes across a subdomain pair
//! - Sequential, global-pool, or dedicated-pool execution with identical results
//! - Per-unit error aggregation: one failing subdomain does not hide the others
//! - Versioned JSON persistence of the outputs
//! - Built on [`faer`](https://docs.rs/faer/latest/faer/) for linear algebra
//!
//! # Examples
//!
//! ```
//! use feti_prep::{FetiPreprocessor, GridStrip, Params};
//! use feti_prep_utils::sparse_to_dense;
//!
//! // A strip of three square subdomains, each with 5 x 5 nodes and 2 DOFs per node.
//! let strip = GridStrip::new(5, 2).subdomains_per_cluster(3);
//!
//! let preprocessor = FetiPreprocessor::builder()
//!     .params(Params::builder().multiprocessing(true).build())
//!     .build()?;
//!
//! let store = preprocessor.load_store(&strip, &strip.layout())?;
//! let output = preprocessor.run(&store)?;
//!
//! // Neighbours share 10 interface rows, which does not exceed the default
//! // adjacency threshold, so no kernel constraints are produced.
//! assert_eq!(output.kernel_b0[0].total_rows, 0);
//!
//! // Each subdomain condenses onto the DOFs of its interface edges.
//! let dirichlet = output.dirichlet.unwrap();
//! assert_eq!(dirichlet[0][0].boundary_dofs.len(), 10);
//! assert_eq!(dirichlet[0][1].boundary_dofs.len(), 20);
//!
//! let b0 = sparse_to_dense(&output.kernel_b0[0].b0[1]);
//! assert_eq!(b0.nrows(), 0);
//! # Ok::<(), feti_prep::PreprocessError>(())
//! ```
//!
//! # References
//! 1.  Z. Dostál, D. Horák, and R. Kučera. Total FETI - an easier implementable
//!     variant of the FETI method for numerical solution of elliptic PDE.
//!     Commun. Numer. Methods Eng., 22(12):1155–1162, 2006.
//! 2.  C. Farhat, J. Mandel, and F.-X. Roux. Optimal convergence properties of the
//!     FETI domain decomposition method. Comput. Methods Appl. Mech. Eng.,
//!     115(3-4):365–385, 1994.
pub mod config;

pub mod error;

pub mod progress;

mod dispatcher;

mod subdomain;

mod store;

mod linalg;

mod dirichlet;

mod kernel_matching;

mod preprocess;

mod synthetic;

pub use {
    config::{DualPreconditioner, Params, ParamsBuilder},
    dirichlet::{compute_dirichlet, DirichletPreconditioner},
    dispatcher::Dispatcher,
    error::{
        ArtifactIOError, PreprocessError, Stage, UnitError, UnitFailure, UnitId, UnitWarning,
        WarningKind,
    },
    kernel_matching::{
        assemble_cluster, build_b0, cluster_pairs, match_pair, shared_rows, ClusterConstraints,
        ClusterOutcome, InterfacePattern, PairCoupling, PairEvaluation, PairOutcome, RowCounter,
        TripletAccumulator,
    },
    linalg::{reduce_redundant_kernel, InteriorSolver, KernelReduction},
    preprocess::{FetiPreprocessor, FetiPreprocessorBuilder, KernelConstraints, PreprocessOutput},
    store::{
        ClusterLayout, LoadError, Matrix, MatrixKind, SubdomainLoader, SubdomainStore, VectorKind,
    },
    subdomain::{Subdomain, SubdomainBuilder, SubdomainId},
    synthetic::GridStrip,
};
