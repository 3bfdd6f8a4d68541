/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares configuration types for preprocessing, redundancy detection, and worker dispatch.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Declares configuration types for preprocessing, redundancy detection, and worker dispatch.
use serde::{Deserialize, Serialize};

/// Default number of shared interface rows a subdomain pair must *exceed*
/// before its kernels are coupled.
pub const DEFAULT_PAIR_ADJACENCY_THRESHOLD: usize = 24;

/// Default magnitude below which a diagonal entry of the QR `R` factor marks a
/// redundant kernel combination.
pub const DEFAULT_KERNEL_REDUNDANCY_TOLERANCE: f64 = 1e-10;

/// Default relative pivot magnitude below which an interior block is
/// considered singular.
pub const DEFAULT_PIVOT_TOLERANCE: f64 = 1e-12;

/// Preconditioner built for the dual (interface) system.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DualPreconditioner {
    /// Boundary Schur complement of each subdomain stiffness matrix.
    #[default]
    Dirichlet,

    /// No dual preconditioner; the Dirichlet stage is skipped.
    None,
}

/// Parameters controlling a preprocessing run.
///
/// ### Default Values
/// - `multiprocessing`: `false`
/// - `num_workers`: `None` (the process-wide pool when multiprocessing)
/// - `dual_preconditioner`: [`DualPreconditioner::Dirichlet`]
/// - `dirichlet_from_external_source`: `false`
/// - `kernel_redundancy_tolerance`: `1e-10`
/// - `pair_adjacency_threshold`: `24`
/// - `pivot_tolerance`: `1e-12`
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct Params {
    /// Fan independent units of work out over a worker pool instead of
    /// running them one after another. Results are identical either way.
    pub multiprocessing: bool,

    /// Size of a dedicated worker pool. Only read when `multiprocessing` is
    /// set; `None` uses the process-wide pool.
    pub num_workers: Option<usize>,

    /// Which dual preconditioner to build.
    pub dual_preconditioner: DualPreconditioner,

    /// Take each subdomain's Schur complement from the loader instead of
    /// computing it. Boundary indices are still derived from `B1`.
    pub dirichlet_from_external_source: bool,

    /// Absolute magnitude at or below which a diagonal entry of the QR `R`
    /// factor flags a redundant kernel combination.
    pub kernel_redundancy_tolerance: f64,

    /// A subdomain pair is coupled only if it shares strictly more interface
    /// rows than this.
    pub pair_adjacency_threshold: usize,

    /// Pivots at or below `pivot_tolerance * max|K_II|` mark the interior
    /// block as singular.
    pub pivot_tolerance: f64,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            multiprocessing: false,
            num_workers: None,
            dual_preconditioner: DualPreconditioner::default(),
            dirichlet_from_external_source: false,
            kernel_redundancy_tolerance: DEFAULT_KERNEL_REDUNDANCY_TOLERANCE,
            pair_adjacency_threshold: DEFAULT_PAIR_ADJACENCY_THRESHOLD,
            pivot_tolerance: DEFAULT_PIVOT_TOLERANCE,
        }
    }
}

impl Params {
    /// Returns a new [`ParamsBuilder`] populated with the default values.
    pub fn builder() -> ParamsBuilder {
        ParamsBuilder::new()
    }
}

/// A convenience builder for constructing a [`Params`] instance.
///
/// The builder should be called via the [`Params::builder`] method.
///
/// See [`Params`] for details on each field.
#[derive(Debug, Clone)]
pub struct ParamsBuilder {
    params: Params,
}

impl ParamsBuilder {
    fn new() -> Self {
        Self {
            params: Params::default(),
        }
    }

    /// Enables or disables the worker pool.
    pub fn multiprocessing(mut self, multiprocessing: bool) -> Self {
        self.params.multiprocessing = multiprocessing;
        self
    }

    /// Bounds the worker pool to `num_workers` threads. Implies multiprocessing.
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.params.multiprocessing = true;
        self.params.num_workers = Some(num_workers.max(1));
        self
    }

    /// Sets the dual preconditioner.
    pub fn dual_preconditioner(mut self, dual_preconditioner: DualPreconditioner) -> Self {
        self.params.dual_preconditioner = dual_preconditioner;
        self
    }

    /// Takes Schur complements from the loader instead of computing them.
    pub fn dirichlet_from_external_source(mut self, external: bool) -> Self {
        self.params.dirichlet_from_external_source = external;
        self
    }

    /// Sets the QR diagonal tolerance used to detect redundant kernel columns.
    pub fn kernel_redundancy_tolerance(mut self, tolerance: f64) -> Self {
        self.params.kernel_redundancy_tolerance = tolerance;
        self
    }

    /// Sets the shared-row count a pair must exceed to be coupled.
    pub fn pair_adjacency_threshold(mut self, threshold: usize) -> Self {
        self.params.pair_adjacency_threshold = threshold;
        self
    }

    /// Sets the relative pivot tolerance of the interior factorisation.
    pub fn pivot_tolerance(mut self, tolerance: f64) -> Self {
        self.params.pivot_tolerance = tolerance;
        self
    }

    /// Builds and returns a [`Params`] instance.
    pub fn build(self) -> Params {
        self.params
    }
}
