/////////////////////////////////////////////////////////////////////////////////////////////
//
// Runs independent units of preprocessing work sequentially or on a bounded rayon pool.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Fan-out of independent units of work.
//!
//! A [`Dispatcher`] maps a function over a slice and returns the results in
//! input order, whichever execution mode is selected. Units never share
//! mutable state, so the results are identical in every mode.

use rayon::prelude::*;

use crate::{
    config::Params,
    error::{PreprocessError, Stage, UnitFailure},
};

enum Mode {
    Sequential,
    GlobalPool,
    Pool(rayon::ThreadPool),
}

/// Executes batches of independent units.
pub struct Dispatcher {
    mode: Mode,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match &self.mode {
            Mode::Sequential => "sequential".to_string(),
            Mode::GlobalPool => "global pool".to_string(),
            Mode::Pool(pool) => format!("pool of {}", pool.current_num_threads()),
        };
        f.debug_struct("Dispatcher").field("mode", &mode).finish()
    }
}

impl Dispatcher {
    /// Selects the execution mode from `params`.
    ///
    /// - `multiprocessing = false`: units run one after another on the caller.
    /// - `multiprocessing = true`, `num_workers = Some(n)`: a dedicated pool of
    ///   `n` threads is created and owned by the dispatcher.
    /// - `multiprocessing = true`, `num_workers = None`: rayon's global pool.
    pub fn new(params: &Params) -> Result<Self, PreprocessError> {
        let mode = match (params.multiprocessing, params.num_workers) {
            (false, _) => Mode::Sequential,
            (true, None) => Mode::GlobalPool,
            (true, Some(n)) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n.max(1))
                    .thread_name(|i| format!("feti-prep-{i}"))
                    .build()
                    .map_err(|source| PreprocessError::WorkerPool { source })?;
                Mode::Pool(pool)
            }
        };

        Ok(Self { mode })
    }

    /// A dispatcher that always runs on the calling thread.
    pub fn sequential() -> Self {
        Self {
            mode: Mode::Sequential,
        }
    }

    /// Returns `true` if units may run concurrently.
    pub fn is_parallel(&self) -> bool {
        !matches!(self.mode, Mode::Sequential)
    }

    /// Applies `f` to every item, returning the results in input order.
    pub fn map<T, U, F>(&self, items: &[T], f: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        match &self.mode {
            Mode::Sequential => items.iter().map(f).collect(),
            Mode::GlobalPool => items.par_iter().map(f).collect(),
            Mode::Pool(pool) => pool.install(|| items.par_iter().map(f).collect()),
        }
    }

    /// Applies a fallible `f` to every item.
    ///
    /// Every unit runs to completion. If any failed, all failures are
    /// returned together, in input order, as [`PreprocessError::Batch`].
    pub fn try_map<T, U, F>(&self, stage: Stage, items: &[T], f: F) -> Result<Vec<U>, PreprocessError>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> Result<U, UnitFailure> + Sync + Send,
    {
        collect_units(self.map(items, f)).map_err(|failures| PreprocessError::Batch { stage, failures })
    }
}

/// Splits per-unit results into the successes, or every failure if there was
/// at least one.
pub(crate) fn collect_units<U>(results: Vec<Result<U, UnitFailure>>) -> Result<Vec<U>, Vec<UnitFailure>> {
    let mut values = Vec::with_capacity(results.len());
    let mut failures = Vec::new();

    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(failure) => failures.push(failure),
        }
    }

    if failures.is_empty() {
        Ok(values)
    } else {
        Err(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{UnitError, UnitId};

    fn dispatchers() -> Vec<Dispatcher> {
        vec![
            Dispatcher::sequential(),
            Dispatcher::new(&Params::builder().multiprocessing(true).build()).unwrap(),
            Dispatcher::new(&Params::builder().num_workers(3).build()).unwrap(),
        ]
    }

    #[test]
    fn map_preserves_input_order_in_every_mode() {
        let items: Vec<u64> = (0..500).collect();
        let expected: Vec<u64> = items.iter().map(|x| x * x + 1).collect();

        for dispatcher in dispatchers() {
            let out = dispatcher.map(&items, |x| x * x + 1);
            assert_eq!(out, expected, "{dispatcher:?}");
        }
    }

    #[test]
    fn params_select_mode() {
        assert!(!Dispatcher::new(&Params::default()).unwrap().is_parallel());
        assert!(Dispatcher::new(&Params::builder().num_workers(2).build())
            .unwrap()
            .is_parallel());
    }

    #[test]
    fn try_map_reports_every_failure_without_cancelling_siblings() {
        let items: Vec<usize> = (0..20).collect();
        let ran = std::sync::atomic::AtomicUsize::new(0);

        for dispatcher in dispatchers() {
            ran.store(0, std::sync::atomic::Ordering::SeqCst);

            let err = dispatcher
                .try_map(Stage::Dirichlet, &items, |&i| {
                    ran.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    if i % 7 == 3 {
                        Err(UnitFailure::new(
                            UnitId::Subdomain {
                                cluster: 0,
                                subdomain: i,
                            },
                            UnitError::MissingExternalSchur,
                        ))
                    } else {
                        Ok(i)
                    }
                })
                .unwrap_err();

            assert_eq!(ran.load(std::sync::atomic::Ordering::SeqCst), items.len());

            let failed: Vec<UnitId> = err.failures().iter().map(|f| f.unit).collect();
            assert_eq!(
                failed,
                vec![
                    UnitId::Subdomain {
                        cluster: 0,
                        subdomain: 3
                    },
                    UnitId::Subdomain {
                        cluster: 0,
                        subdomain: 10
                    },
                    UnitId::Subdomain {
                        cluster: 0,
                        subdomain: 17
                    },
                ]
            );
            assert!(matches!(
                err,
                PreprocessError::Batch {
                    stage: Stage::Dirichlet,
                    ..
                }
            ));
        }
    }

    #[test]
    fn try_map_returns_values_when_all_succeed() {
        let items = vec![1.5_f64, 2.5, 3.5];
        let out = Dispatcher::sequential()
            .try_map(Stage::Load, &items, |x| Ok::<_, UnitFailure>(x * 2.0))
            .unwrap();
        assert_eq!(out, vec![3.0, 5.0, 7.0]);
    }
}
