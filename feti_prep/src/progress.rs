/////////////////////////////////////////////////////////////////////////////////////////////
//
// Defines progress reporting messages, sinks, and helper functions for preprocessing runs.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Progress reporting primitives for long-running preprocessing.
//!
//! Every stage reports structured events through an optional
//! [`ProgressSink`]. Sinks are shared across worker threads, so events from
//! parallel units arrive in completion order, not unit order.

use std::fmt::Debug;
use std::sync::{mpsc, Arc};
use std::thread;

use crate::error::UnitWarning;

/// Progress events emitted during preprocessing.
#[derive(Debug, Clone)]
pub enum ProgressMsg {
    /// A subdomain's matrices and vectors were loaded.
    SubdomainLoaded { cluster: usize, subdomain: usize },

    /// A Dirichlet preconditioner block was produced.
    DirichletComputed {
        cluster: usize,
        subdomain: usize,
        boundary_dofs: usize,
    },

    /// A subdomain pair shares too few interface rows to be coupled.
    PairSkipped {
        cluster: usize,
        first: usize,
        second: usize,
        shared_rows: usize,
    },

    /// The stacked kernel basis of a pair was rank deficient and was replaced
    /// by an orthonormal basis of its retained columns.
    KernelReduced {
        cluster: usize,
        first: usize,
        second: usize,
        candidate_columns: usize,
        retained_columns: usize,
    },

    /// A cluster's kernel-matching constraints were assembled.
    ClusterAssembled {
        cluster: usize,
        coupled_pairs: usize,
        total_rows: usize,
    },

    /// A non-fatal condition was detected.
    Warning(UnitWarning),

    /// Arbitrary informational message.
    Message { message: String },
}

/// Sink that consumes progress messages.
pub trait ProgressSink: Send + Sync + Debug {
    fn emit(&self, msg: ProgressMsg);
}

/// Progress sink that forwards messages over a channel.
#[derive(Debug)]
pub struct ClosureSink {
    tx: mpsc::SyncSender<ProgressMsg>,
}

impl ProgressSink for ClosureSink {
    #[inline]
    fn emit(&self, msg: ProgressMsg) {
        let _ = self.tx.try_send(msg);
    }
}

/// Spawns a listener thread that runs a handler closure for each progress message.
///
/// Messages are dropped rather than blocking a worker when the buffer is full.
/// The listener exits once every clone of the returned sink has been dropped.
pub fn closure_sink<F>(
    buffer: usize,
    mut handler: F,
) -> (Arc<dyn ProgressSink>, thread::JoinHandle<()>)
where
    F: FnMut(ProgressMsg) + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel::<ProgressMsg>(buffer.max(1));
    let sink: Arc<dyn ProgressSink> = Arc::new(ClosureSink { tx });

    let handle = thread::spawn(move || {
        while let Ok(msg) = rx.recv() {
            handler(msg);
        }
    });

    (sink, handle)
}

/// Emits `msg` if a sink is installed.
#[inline]
pub(crate) fn report(sink: &Option<Arc<dyn ProgressSink>>, msg: impl FnOnce() -> ProgressMsg) {
    if let Some(sink) = sink {
        sink.emit(msg());
    }
}

/// Sink that keeps every message, for inspecting events in tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    messages: std::sync::Mutex<Vec<ProgressMsg>>,
}

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn messages(&self) -> Vec<ProgressMsg> {
        self.messages.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl ProgressSink for RecordingSink {
    fn emit(&self, msg: ProgressMsg) {
        self.messages.lock().unwrap().push(msg);
    }
}
