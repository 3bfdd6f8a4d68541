/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares per-unit failures, warnings, and the aggregated errors surfaced by preprocessing.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Error and warning types.
//!
//! Work is split into independent *units*: one per subdomain (loading, Dirichlet
//! preconditioner) or one per subdomain pair (kernel matching). A failing unit
//! never cancels its siblings; every [`UnitFailure`] of a stage is collected and
//! surfaced together as [`PreprocessError::Batch`].

use serde::{Deserialize, Serialize};
use std::{
    error::Error,
    fmt, io,
    path::PathBuf,
};

/// Identifies the unit of work a failure or warning belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitId {
    /// A single subdomain of a cluster.
    Subdomain { cluster: usize, subdomain: usize },

    /// An unordered subdomain pair `first < second` of a cluster.
    Pair {
        cluster: usize,
        first: usize,
        second: usize,
    },
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitId::Subdomain { cluster, subdomain } => {
                write!(f, "cluster {cluster}, subdomain {subdomain}")
            }
            UnitId::Pair {
                cluster,
                first,
                second,
            } => write!(f, "cluster {cluster}, subdomain pair ({first}, {second})"),
        }
    }
}

/// The preprocessing stage a batch of units belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Loading subdomain matrices and vectors.
    Load,

    /// Dirichlet preconditioner construction.
    Dirichlet,

    /// Kernel matching / B0 construction.
    KernelMatching,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Load => write!(f, "load"),
            Stage::Dirichlet => write!(f, "Dirichlet preconditioner"),
            Stage::KernelMatching => write!(f, "kernel matching"),
        }
    }
}

/// Errors that abort a single unit of work.
#[derive(Debug)]
pub enum UnitError {
    /// The interior stiffness block is singular relative to its own scale.
    ///
    /// `pivot_index` is the elimination step or solution row where this
    /// surfaced; `pivot` is the magnitude found there, or an upper estimate
    /// of it.
    SingularInteriorBlock { pivot_index: usize, pivot: f64 },

    /// A matrix or vector does not have the shape required by its owner.
    InconsistentDimensions {
        context: String,
        expected: usize,
        found: usize,
    },

    /// The configuration requests an externally supplied Schur complement but
    /// none is attached to the subdomain.
    MissingExternalSchur,

    /// An integer index vector holds a value that is not a valid index.
    InvalidIndex {
        context: String,
        position: usize,
        value: f64,
    },

    /// A sparse matrix could not be assembled from its entries.
    SparseAssembly { context: String, detail: String },

    /// The loader failed to produce a matrix or vector.
    Load {
        kind: &'static str,
        source: Box<dyn Error + Send + Sync>,
    },
}

impl UnitError {
    /// Shorthand for [`UnitError::InconsistentDimensions`].
    pub(crate) fn dimensions(context: impl Into<String>, expected: usize, found: usize) -> Self {
        UnitError::InconsistentDimensions {
            context: context.into(),
            expected,
            found,
        }
    }
}

impl fmt::Display for UnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitError::SingularInteriorBlock { pivot_index, pivot } => write!(
                f,
                "singular interior block: pivot {} has magnitude {:e}",
                pivot_index,
                pivot.abs()
            ),
            UnitError::InconsistentDimensions {
                context,
                expected,
                found,
            } => write!(
                f,
                "inconsistent dimensions: {} (expected {}, found {})",
                context, expected, found
            ),
            UnitError::MissingExternalSchur => {
                write!(f, "external Schur complement requested but not supplied")
            }
            UnitError::InvalidIndex {
                context,
                position,
                value,
            } => write!(
                f,
                "invalid index {} at position {} of {}",
                value, position, context
            ),
            UnitError::SparseAssembly { context, detail } => {
                write!(f, "assembling {}: {}", context, detail)
            }
            UnitError::Load { kind, source } => write!(f, "loading {}: {}", kind, source),
        }
    }
}

impl Error for UnitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            UnitError::Load { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// A [`UnitError`] tagged with the unit that produced it.
#[derive(Debug)]
pub struct UnitFailure {
    pub unit: UnitId,
    pub error: UnitError,
}

impl UnitFailure {
    pub(crate) fn new(unit: UnitId, error: UnitError) -> Self {
        Self { unit, error }
    }
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.unit, self.error)
    }
}

impl Error for UnitFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

/// Non-fatal conditions detected while processing a unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WarningKind {
    /// The redundancy check of a coupled pair retained no kernel column even
    /// though the kernel basis had `candidate_columns > 0` columns. The pair
    /// contributes no constraint rows.
    RedundancyDetectionDegenerate { candidate_columns: usize },
}

/// A [`WarningKind`] tagged with the unit that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitWarning {
    pub unit: UnitId,
    pub kind: WarningKind,
}

impl fmt::Display for UnitWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            WarningKind::RedundancyDetectionDegenerate { candidate_columns } => write!(
                f,
                "{}: redundancy detection retained none of {} kernel columns",
                self.unit, candidate_columns
            ),
        }
    }
}

/// Errors returned by the preprocessing entry points.
#[derive(Debug)]
pub enum PreprocessError {
    /// One or more units failed. Outputs are withheld.
    ///
    /// `stage` is the earliest stage with a failure; failures of later stages
    /// of the same run follow those of `stage`.
    Batch {
        stage: Stage,
        failures: Vec<UnitFailure>,
    },

    /// A store lookup referenced a cluster or subdomain that does not exist.
    IndexOutOfRange {
        cluster: usize,
        subdomain: Option<usize>,
    },

    /// A subdomain handed to the store violates its invariants.
    Invalid { unit: UnitId, error: UnitError },

    /// A cluster layout with no clusters, or a subdomain stored at the wrong
    /// position, was supplied.
    InvalidLayout { reason: String },

    /// The bounded worker pool could not be created.
    WorkerPool { source: rayon::ThreadPoolBuildError },
}

impl PreprocessError {
    /// Returns all unit failures carried by this error.
    pub fn failures(&self) -> &[UnitFailure] {
        match self {
            PreprocessError::Batch { failures, .. } => failures,
            _ => &[],
        }
    }
}

impl fmt::Display for PreprocessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreprocessError::Batch { stage, failures } => {
                write!(f, "{} stage failed for {} unit(s)", stage, failures.len())?;
                for failure in failures {
                    write!(f, "\n  {}", failure)?;
                }
                Ok(())
            }
            PreprocessError::IndexOutOfRange {
                cluster,
                subdomain: Some(subdomain),
            } => write!(f, "no subdomain {} in cluster {}", subdomain, cluster),
            PreprocessError::IndexOutOfRange {
                cluster,
                subdomain: None,
            } => write!(f, "no cluster {}", cluster),
            PreprocessError::Invalid { unit, error } => {
                write!(f, "invalid subdomain data for {}: {}", unit, error)
            }
            PreprocessError::InvalidLayout { reason } => {
                write!(f, "invalid cluster layout: {}", reason)
            }
            PreprocessError::WorkerPool { source } => {
                write!(f, "creating worker pool: {}", source)
            }
        }
    }
}

impl Error for PreprocessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PreprocessError::Invalid { error, .. } => Some(error),
            PreprocessError::WorkerPool { source } => Some(source),
            _ => None,
        }
    }
}

pub(crate) type ArtifactIOResult<T> = std::result::Result<T, ArtifactIOError>;

/// Errors that can occur when saving or loading preprocessing artifacts.
#[derive(Debug)]
pub enum ArtifactIOError {
    /// Failed to create the target file before writing.
    Create { path: PathBuf, source: io::Error },

    /// Failed to open an existing artifact file for reading.
    Open { path: PathBuf, source: io::Error },

    /// Failed to flush buffered output when finishing a write.
    Flush { path: PathBuf, source: io::Error },

    /// Error serializing the artifacts to JSON.
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Error parsing JSON when reading artifacts from disk.
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The JSON `format` field does not match the expected format.
    FormatMismatch {
        path: PathBuf,
        found: String,
        expected: &'static str,
    },

    /// The JSON `version` field does not match the supported version.
    VersionMismatch {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
}

impl fmt::Display for ArtifactIOError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactIOError::Create { path, source } => {
                write!(f, "creating {}: {}", path.display(), source)
            }
            ArtifactIOError::Open { path, source } => {
                write!(f, "opening {}: {}", path.display(), source)
            }
            ArtifactIOError::Flush { path, source } => {
                write!(f, "flushing {}: {}", path.display(), source)
            }
            ArtifactIOError::Serialize { path, source } => {
                write!(f, "serializing JSON to {}: {}", path.display(), source)
            }
            ArtifactIOError::Parse { path, source } => {
                write!(f, "parsing JSON in {}: {}", path.display(), source)
            }
            ArtifactIOError::FormatMismatch {
                path,
                found,
                expected,
            } => write!(
                f,
                "unsupported format {:?} (expected {:?}) in {}",
                found,
                expected,
                path.display()
            ),
            ArtifactIOError::VersionMismatch {
                path,
                found,
                expected,
            } => write!(
                f,
                "unsupported version {} (expected {}) in {}",
                found,
                expected,
                path.display()
            ),
        }
    }
}

impl Error for ArtifactIOError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ArtifactIOError::Create { source, .. }
            | ArtifactIOError::Open { source, .. }
            | ArtifactIOError::Flush { source, .. } => Some(source),
            ArtifactIOError::Serialize { source, .. } | ArtifactIOError::Parse { source, .. } => {
                Some(source)
            }
            ArtifactIOError::FormatMismatch { .. }
            | ArtifactIOError::VersionMismatch { .. } => None,
        }
    }
}
