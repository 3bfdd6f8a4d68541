/////////////////////////////////////////////////////////////////////////////////////////////
//
// Re-exports the matrix helpers used across the feti_prep crates.
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Utilities for the `feti_prep` crate
//!
//! Small, allocation-explicit helpers for moving between the sparse storage
//! used for stiffness and constraint matrices and the dense blocks used by the
//! local factorisations.
mod sparse;
mod utils;

pub use {
    sparse::{
        nonzero_columns, sparse_from_dense, sparse_from_entries, sparse_to_dense, SparseEntry,
    },
    utils::{complement_indices, max_abs, max_asymmetry, select_mat_rows, stack_rows},
};
