//! # Core Module
//!
//! This module provides the stateless building blocks of the pipeline: the data models
//! passed between stages, readers for sequence and structure files, and the geometric
//! primitives used to compare predicted structures.
//!
//! ## Architecture
//!
//! - **Data Models** ([`models`]) - Structural candidates, tool results, and FASTA records
//! - **File I/O** ([`io`]) - FASTA reading/writing and backbone extraction from PDB/mmCIF
//! - **Geometry** ([`utils`]) - Centroids, RMSD, and optimal rigid-body superposition
//!
//! Nothing in this module spawns processes or keeps state between calls; the stateful
//! parts of the pipeline live in [`crate::engine`] and [`crate::workflows`].

pub mod io;
pub mod models;
pub mod utils;
