//! Provides input/output functionality for sequence and structure files.
//!
//! This module reads the FASTA input of the pipeline and extracts backbone coordinates
//! from predicted 3-D structures in PDB or mmCIF format. Structure formats share the
//! [`traits::StructureFile`] interface so callers never need to know which format a
//! predictor wrote.

pub mod fasta;
pub mod structure;
pub mod traits;
