//! # Core Models Module
//!
//! This module contains the plain data types exchanged between the pipeline stages, the
//! external collaborators, and the ensemble analysis.
//!
//! ## Key Components
//!
//! - [`candidate`] - References to predicted 3-D structures tagged with their predictor
//! - [`result`] - The uniform result of any external tool invocation
//! - [`sequence`] - FASTA records describing the input RNA sequence
//!
//! None of these types perform I/O or hold mutable state; they are produced by one stage
//! and consumed, unchanged, by the next.

pub mod candidate;
pub mod result;
pub mod sequence;
