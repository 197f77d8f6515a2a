//! # rnapipe Core Library
//!
//! A resumable pipeline for predicting the 3-D structure of an RNA molecule from its sequence
//! with an ensemble of external predictors.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict layering so that the stateful orchestration stays separate
//! from the numerics and from the external programs it drives.
//!
//! - **[`core`]: The Foundation.** Stateless data models (`StructuralCandidate`,
//!   `ToolInvocationResult`), FASTA and PDB/mmCIF readers, and the superposition geometry.
//!
//! - **[`engine`]: The Logic Core.** The persisted stage state machine, the device dispatcher
//!   with its merge rules, and the ensemble clustering engine.
//!
//! - **[`tools`]: The Collaborators.** The `Collaborator` contract and the subprocess-backed
//!   wrappers around the sequence search, folding, prediction, and scoring programs.
//!
//! - **[`workflows`]: The Public API.** The stage orchestrator, which ties `engine`, `tools`,
//!   and `core` together into a complete run, and the report writer.

pub mod core;
pub mod engine;
pub mod tools;
pub mod workflows;
