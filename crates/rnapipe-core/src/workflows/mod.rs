//! # Workflows Module
//!
//! The user-facing entry points of the library: the stage orchestrator that runs a complete
//! prediction pipeline in one output directory, and the report writer that summarizes it.
//!
//! ## Overview
//!
//! A run reads one RNA sequence and passes it through sequence analysis, secondary structure
//! prediction, 3-D prediction with one or more predictors, ensemble clustering, and model
//! scoring. Each stage delegates its computation to a [`crate::tools::Collaborator`] and records
//! its outcome in the persisted [`crate::engine::state::PipelineState`], so an interrupted run
//! can be started again and continues where it stopped.
//!
//! ## Architecture
//!
//! - **Pipeline** ([`pipeline`]) - Stage ordering, skip/resume decisions, and the hand-off of
//!   each stage's outputs to the next
//! - **Output Layout** ([`layout`]) - The directory conventions every stage writes to
//! - **Resume** ([`resume`]) - Restoring the outputs of completed stages from disk
//! - **Report** ([`report`]) - The Markdown summary of a run

pub mod layout;
pub mod pipeline;
pub mod report;
pub mod resume;
