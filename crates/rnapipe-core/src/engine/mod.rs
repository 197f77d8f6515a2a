//! # Engine Module
//!
//! The stateful machinery behind a pipeline run.
//!
//! ## Overview
//!
//! The engine holds everything the orchestrator in [`crate::workflows`] composes: the persisted
//! stage state machine that makes a run restartable, the device dispatcher that spreads a batch
//! of seeds over a pool of accelerators and folds the partial results back together, and the
//! clustering engine that groups predicted structures into consensus families.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Tool locations, ensemble parameters, and execution limits
//! - **State Tracking** ([`state`]) - Stage keys, statuses, and the crash-safe state file
//! - **Device Dispatch** ([`dispatch`]) - Round-robin partitioning, concurrent execution, merging
//! - **Ensemble Clustering** ([`cluster`]) - Pairwise RMSD, average linkage, consensus labelling
//! - **Progress Monitoring** ([`progress`]) - Progress events for front-ends
//! - **Error Handling** ([`error`]) - The errors that abort a run

pub mod cluster;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod progress;
pub mod state;
