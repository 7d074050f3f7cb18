//! Shared domain types for Docflow.
//!
//! This crate contains the core domain types used across the Docflow
//! pipeline: Job, Stage, StageAttempt, pipeline configuration, and their
//! associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod job;
