//! Infrastructure implementations for Docflow.
//!
//! Implements the ports defined in `docflow-core`:
//! - `sqlite` -- the durable execution log on SQLite (WAL, split pools)
//! - `store` -- filesystem document store with input/output containers
//! - `activity` -- the three stage adapters (extract, summarize, persist)
//! - `watch` -- debounced input-container watcher (trigger source)
//! - `config` -- `config.toml` loading with warn-and-default behavior

pub mod activity;
pub mod config;
pub mod sqlite;
pub mod store;
pub mod watch;
