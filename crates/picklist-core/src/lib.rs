//! picklist-core - Core library for Picklist
//!
//! The pull-session reconciliation engine: an offline-capable record of
//! per-item pull progress for one order, a change listener that
//! classifies concurrent remote edits, operator-driven conflict
//! resolution, and an idempotent submission pipeline.

pub mod db;
pub mod engine;
pub mod error;
pub mod listener;
pub mod models;
pub mod remote;
pub mod resolve;
pub mod submit;

pub use error::{Error, Result};
pub use models::{ItemId, PullEntry, PullSession, RequestId};
