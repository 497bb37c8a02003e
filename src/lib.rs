//! apiwatch: online API misuse and failure detection
//!
//! Ingests HTTP request observations, aggregates them into fixed-size
//! behavioral windows per traffic source, scores each completed window
//! with a hybrid of deterministic rules and four statistical models,
//! classifies the result into a prioritized detection with a root cause
//! and ranked remediation actions, persists it, and streams it to
//! subscribed dashboards.
//!
//! # Architecture
//! ```text
//! observation ──▶ filter ──▶ window aggregator ──(sealed window)──▶ scoring worker
//!                                                                      │
//!                              features ──▶ rules ─┐                   │
//!                                        ──▶ models ┼──▶ hybrid score  │
//!                                                   │        │         │
//!                                           root cause ──▶ resolutions │
//!                                                            │         │
//!                    history ring (SIM) ◀── detection ◀──────┘         │
//!                    batched writer     ◀──     │                      │
//!                    event bus fan-out  ◀───────┘ ◀────────────────────┘
//! ```
//!
//! Live traffic and the synthetic simulator feed the same pipeline under
//! different modes; the two never share counters, windows or journal
//! entries.

pub mod api;
pub mod bus;
pub mod config;
pub mod core;
pub mod detector;
pub mod features;
pub mod history;
pub mod models;
pub mod resolution;
pub mod root_cause;
pub mod rules;
pub mod scoring;
pub mod simulation;
pub mod storage;

pub use crate::config::Config;
pub use crate::core::{Detection, Mode, Observation, Priority, RootCause, RuleAlert};
pub use crate::detector::Detector;
pub use crate::features::FeatureVector;
pub use crate::models::ModelSet;
pub use crate::simulation::{AnomalyPattern, SimulationError};
pub use crate::storage::Database;
