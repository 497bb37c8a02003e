//! Core data types
//!
//! Observations, windows and detection records shared by every stage of
//! the pipeline.

pub mod detection;
pub mod observation;
pub mod window;

pub use detection::{
    Condition, Detection, ModelScores, Priority, Resolution, RootCause, RuleAlert, SubModel,
};
pub use observation::{FilterDecision, HttpMethod, Mode, Observation, ObservationFilter};
pub use window::{StreamSnapshot, Window, WindowAggregator, DEFAULT_WINDOW_SIZE};
