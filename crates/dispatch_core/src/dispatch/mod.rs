//! Driver dispatch: candidate ranking, notification rings, escalation and fallback.

mod engine;
pub mod scoring;

pub use engine::{DispatchEngine, DispatchHandle, DispatchOutcome, Wave};
pub use scoring::{rank_candidates, ring_for, score, DriverCandidate, ScoreInputs};
