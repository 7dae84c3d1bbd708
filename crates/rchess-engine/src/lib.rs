//! UCI chess engine adapter.
//!
//! Drives an out-of-process UCI engine (Stockfish or compatible) and turns
//! "position + strength level" into a move recommendation plus a stream of
//! evaluations, with at most one search in flight and a bounded wait.

pub mod adapter;
pub mod config;
pub mod error;
pub mod protocol;
pub mod strength;
pub mod types;
pub mod worker;

pub use adapter::{EngineAdapter, SearchHandle, SessionState};
pub use config::AdapterConfig;
pub use error::AdapterError;
pub use protocol::{EngineLine, InfoSnapshot, UciCommand};
pub use strength::{BudgetTiers, Difficulty, SearchBudget, clamp_strength};
pub use types::{
    Color, Evaluation, EvaluationCallback, OutcomeCallback, Promotion, ScoreKind, SearchOutcome,
    SearchRequest, Square, START_FEN, UciMove,
};
pub use worker::{EngineLauncher, EngineWorker, LaunchedWorker, ProcessLauncher};
