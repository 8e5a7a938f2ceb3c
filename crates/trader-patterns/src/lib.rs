//! Pattern store: fingerprints of profitable trades, ranked by relevance to
//! current market conditions and updated from trade outcomes.

pub mod pattern;
pub mod relevance;
pub mod repo;
pub mod store;

pub use pattern::{ConditionValue, Pattern, PatternType, PredicateKey};
pub use relevance::{relevance, RelevanceWeights};
pub use repo::{InMemoryPatternRepository, JournalPatternRepository, PatternRepository};
pub use store::{PatternStore, PruneConfig};

use thiserror::Error;
use trader_persistence::PersistenceError;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("Pattern {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

pub type PatternResult<T> = Result<T, PatternError>;
