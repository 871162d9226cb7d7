//! Error types for the mod-chart core.

use thiserror::Error;

use crate::machine::StateId;
use crate::timing::SongTime;

/// Result type alias for mod-chart core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the mod-chart core.
#[derive(Debug, Error)]
pub enum Error {
    /// A registration supplied a start time after its end time.
    #[error("invalid time range: start {start} is after end {end}")]
    InvalidTimeRange { start: SongTime, end: SongTime },

    /// A repeating trigger was registered with a non-positive interval.
    #[error("repeat interval must be positive, got {0}")]
    InvalidInterval(SongTime),

    /// Script compilation error.
    #[error("script parse error: {0}")]
    Parse(#[from] rhai::ParseError),

    /// Script runtime error raised inside a callback or at load time.
    #[error("script error: {0}")]
    Script(String),

    /// A single script call exceeded its instruction budget.
    #[error("script call exceeded its instruction budget")]
    BudgetExceeded,

    /// The script has been halted and no longer updates.
    #[error("script halted: {0}")]
    Halted(String),

    /// A state id does not refer to a node in the graph.
    #[error("unknown state {0}")]
    UnknownState(StateId),

    /// A child state was added to a non-composite node.
    #[error("state {0} is not a composite state")]
    NotComposite(StateId),

    /// A transition target is not legally reachable from the current
    /// activity configuration.
    #[error("illegal transition from {source} to {target}")]
    IllegalTransition { source: StateId, target: StateId },

    /// IO error while writing diagnostics.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Box<rhai::EvalAltResult>> for Error {
    fn from(err: Box<rhai::EvalAltResult>) -> Self {
        if matches!(*err, rhai::EvalAltResult::ErrorTooManyOperations(_)) {
            Error::BudgetExceeded
        } else {
            Error::Script(err.to_string())
        }
    }
}
