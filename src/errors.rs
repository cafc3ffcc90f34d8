// =============================================================================
// Engine error kinds
// =============================================================================
//
// Recoverable:
//   OutOfOrder, InsufficientData — handled by the caller, never fatal.
//   Unavailable                  — infrastructure down; the loop falls back to
//                                  cached data or skips the iteration.
// Caller bugs, returned unchanged:
//   AlreadyOpen, NotOpen
// Fatal at startup only:
//   ConfigInvalid
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A candle arrived with a timestamp strictly earlier than the last one
    /// in the series. The insert is rejected; no state is mutated.
    #[error("out-of-order candle: incoming {incoming} < last {last}")]
    OutOfOrder { incoming: i64, last: i64 },

    /// Not enough closed candles (or a non-finite intermediate value) to
    /// produce the requested output.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// An `open` was attempted while a position is already open.
    #[error("a position is already open")]
    AlreadyOpen,

    /// A position operation was attempted while flat.
    #[error("no open position")]
    NotOpen,

    /// An external collaborator (exchange, model, sentiment) failed or timed
    /// out.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Configuration failed validation. Fatal at startup.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl EngineError {
    pub fn insufficient(msg: impl Into<String>) -> Self {
        Self::InsufficientData(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}
