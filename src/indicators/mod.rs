// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicator bank. Every public
// function returns `Option<T>` (or an empty series) so callers are forced to
// handle insufficient-data and numerical-edge-case scenarios; the stateful
// engine in `snapshot.rs` turns those into `InsufficientData`.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod kdj;
pub mod keltner;
pub mod macd;
pub mod obv;
pub mod rsi;
pub mod snapshot;
pub mod volume;
pub mod vwap;
pub mod williams;

pub use snapshot::{IndicatorEngine, IndicatorSnapshot};
