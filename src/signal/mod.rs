pub mod fusion;
pub mod technical;

pub use fusion::{synthesize, ModelForecast, SignalResult};
pub use technical::{technical_score, TechnicalScore};
