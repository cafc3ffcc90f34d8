pub mod candle_series;

pub use candle_series::{Candle, CandleKey, CandleSeries, CandleStore};
