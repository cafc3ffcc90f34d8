// =============================================================================
// Shared types used across the Borealis signal engine
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1.0 for longs, -1.0 for shorts. Used in PnL and TP/SL placement math.
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Five-level categorical trading signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalClass {
    StrongSell,
    Sell,
    Hold,
    Buy,
    StrongBuy,
}

impl SignalClass {
    /// Discretize a combined score in [0, 100] into a signal class.
    ///
    /// Boundaries: >= 80 STRONG_BUY, >= 65 BUY, <= 20 STRONG_SELL,
    /// <= 35 SELL, else HOLD.
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::StrongBuy
        } else if score >= 65.0 {
            Self::Buy
        } else if score <= 20.0 {
            Self::StrongSell
        } else if score <= 35.0 {
            Self::Sell
        } else {
            Self::Hold
        }
    }

    /// The side this class argues for, if any.
    pub fn side(self) -> Option<Side> {
        match self {
            Self::StrongBuy | Self::Buy => Some(Side::Long),
            Self::StrongSell | Self::Sell => Some(Side::Short),
            Self::Hold => None,
        }
    }

    pub fn is_strong(self) -> bool {
        matches!(self, Self::StrongBuy | Self::StrongSell)
    }
}

impl std::fmt::Display for SignalClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrongSell => write!(f, "STRONG_SELL"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
            Self::Buy => write!(f, "BUY"),
            Self::StrongBuy => write!(f, "STRONG_BUY"),
        }
    }
}

/// Concrete action recommended to the position layer for this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    OpenLong,
    OpenShort,
    ClosePosition,
    ReducePosition,
    Hold,
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenLong => write!(f, "OPEN_LONG"),
            Self::OpenShort => write!(f, "OPEN_SHORT"),
            Self::ClosePosition => write!(f, "CLOSE_POSITION"),
            Self::ReducePosition => write!(f, "REDUCE_POSITION"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Candle interval. Parsed case-insensitively at every ingress point so that
/// `1H` and `1h` normalize to the same variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Interval {
    /// Duration of one candle in milliseconds.
    pub fn millis(self) -> i64 {
        match self {
            Self::M1 => 60_000,
            Self::M5 => 300_000,
            Self::M15 => 900_000,
            Self::M30 => 1_800_000,
            Self::H1 => 3_600_000,
            Self::H4 => 14_400_000,
            Self::D1 => 86_400_000,
        }
    }

    /// Canonical lowercase form used on the wire ("1m", "1h", ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s.trim().to_lowercase().as_str() {
            "1m" => Ok(Self::M1),
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "30m" => Ok(Self::M30),
            "1h" | "60m" => Ok(Self::H1),
            "4h" => Ok(Self::H4),
            "1d" | "24h" => Ok(Self::D1),
            other => Err(EngineError::ConfigInvalid(format!(
                "unrecognized interval: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Volatility bucket derived from the ATR percentile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
    Extreme,
}

impl std::fmt::Display for VolatilityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Extreme => write!(f, "EXTREME"),
        }
    }
}

/// Liquidity bucket derived from volume ratio and spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidityLabel {
    High,
    Medium,
    Low,
    Illiquid,
}

impl std::fmt::Display for LiquidityLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
            Self::Illiquid => write!(f, "ILLIQUID"),
        }
    }
}

/// Latest 24h market snapshot for a symbol, as returned by the exchange
/// adapter. Lives for one analysis iteration unless cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTick {
    pub symbol: String,
    pub price: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub volume_24h: f64,
    /// 24h change as a percentage.
    pub change_24h: f64,
    #[serde(default)]
    pub funding_rate: Option<f64>,
    #[serde(default)]
    pub open_interest: Option<f64>,
    /// Fear & Greed index in [0, 100], when the sentiment adapter is present.
    #[serde(default)]
    pub fgi: Option<f64>,
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_parse_is_case_insensitive() {
        assert_eq!(Interval::parse("1h").unwrap(), Interval::H1);
        assert_eq!(Interval::parse("1H").unwrap(), Interval::H1);
        assert_eq!(Interval::parse(" 15M ").unwrap(), Interval::M15);
        assert!(Interval::parse("7m").is_err());
    }

    #[test]
    fn interval_millis() {
        assert_eq!(Interval::M1.millis(), 60_000);
        assert_eq!(Interval::H1.millis(), 3_600_000);
        assert_eq!(Interval::D1.millis(), 86_400_000);
    }

    #[test]
    fn signal_class_boundaries() {
        assert_eq!(SignalClass::from_score(80.0), SignalClass::StrongBuy);
        assert_eq!(SignalClass::from_score(79.9), SignalClass::Buy);
        assert_eq!(SignalClass::from_score(65.0), SignalClass::Buy);
        assert_eq!(SignalClass::from_score(50.0), SignalClass::Hold);
        assert_eq!(SignalClass::from_score(35.0), SignalClass::Sell);
        assert_eq!(SignalClass::from_score(20.0), SignalClass::StrongSell);
    }

    #[test]
    fn signal_class_side() {
        assert_eq!(SignalClass::Buy.side(), Some(Side::Long));
        assert_eq!(SignalClass::StrongSell.side(), Some(Side::Short));
        assert_eq!(SignalClass::Hold.side(), None);
    }

    #[test]
    fn side_sign_and_opposite() {
        assert_eq!(Side::Long.sign(), 1.0);
        assert_eq!(Side::Short.sign(), -1.0);
        assert_eq!(Side::Long.opposite(), Side::Short);
    }

    #[test]
    fn display_strings() {
        assert_eq!(format!("{}", TradeAction::OpenLong), "OPEN_LONG");
        assert_eq!(format!("{}", SignalClass::StrongBuy), "STRONG_BUY");
        assert_eq!(format!("{}", Interval::H1), "1h");
    }
}
