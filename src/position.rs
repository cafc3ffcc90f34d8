// =============================================================================
// Position Book — single-position state machine with layered take-profits
// =============================================================================
//
// Life-cycle:
//   FLAT -> OPEN -> (TP1 hit) -> (TP2 hit) -> (TP3) -> CLOSED
//   and CLOSED at any point by stop-loss, trailing stop, signal reversal,
//   or a time-based exit.
//
// Exactly one position may be open at a time; `open` while non-flat is
// `AlreadyOpen`, position operations while flat are `NotOpen`.
//
// Transition rules on every price update:
//   1. Stop-loss crossed adversely        -> full close
//   2. TP1 first touch                    -> reduce by tp_weights[0] of the
//      ORIGINAL size, stop moves to breakeven (entry), tp1 latched
//   3. TP2 after TP1                      -> reduce by tp_weights[1] of the
//      original size, stop moves to TP1, target advances to TP3
//   4. TP3                                -> close the remainder
//   5. Trailing stop (when enabled)       -> full close
//
// Invariants enforced here: the stop only ratchets toward profit
// (monotonically non-decreasing for longs, non-increasing for shorts), size
// strictly decreases across exits and reaches 0 at close, and partial
// reductions are expressed as ratios of the original opened size.
//
// PnL per closed chunk: (exit - entry) * chunk * leverage * sign(side),
// minus fees of 2*(commission+slippage) on the chunk's notional. Every
// realized chunk is recorded into the daily-loss guard.
// =============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::daily_guard::DailyLossGuard;
use crate::errors::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::risk_plan::RiskPlan;
use crate::runtime_config::{ScheduleConfig, TrailingConfig};
use crate::types::{Side, SignalClass};

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Why a position (or part of it) was exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit1,
    TakeProfit2,
    TakeProfit3,
    SignalReversal,
    MaxHoldingTime,
    TimeDecay,
    TrailingStop,
    Manual,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "STOP"),
            Self::TakeProfit1 => write!(f, "TP1"),
            Self::TakeProfit2 => write!(f, "TP2"),
            Self::TakeProfit3 => write!(f, "TP3"),
            Self::SignalReversal => write!(f, "SIGNAL_REVERSAL"),
            Self::MaxHoldingTime => write!(f, "MAX_HOLDING_TIME"),
            Self::TimeDecay => write!(f, "TIME_DECAY"),
            Self::TrailingStop => write!(f, "TRAILING_STOP"),
            Self::Manual => write!(f, "MANUAL"),
        }
    }
}

/// A single tracked position. External callers receive clones; the book owns
/// the mutable instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    /// Remaining open size in asset units.
    pub size: f64,
    /// Size at open; partial exits are ratios of this.
    pub original_size: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub take_profit_3: f64,
    pub tp1_hit: bool,
    pub tp2_hit: bool,
    pub leverage: u32,
    pub opened_at_ms: i64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    /// Fractions of original size taken at TP1/TP2 (TP3 closes the rest).
    pub tp_weights: [f64; 3],
    /// Ratcheting trailing stop, when the feature is enabled.
    #[serde(default)]
    pub trailing_stop: Option<f64>,
    /// Best price seen since open (highest for longs, lowest for shorts).
    #[serde(default)]
    pub peak_price: f64,
    /// Latched after the one-shot losing-position time reduction.
    #[serde(default)]
    pub time_reduced: bool,
}

impl Position {
    /// Signed PnL percent at `price`, before leverage.
    pub fn pnl_pct(&self, price: f64) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        self.side.sign() * (price - self.entry_price) / self.entry_price * 100.0
    }

    fn holding_minutes(&self, now_ms: i64) -> f64 {
        (now_ms - self.opened_at_ms) as f64 / 60_000.0
    }
}

/// What happened to a position action, for the append-only trade log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeKind {
    Open,
    Reduce,
    Close,
}

/// Immutable log row written for every open / reduce / close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub position_id: String,
    pub symbol: String,
    pub side: Side,
    pub kind: TradeKind,
    pub price: f64,
    pub size: f64,
    #[serde(default)]
    pub realized_pnl: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
    pub at_ms: i64,
}

/// Aggregate trading performance for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceStats {
    pub total_trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub total_realized_pnl: f64,
}

// ---------------------------------------------------------------------------
// Position Book
// ---------------------------------------------------------------------------

/// Size below which a remainder is considered fully closed.
const DUST_SIZE: f64 = 1e-9;

pub struct PositionBook {
    position: RwLock<Option<Position>>,
    trade_log: RwLock<Vec<TradeRecord>>,
    bus: EventBus,
    guard: Arc<DailyLossGuard>,
    /// Round-trip fee rate: 2 * (commission + slippage).
    fee_rate: f64,
    trailing: TrailingConfig,
    schedule: ScheduleConfig,
}

impl PositionBook {
    pub fn new(
        bus: EventBus,
        guard: Arc<DailyLossGuard>,
        fee_rate: f64,
        trailing: TrailingConfig,
        schedule: ScheduleConfig,
    ) -> Self {
        Self {
            position: RwLock::new(None),
            trade_log: RwLock::new(Vec::new()),
            bus,
            guard,
            fee_rate,
            trailing,
            schedule,
        }
    }

    // -------------------------------------------------------------------
    // Open
    // -------------------------------------------------------------------

    /// Open a new position per the risk plan. `AlreadyOpen` while non-flat.
    pub fn open(
        &self,
        symbol: &str,
        side: Side,
        entry_price: f64,
        size: f64,
        plan: &RiskPlan,
        now_ms: i64,
    ) -> Result<Position, EngineError> {
        let mut slot = self.position.write();
        if slot.is_some() {
            return Err(EngineError::AlreadyOpen);
        }

        let position = Position {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            size,
            original_size: size,
            entry_price,
            current_price: entry_price,
            stop_loss: plan.stop_loss,
            take_profit_1: plan.take_profit_1,
            take_profit_2: plan.take_profit_2,
            take_profit_3: plan.take_profit_3,
            tp1_hit: false,
            tp2_hit: false,
            leverage: plan.leverage,
            opened_at_ms: now_ms,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            tp_weights: plan.tp_weights,
            trailing_stop: None,
            peak_price: entry_price,
            time_reduced: false,
        };

        info!(
            id = %position.id,
            symbol,
            side = %side,
            entry_price,
            size,
            leverage = position.leverage,
            stop_loss = position.stop_loss,
            tp1 = position.take_profit_1,
            tp2 = position.take_profit_2,
            tp3 = position.take_profit_3,
            "position opened"
        );

        self.log_trade(&position, TradeKind::Open, entry_price, size, None, None, now_ms);
        self.bus.emit(EngineEvent::PositionOpened {
            id: position.id.clone(),
            symbol: position.symbol.clone(),
            side,
            entry_price,
            size,
            leverage: position.leverage,
            stop_loss: position.stop_loss,
            take_profit_1: position.take_profit_1,
            take_profit_2: position.take_profit_2,
            take_profit_3: position.take_profit_3,
            at_ms: now_ms,
        });

        *slot = Some(position.clone());
        Ok(position)
    }

    // -------------------------------------------------------------------
    // Price updates and transitions
    // -------------------------------------------------------------------

    /// Feed a price into the state machine and run every transition rule.
    pub fn update_price(&self, price: f64, now_ms: i64) {
        let mut slot = self.position.write();
        let Some(pos) = slot.as_mut() else {
            return;
        };

        pos.current_price = price;
        pos.unrealized_pnl =
            (price - pos.entry_price) * pos.size * pos.leverage as f64 * pos.side.sign();

        // Trailing stop tracking (optional transition).
        if self.trailing.enabled {
            let improved = match pos.side {
                Side::Long => price > pos.peak_price,
                Side::Short => price < pos.peak_price,
            };
            if improved {
                pos.peak_price = price;
                let candidate =
                    pos.peak_price * (1.0 - pos.side.sign() * self.trailing.pct / 100.0);
                let ratcheted = match (pos.trailing_stop, pos.side) {
                    (Some(t), Side::Long) => t.max(candidate),
                    (Some(t), Side::Short) => t.min(candidate),
                    (None, _) => candidate,
                };
                pos.trailing_stop = Some(ratcheted);
                debug!(id = %pos.id, trailing_stop = ratcheted, "trailing stop ratcheted");
            }
        }

        // 1. Stop-loss.
        if adverse_cross(pos.side, price, pos.stop_loss) {
            self.close_locked(&mut slot, price, ExitReason::StopLoss, now_ms);
            return;
        }

        // 2. TP1 — first touch: partial exit and breakeven migration.
        if !pos.tp1_hit && favorable_cross(pos.side, price, pos.take_profit_1) {
            let chunk = pos.tp_weights[0] * pos.original_size;
            let breakeven = pos.entry_price;
            self.reduce_chunk(pos, price, chunk, ExitReason::TakeProfit1, now_ms);
            raise_stop(pos, breakeven);
            pos.tp1_hit = true;
            self.bus.emit(EngineEvent::PositionTp1 {
                id: pos.id.clone(),
                price,
                new_stop_loss: pos.stop_loss,
                remaining_size: pos.size,
                at_ms: now_ms,
            });
        }

        // 3. TP2 — after TP1: second partial, stop migrates to TP1.
        if pos.tp1_hit && !pos.tp2_hit && favorable_cross(pos.side, price, pos.take_profit_2) {
            let chunk = (pos.tp_weights[1] * pos.original_size).min(pos.size);
            let tp1_level = pos.take_profit_1;
            self.reduce_chunk(pos, price, chunk, ExitReason::TakeProfit2, now_ms);
            raise_stop(pos, tp1_level);
            pos.tp2_hit = true;
            self.bus.emit(EngineEvent::PositionTp2 {
                id: pos.id.clone(),
                price,
                new_stop_loss: pos.stop_loss,
                remaining_size: pos.size,
                at_ms: now_ms,
            });
        }

        // 4. TP3 — the full target closes the remainder.
        if pos.tp2_hit && favorable_cross(pos.side, price, pos.take_profit_3) {
            self.close_locked(&mut slot, price, ExitReason::TakeProfit3, now_ms);
            return;
        }

        // 5. Trailing stop.
        if let Some(pos) = slot.as_ref() {
            if let Some(trail) = pos.trailing_stop {
                if adverse_cross(pos.side, price, trail) {
                    self.close_locked(&mut slot, price, ExitReason::TrailingStop, now_ms);
                }
            }
        }
    }

    /// React to a fresh signal: a confident strong signal against the open
    /// side closes (conf >= 0.8) or halves (0.6..0.8) the position.
    pub fn apply_signal(
        &self,
        class: SignalClass,
        confidence: f64,
        price: f64,
        now_ms: i64,
    ) {
        let mut slot = self.position.write();
        let Some(pos) = slot.as_mut() else {
            return;
        };

        let opposite = class.is_strong() && class.side() == Some(pos.side.opposite());
        if !opposite {
            return;
        }

        if confidence >= 0.8 {
            info!(id = %pos.id, class = %class, confidence, "strong reversal — closing");
            self.close_locked(&mut slot, price, ExitReason::SignalReversal, now_ms);
        } else if confidence >= 0.6 {
            info!(id = %pos.id, class = %class, confidence, "reversal warning — halving");
            let chunk = (0.5 * pos.original_size).min(pos.size);
            if chunk >= pos.size - DUST_SIZE {
                self.close_locked(&mut slot, price, ExitReason::SignalReversal, now_ms);
            } else {
                self.reduce_chunk(pos, price, chunk, ExitReason::SignalReversal, now_ms);
            }
        }
    }

    /// Holding-time exits: hard close at the max holding period, a one-shot
    /// 50% reduction for a stale loser, and a full close for a persistent
    /// one.
    pub fn check_time_exits(&self, price: f64, now_ms: i64) {
        let mut slot = self.position.write();
        let Some(pos) = slot.as_mut() else {
            return;
        };

        let minutes = pos.holding_minutes(now_ms);
        let hours = minutes / 60.0;
        let pnl_pct = pos.pnl_pct(price);

        if hours >= self.schedule.max_holding_hours {
            self.close_locked(&mut slot, price, ExitReason::MaxHoldingTime, now_ms);
            return;
        }

        if minutes > 3.0 * self.schedule.min_holding_minutes && pnl_pct < -1.0 {
            self.close_locked(&mut slot, price, ExitReason::TimeDecay, now_ms);
            return;
        }

        if minutes > self.schedule.min_holding_minutes && pnl_pct < -0.5 && !pos.time_reduced {
            let chunk = (0.5 * pos.original_size).min(pos.size);
            if chunk >= pos.size - DUST_SIZE {
                self.close_locked(&mut slot, price, ExitReason::TimeDecay, now_ms);
            } else {
                self.reduce_chunk(pos, price, chunk, ExitReason::TimeDecay, now_ms);
                pos.time_reduced = true;
            }
        }
    }

    // -------------------------------------------------------------------
    // Manual operations
    // -------------------------------------------------------------------

    /// Close the full remainder at `price`. `NotOpen` while flat.
    pub fn close(&self, price: f64, reason: ExitReason, now_ms: i64) -> Result<f64, EngineError> {
        let mut slot = self.position.write();
        if slot.is_none() {
            return Err(EngineError::NotOpen);
        }
        Ok(self.close_locked(&mut slot, price, reason, now_ms))
    }

    /// Reduce by `ratio` of the original size. `NotOpen` while flat.
    pub fn reduce(
        &self,
        ratio: f64,
        price: f64,
        reason: ExitReason,
        now_ms: i64,
    ) -> Result<f64, EngineError> {
        let mut slot = self.position.write();
        let Some(pos) = slot.as_mut() else {
            return Err(EngineError::NotOpen);
        };
        let chunk = (ratio.clamp(0.0, 1.0) * pos.original_size).min(pos.size);
        if chunk >= pos.size - DUST_SIZE {
            return Ok(self.close_locked(&mut slot, price, reason, now_ms));
        }
        Ok(self.reduce_chunk(pos, price, chunk, reason, now_ms))
    }

    // -------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------

    pub fn is_open(&self) -> bool {
        self.position.read().is_some()
    }

    /// Immutable snapshot of the open position, if any.
    pub fn snapshot(&self) -> Option<Position> {
        self.position.read().clone()
    }

    /// The most recent `limit` trade records, newest first.
    pub fn trade_history(&self, limit: usize) -> Vec<TradeRecord> {
        let log = self.trade_log.read();
        log.iter().rev().take(limit).cloned().collect()
    }

    /// Aggregate performance over completed positions: a position is a win
    /// when the sum of its realized chunks is positive.
    pub fn performance(&self) -> PerformanceStats {
        let log = self.trade_log.read();

        let mut per_position: std::collections::HashMap<&str, f64> =
            std::collections::HashMap::new();
        let mut closed_ids: Vec<&str> = Vec::new();

        for record in log.iter() {
            if let Some(pnl) = record.realized_pnl {
                *per_position.entry(record.position_id.as_str()).or_insert(0.0) += pnl;
            }
            if record.kind == TradeKind::Close {
                closed_ids.push(record.position_id.as_str());
            }
        }

        let total_trades = closed_ids.len();
        let wins = closed_ids
            .iter()
            .filter(|id| per_position.get(**id).copied().unwrap_or(0.0) > 0.0)
            .count();
        let total_realized_pnl: f64 = per_position.values().sum();
        let win_rate = if total_trades > 0 {
            wins as f64 / total_trades as f64
        } else {
            0.0
        };

        PerformanceStats {
            total_trades,
            wins,
            win_rate,
            total_realized_pnl,
        }
    }

    // -------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------

    /// Realize PnL for a chunk: directional move times leverage, minus the
    /// round-trip fee on the chunk's notional. The guard sees every chunk.
    fn chunk_pnl(&self, pos: &Position, price: f64, chunk: f64) -> f64 {
        let gross =
            (price - pos.entry_price) * chunk * pos.leverage as f64 * pos.side.sign();
        let fees = self.fee_rate * pos.entry_price * chunk * pos.leverage as f64;
        gross - fees
    }

    fn reduce_chunk(
        &self,
        pos: &mut Position,
        price: f64,
        chunk: f64,
        reason: ExitReason,
        now_ms: i64,
    ) -> f64 {
        let chunk = chunk.min(pos.size);
        let pnl = self.chunk_pnl(pos, price, chunk);
        pos.size -= chunk;
        pos.realized_pnl += pnl;
        self.guard.record(pnl);

        info!(
            id = %pos.id,
            reason = %reason,
            price,
            chunk,
            remaining = pos.size,
            pnl,
            "position reduced"
        );

        self.log_trade(
            pos,
            TradeKind::Reduce,
            price,
            chunk,
            Some(pnl),
            Some(reason),
            now_ms,
        );
        self.bus.emit(EngineEvent::PositionReduced {
            id: pos.id.clone(),
            price,
            closed_size: chunk,
            remaining_size: pos.size,
            realized_pnl: pnl,
            reason: reason.to_string(),
            at_ms: now_ms,
        });

        pnl
    }

    fn close_locked(
        &self,
        slot: &mut Option<Position>,
        price: f64,
        reason: ExitReason,
        now_ms: i64,
    ) -> f64 {
        let Some(mut pos) = slot.take() else {
            return 0.0;
        };
        let chunk = pos.size;
        let pnl = self.chunk_pnl(&pos, price, chunk);
        pos.size = 0.0;
        pos.realized_pnl += pnl;
        pos.current_price = price;
        pos.unrealized_pnl = 0.0;
        self.guard.record(pnl);

        info!(
            id = %pos.id,
            reason = %reason,
            price,
            chunk,
            total_realized = pos.realized_pnl,
            "position closed"
        );

        self.log_trade(
            &pos,
            TradeKind::Close,
            price,
            chunk,
            Some(pnl),
            Some(reason),
            now_ms,
        );
        self.bus.emit(EngineEvent::PositionClosed {
            id: pos.id.clone(),
            price,
            realized_pnl: pos.realized_pnl,
            reason: reason.to_string(),
            at_ms: now_ms,
        });

        pos.realized_pnl
    }

    #[allow(clippy::too_many_arguments)]
    fn log_trade(
        &self,
        pos: &Position,
        kind: TradeKind,
        price: f64,
        size: f64,
        realized_pnl: Option<f64>,
        reason: Option<ExitReason>,
        at_ms: i64,
    ) {
        self.trade_log.write().push(TradeRecord {
            id: Uuid::new_v4().to_string(),
            position_id: pos.id.clone(),
            symbol: pos.symbol.clone(),
            side: pos.side,
            kind,
            price,
            size,
            realized_pnl,
            reason: reason.map(|r| r.to_string()),
            at_ms,
        });
    }
}

/// Price has crossed `level` against the position.
fn adverse_cross(side: Side, price: f64, level: f64) -> bool {
    match side {
        Side::Long => price <= level,
        Side::Short => price >= level,
    }
}

/// Price has crossed `level` in the position's favor.
fn favorable_cross(side: Side, price: f64, level: f64) -> bool {
    match side {
        Side::Long => price >= level,
        Side::Short => price <= level,
    }
}

/// Ratchet the stop toward profit only: non-decreasing for longs,
/// non-increasing for shorts.
fn raise_stop(pos: &mut Position, candidate: f64) {
    pos.stop_loss = match pos.side {
        Side::Long => pos.stop_loss.max(candidate),
        Side::Short => pos.stop_loss.min(candidate),
    };
}
