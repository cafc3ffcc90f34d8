// =============================================================================
// Daily-loss circuit — blocks new opens after the day's loss budget is spent
// =============================================================================
//
// Cumulative realized PnL for the local calendar day is tracked; once the
// loss reaches the limit, no new positions open until local midnight. The
// reset is a date-string comparison performed on every query, the same
// pattern the rest of the engine uses for daily counters.

use chrono::Local;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug)]
struct Inner {
    date: String,
    realized_pnl: f64,
    trades: u32,
}

/// Serializable snapshot for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct DailyLossState {
    pub date: String,
    pub realized_pnl: f64,
    pub daily_loss: f64,
    pub daily_loss_limit: f64,
    pub trades: u32,
    pub tripped: bool,
}

pub struct DailyLossGuard {
    inner: RwLock<Inner>,
    limit: f64,
}

impl DailyLossGuard {
    pub fn new(limit: f64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                date: today(),
                realized_pnl: 0.0,
                trades: 0,
            }),
            limit,
        }
    }

    /// Record the realized PnL of a closed (or partially closed) trade.
    pub fn record(&self, pnl: f64) {
        self.maybe_reset();
        let mut s = self.inner.write();
        s.realized_pnl += pnl;
        s.trades += 1;

        let loss = (-s.realized_pnl).max(0.0);
        if loss >= self.limit {
            warn!(
                daily_loss = loss,
                limit = self.limit,
                "daily loss circuit tripped — no new opens until local midnight"
            );
        }
    }

    /// Whether a new position may be opened. Returns `(false, reason)` when
    /// the circuit is tripped.
    pub fn can_open(&self) -> (bool, Option<String>) {
        self.maybe_reset();
        let s = self.inner.read();
        let loss = (-s.realized_pnl).max(0.0);
        if loss >= self.limit {
            return (
                false,
                Some(format!(
                    "daily loss {loss:.2} at or above limit {:.2}; blocked until local midnight",
                    self.limit
                )),
            );
        }
        (true, None)
    }

    pub fn state(&self) -> DailyLossState {
        self.maybe_reset();
        let s = self.inner.read();
        let loss = (-s.realized_pnl).max(0.0);
        DailyLossState {
            date: s.date.clone(),
            realized_pnl: s.realized_pnl,
            daily_loss: loss,
            daily_loss_limit: self.limit,
            trades: s.trades,
            tripped: loss >= self.limit,
        }
    }

    /// Reset counters when the local date has rolled over.
    fn maybe_reset(&self) {
        let now = today();
        {
            let s = self.inner.read();
            if s.date == now {
                return;
            }
        }
        let mut s = self.inner.write();
        if s.date != now {
            info!(old = %s.date, new = %now, "local date rolled — daily loss counters reset");
            s.date = now;
            s.realized_pnl = 0.0;
            s.trades = 0;
        }
    }

    #[cfg(test)]
    fn force_date(&self, date: &str) {
        self.inner.write().date = date.to_string();
    }
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}
