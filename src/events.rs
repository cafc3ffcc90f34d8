// =============================================================================
// Engine events — typed payloads delivered in production order
// =============================================================================
//
// Every state transition the dashboard cares about is a variant of
// `EngineEvent`. The bus is a tokio broadcast channel: subscribers receive
// events in the order the single-owner engine loop produced them, and a bus
// with no subscribers drops events silently (emission never fails).

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::Side;

/// Capacity of the broadcast channel. Slow subscribers past this lag see
/// `RecvError::Lagged` and miss the overwritten events.
const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EngineEvent {
    PositionOpened {
        id: String,
        symbol: String,
        side: Side,
        entry_price: f64,
        size: f64,
        leverage: u32,
        stop_loss: f64,
        take_profit_1: f64,
        take_profit_2: f64,
        take_profit_3: f64,
        at_ms: i64,
    },
    PositionReduced {
        id: String,
        price: f64,
        closed_size: f64,
        remaining_size: f64,
        realized_pnl: f64,
        reason: String,
        at_ms: i64,
    },
    PositionTp1 {
        id: String,
        price: f64,
        new_stop_loss: f64,
        remaining_size: f64,
        at_ms: i64,
    },
    PositionTp2 {
        id: String,
        price: f64,
        new_stop_loss: f64,
        remaining_size: f64,
        at_ms: i64,
    },
    PositionClosed {
        id: String,
        price: f64,
        realized_pnl: f64,
        reason: String,
        at_ms: i64,
    },
    AnalysisProgress {
        stage: String,
        step: usize,
        total: usize,
        at_ms: i64,
    },
}

impl EngineEvent {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PositionOpened { .. } => "position-opened",
            Self::PositionReduced { .. } => "position-reduced",
            Self::PositionTp1 { .. } => "position-tp1",
            Self::PositionTp2 { .. } => "position-tp2",
            Self::PositionClosed { .. } => "position-closed",
            Self::AnalysisProgress { .. } => "analysis-progress",
        }
    }
}

/// Broadcast bus for engine events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    /// Emit an event. Emission with no subscribers is a no-op.
    pub fn emit(&self, event: EngineEvent) {
        debug!(event = event.name(), "engine event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn progress(step: usize) -> EngineEvent {
        EngineEvent::AnalysisProgress {
            stage: format!("stage-{step}"),
            step,
            total: 8,
            at_ms: 0,
        }
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(progress(1));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn events_arrive_in_production_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.emit(progress(i));
        }

        for i in 0..5 {
            let event = rx.recv().await.unwrap();
            match event {
                EngineEvent::AnalysisProgress { step, .. } => assert_eq!(step, i),
                other => panic!("unexpected event {}", other.name()),
            }
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_see_every_event() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(progress(7));

        assert!(matches!(
            a.recv().await.unwrap(),
            EngineEvent::AnalysisProgress { step: 7, .. }
        ));
        assert!(matches!(
            b.recv().await.unwrap(),
            EngineEvent::AnalysisProgress { step: 7, .. }
        ));
    }

    #[test]
    fn serializes_with_kebab_case_tag() {
        let json = serde_json::to_string(&progress(2)).unwrap();
        assert!(json.contains("\"analysis-progress\""));
    }
}
