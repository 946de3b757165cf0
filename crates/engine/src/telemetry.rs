use std::fmt::Display;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use common::{Action, Error, Result, Stage, TelemetryEvent};

/// Events buffered between the engine and the forwarder before new ones
/// are dropped.
pub const TELEMETRY_CAPACITY: usize = 1024;

const POST_TIMEOUT: Duration = Duration::from_secs(5);

/// Fire-and-forget sender handed to the scheduler and the lifecycle
/// manager. Emitting never blocks and never fails.
#[derive(Clone, Debug)]
pub struct Telemetry {
    tx: mpsc::Sender<TelemetryEvent>,
}

impl Telemetry {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TelemetryEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// A sink whose receiver is already gone.
    pub fn disabled() -> Self {
        Self::channel(1).0
    }

    pub fn emit(&self, event: TelemetryEvent) {
        // full or closed channel: the event is dropped
        let _ = self.tx.try_send(event);
    }

    pub fn fault(&self, asset: Option<&str>, stage: Stage, error: impl Display) {
        self.emit(TelemetryEvent::Fault {
            asset: asset.map(str::to_string),
            stage,
            error: error.to_string(),
        });
    }
}

/// Body posted to the dashboard for every signal decision.
#[derive(Debug, Serialize)]
struct SignalPost<'a> {
    asset: &'a str,
    action: Action,
    strategy: &'a str,
    confidence: f64,
    price: f64,
}

/// Drains the telemetry channel: logs every event and, when a dashboard
/// URL is configured, POSTs actionable signal decisions to it. Delivery failures are
/// logged at debug level and otherwise ignored.
pub struct TelemetryForwarder {
    rx: mpsc::Receiver<TelemetryEvent>,
    endpoint: Option<(Client, String)>,
}

impl TelemetryForwarder {
    pub fn new(rx: mpsc::Receiver<TelemetryEvent>, url: Option<String>) -> Result<Self> {
        let endpoint = match url {
            Some(url) => {
                let client = Client::builder()
                    .use_rustls_tls()
                    .timeout(POST_TIMEOUT)
                    .build()
                    .map_err(|e| Error::Http(e.to_string()))?;
                Some((client, url))
            }
            None => None,
        };
        Ok(Self { rx, endpoint })
    }

    /// Run until every `Telemetry` handle is dropped. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(dashboard = self.endpoint.is_some(), "Telemetry forwarder running");
        while let Some(event) = self.rx.recv().await {
            log_event(&event);
            if let Some(body) = dashboard_post(&event) {
                self.post(body).await;
            }
        }
        info!("Telemetry channel closed");
    }

    async fn post(&self, body: SignalPost<'_>) {
        let Some((client, url)) = &self.endpoint else {
            return;
        };
        match client.post(url).json(&body).send().await {
            Ok(resp) if !resp.status().is_success() => {
                debug!(status = %resp.status(), "Dashboard refused signal");
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Dashboard unreachable"),
        }
    }
}

/// The dashboard only hears about signals that cleared arbitration.
fn dashboard_post(event: &TelemetryEvent) -> Option<SignalPost<'_>> {
    match event {
        TelemetryEvent::SignalDecision {
            signal,
            adjusted_confidence,
            actionable: true,
            price,
        } => Some(SignalPost {
            asset: &signal.asset,
            action: signal.action,
            strategy: signal.strategy.as_str(),
            confidence: *adjusted_confidence,
            price: *price,
        }),
        _ => None,
    }
}

fn log_event(event: &TelemetryEvent) {
    match event {
        TelemetryEvent::SignalDecision {
            signal,
            adjusted_confidence,
            actionable,
            price,
        } => info!(
            asset = %signal.asset,
            action = %signal.action,
            strategy = %signal.strategy,
            confidence = adjusted_confidence,
            actionable,
            price,
            "Signal decision"
        ),
        TelemetryEvent::TradeOpened { trade } => info!(
            asset = %trade.asset,
            order_id = %trade.id,
            action = %trade.action,
            stake = trade.stake,
            level = trade.martingale_level,
            "Trade opened"
        ),
        TelemetryEvent::TradeSettled { record } => info!(
            asset = %record.asset,
            order_id = %record.order_id,
            outcome = %record.outcome,
            profit = record.profit,
            bankroll = record.bankroll,
            "Trade settled"
        ),
        TelemetryEvent::Fault {
            asset,
            stage,
            error,
        } => warn!(
            asset = asset.as_deref().unwrap_or("-"),
            stage = %stage,
            error = %error,
            "Fault"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::signal;

    #[tokio::test]
    async fn full_channel_drops_silently() {
        let (telemetry, mut rx) = Telemetry::channel(1);
        telemetry.fault(Some("EURUSD"), Stage::Candles, "timeout");
        telemetry.fault(Some("EURUSD"), Stage::Candles, "timeout again");
        assert!(matches!(rx.recv().await, Some(TelemetryEvent::Fault { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disabled_sink_accepts_events() {
        Telemetry::disabled().fault(None, Stage::Clock, "no clock");
    }

    #[test]
    fn only_actionable_decisions_reach_the_dashboard() {
        let decision = |action, confidence, actionable| TelemetryEvent::SignalDecision {
            signal: signal("EURUSD", action, "sma_cross", confidence),
            adjusted_confidence: confidence,
            actionable,
            price: 1.0842,
        };

        let taken = decision(Action::Put, 85.0, true);
        let body = dashboard_post(&taken).unwrap();
        assert_eq!(body.action, Action::Put);
        assert_eq!(body.strategy, "sma_cross");
        assert_eq!(body.confidence, 85.0);

        assert!(dashboard_post(&decision(Action::Call, 60.0, false)).is_none());
        assert!(dashboard_post(&decision(Action::Wait, 90.0, false)).is_none());
        let fault = TelemetryEvent::Fault {
            asset: None,
            stage: Stage::Clock,
            error: "no clock".into(),
        };
        assert!(dashboard_post(&fault).is_none());
    }

    #[tokio::test]
    async fn forwarder_survives_unreachable_dashboard() {
        let (telemetry, rx) = Telemetry::channel(8);
        // nothing listens on port 9 (discard)
        let forwarder =
            TelemetryForwarder::new(rx, Some("http://127.0.0.1:9/api/signals".into())).unwrap();
        telemetry.emit(TelemetryEvent::SignalDecision {
            signal: signal("EURUSD", Action::Call, "majority_of_three", 70.0),
            adjusted_confidence: 70.0,
            actionable: true,
            price: 1.0842,
        });
        drop(telemetry);
        forwarder.run().await;
    }
}
