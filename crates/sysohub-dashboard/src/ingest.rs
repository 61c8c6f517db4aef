//! Background tasks feeding the store and the WebSocket fan-out

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use sysohub_api::events::WsEvent;
use sysohub_telemetry::{Connect, RetryingConnector, Subscription, TelemetryError, parse_reading};

use crate::state::AppState;

/// Subscribe to the broker and ingest every reading until shutdown
///
/// A lost connection goes back through the connector. When the connector
/// gives up, the task ends and the daemon keeps serving the last-known
/// telemetry.
pub async fn run_ingest<C>(
    state: Arc<AppState>,
    connector: RetryingConnector,
    target: C,
    mut shutdown: watch::Receiver<bool>,
) where
    C: Connect,
    C::Connection: Subscription,
{
    loop {
        let mut connection = match connector.connect(&target).await {
            Ok(connection) => connection,
            Err(TelemetryError::Cancelled) => return,
            Err(e) => {
                error!(
                    broker = %target.describe(),
                    error = %e,
                    "broker unreachable, running degraded"
                );
                state.set_broker_connected(false);
                state.publish(WsEvent::BrokerDisconnected {
                    reason: e.to_string(),
                });
                return;
            }
        };

        state.set_broker_connected(true);
        state.publish(WsEvent::BrokerConnected {
            broker: target.describe(),
        });

        let reason = loop {
            tokio::select! {
                Ok(_) = shutdown.wait_for(|stop| *stop) => {
                    state.set_broker_connected(false);
                    return;
                }
                message = connection.recv() => match message {
                    Ok(payload) => match parse_reading(&payload) {
                        Ok(reading) => {
                            state.store.ingest(&reading);
                        }
                        Err(e) => warn!(error = %e, "dropping telemetry message"),
                    },
                    Err(e) => break e.to_string(),
                },
            }
        };

        warn!(reason = %reason, "lost broker connection, reconnecting");
        state.set_broker_connected(false);
        state.publish(WsEvent::BrokerDisconnected { reason });
    }
}

/// Turn every store update into a `DataUpdate` event for observers
pub async fn run_publisher(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) {
    let mut updates = state.store.subscribe();

    loop {
        let update = tokio::select! {
            Ok(_) = shutdown.wait_for(|stop| *stop) => return,
            update = updates.recv() => update,
        };

        match update {
            Ok(update) => {
                // probing services costs a process per unit
                if state.events.receiver_count() == 0 {
                    continue;
                }
                let services = state.monitor.status().await;
                let system = state.sampler.sample();
                state.publish(WsEvent::DataUpdate {
                    data: update.reading.raw,
                    store: update.snapshot,
                    services,
                    system,
                });
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "publisher lagged behind the store");
            }
            Err(RecvError::Closed) => {
                info!("store closed, publisher stopping");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use sysohub_exec::LocalExecutor;
    use sysohub_telemetry::BackoffPolicy;

    use crate::config::DashboardSettings;
    use crate::system::{ServiceMonitor, SystemSampler};

    /// Yields scripted payloads, then reports the connection as lost
    struct Scripted(VecDeque<Vec<u8>>);

    #[async_trait]
    impl Subscription for Scripted {
        async fn recv(&mut self) -> sysohub_telemetry::Result<Vec<u8>> {
            match self.0.pop_front() {
                Some(payload) => Ok(payload),
                None => Err(TelemetryError::Broker("connection reset".into())),
            }
        }
    }

    /// Hands out one scripted session per successful connect
    struct Sessions(Mutex<VecDeque<Option<Vec<&'static str>>>>);

    #[async_trait]
    impl Connect for Sessions {
        type Connection = Scripted;
        type Error = String;

        async fn connect(&self) -> Result<Scripted, String> {
            match self.0.lock().unwrap().pop_front() {
                Some(Some(payloads)) => Ok(Scripted(
                    payloads.into_iter().map(|p| p.as_bytes().to_vec()).collect(),
                )),
                _ => Err("refused".to_string()),
            }
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn state() -> Arc<AppState> {
        let settings = DashboardSettings::default();
        let monitor = ServiceMonitor::new(Arc::new(LocalExecutor::new()), Vec::new());
        Arc::new(AppState::new(settings, monitor, SystemSampler::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ingests_until_broker_gives_up() {
        let state = state();
        let mut events = state.events.subscribe();
        let (_tx, shutdown) = watch::channel(false);

        let sessions = Sessions(Mutex::new(VecDeque::from([
            Some(vec![r#"{"timestamp": 1, "temperature": 20}"#, "garbage"]),
            Some(vec![r#"{"timestamp": 2, "temperature": "21.5", "pH": 7}"#]),
        ])));
        let connector = RetryingConnector::new(BackoffPolicy::new(2, Duration::from_secs(1)));

        run_ingest(state.clone(), connector, sessions, shutdown).await;

        let snapshot = state.store.snapshot();
        assert_eq!(snapshot.series("temperature").len(), 2);
        assert_eq!(snapshot.series("pH").len(), 1);
        assert!(!state.broker_connected());

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(match event {
                WsEvent::BrokerConnected { .. } => "connected",
                WsEvent::BrokerDisconnected { .. } => "disconnected",
                WsEvent::DataUpdate { .. } => "data",
            });
        }
        assert_eq!(
            kinds,
            vec!["connected", "disconnected", "connected", "disconnected", "disconnected"]
        );
    }

    #[tokio::test]
    async fn test_publisher_forwards_updates() {
        let state = state();
        let (shutdown_tx, shutdown) = watch::channel(false);
        let mut events = state.events.subscribe();

        let publisher = tokio::spawn(run_publisher(state.clone(), shutdown));
        // let the publisher subscribe to the store
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        state
            .store
            .ingest(&parse_reading(br#"{"timestamp": 3, "EC": 1.5, "device": "n1"}"#).unwrap());

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            WsEvent::DataUpdate { data, store, .. } => {
                assert_eq!(data["timestamp"], 3);
                assert_eq!(data["device"], "n1");
                assert_eq!(store.series("EC").len(), 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        shutdown_tx.send(true).unwrap();
        publisher.await.unwrap();
    }
}
