//! Application state shared across HTTP handlers and background tasks

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::broadcast;

use sysohub_api::events::WsEvent;
use sysohub_api::responses::DashboardState;
use sysohub_telemetry::TelemetryStore;

use crate::config::DashboardSettings;
use crate::system::{ServiceMonitor, SystemSampler};

const EVENT_CAPACITY: usize = 64;

/// Application state shared across all handlers
pub struct AppState {
    /// Bounded telemetry series
    pub store: Arc<TelemetryStore>,
    /// Fan-out to WebSocket observers
    pub events: broadcast::Sender<WsEvent>,
    pub monitor: ServiceMonitor,
    pub sampler: SystemSampler,
    /// Application configuration
    pub settings: Arc<DashboardSettings>,
    broker_connected: AtomicBool,
}

impl AppState {
    /// Create new application state
    pub fn new(
        settings: DashboardSettings,
        monitor: ServiceMonitor,
        sampler: SystemSampler,
    ) -> Self {
        let store = TelemetryStore::new(
            settings.telemetry.metrics.iter().cloned(),
            settings.telemetry.max_points,
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store: Arc::new(store),
            events,
            monitor,
            sampler,
            settings: Arc::new(settings),
            broker_connected: AtomicBool::new(false),
        }
    }

    pub fn broker_connected(&self) -> bool {
        self.broker_connected.load(Ordering::Relaxed)
    }

    pub fn set_broker_connected(&self, connected: bool) {
        self.broker_connected.store(connected, Ordering::Relaxed);
    }

    /// Publish to every connected observer; having none is fine
    pub fn publish(&self, event: WsEvent) {
        let _ = self.events.send(event);
    }

    /// Everything the landing page shows, sampled now
    pub async fn dashboard(&self) -> DashboardState {
        DashboardState {
            store: self.store.snapshot(),
            services: self.monitor.status().await,
            system: self.sampler.sample(),
            broker_connected: self.broker_connected(),
            generated_at: Utc::now(),
        }
    }
}
