//! Bounded in-memory telemetry store
//!
//! One FIFO series per known metric. Mutation and snapshotting share a
//! single lock; the broadcast of each new snapshot happens after the lock
//! is released, so a slow observer never delays ingestion.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, trace};

use sysohub_api::telemetry::{DEFAULT_METRICS, StoreSnapshot, TelemetryPoint, TelemetryReading};

/// Points kept per metric
pub const MAX_POINTS: usize = 50;

const UPDATE_CAPACITY: usize = 64;

/// Published after every ingest
#[derive(Debug, Clone, PartialEq)]
pub struct StoreUpdate {
    /// The reading that triggered the update
    pub reading: TelemetryReading,
    /// Full store after the reading was applied
    pub snapshot: StoreSnapshot,
}

type Series = BTreeMap<String, VecDeque<TelemetryPoint>>;

#[derive(Debug)]
pub struct TelemetryStore {
    metrics: BTreeSet<String>,
    max_points: usize,
    series: Mutex<Series>,
    updates: broadcast::Sender<StoreUpdate>,
}

impl TelemetryStore {
    /// Create a store accepting only `metrics`, keeping `max_points` per metric
    pub fn new<I, S>(metrics: I, max_points: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            metrics: metrics.into_iter().map(Into::into).collect(),
            max_points: max_points.max(1),
            series: Mutex::new(BTreeMap::new()),
            updates,
        }
    }

    /// Receive a `StoreUpdate` for every subsequent ingest
    ///
    /// Receivers that fall behind skip to the newest updates.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreUpdate> {
        self.updates.subscribe()
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.metrics.iter().map(String::as_str)
    }

    pub fn is_known(&self, metric: &str) -> bool {
        self.metrics.contains(metric)
    }

    /// Append the known metrics of `reading` and broadcast the new snapshot
    ///
    /// Returns the number of points appended.
    pub fn ingest(&self, reading: &TelemetryReading) -> usize {
        let (appended, snapshot) = {
            let mut series = self.lock();
            let mut appended = 0;
            for (key, value) in &reading.values {
                if !self.is_known(key) {
                    trace!(metric = %key, "skipping unknown metric");
                    continue;
                }
                let buffer = series.entry(key.clone()).or_default();
                buffer.push_back(TelemetryPoint::new(reading.timestamp, *value));
                if buffer.len() > self.max_points {
                    buffer.pop_front();
                }
                appended += 1;
            }
            (appended, Self::copy(&series))
        };

        debug!(timestamp = reading.timestamp, appended, "ingested reading");

        // no receivers is not an error
        let _ = self.updates.send(StoreUpdate {
            reading: reading.clone(),
            snapshot,
        });

        appended
    }

    /// Consistent copy of every series
    pub fn snapshot(&self) -> StoreSnapshot {
        Self::copy(&self.lock())
    }

    fn copy(series: &Series) -> StoreSnapshot {
        StoreSnapshot(
            series
                .iter()
                .map(|(key, buffer)| (key.clone(), buffer.iter().copied().collect()))
                .collect(),
        )
    }

    fn lock(&self) -> MutexGuard<'_, Series> {
        self.series.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new(DEFAULT_METRICS, MAX_POINTS)
    }
}
