//! MQTT broker connection

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::connector::{Connect, Subscription};
use crate::error::{Result, TelemetryError};

const REQUEST_CAPACITY: usize = 16;

/// Broker address, credentials and subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
    pub keep_alive: Duration,
}

impl BrokerSettings {
    pub fn new(host: impl Into<String>, port: u16, topic: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: "sysohub-dashboard".to_string(),
            username: None,
            password: None,
            topic: topic.into(),
            keep_alive: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username, password);
        }
        options
    }
}

/// Connection target for `RetryingConnector`
#[derive(Debug, Clone)]
pub struct MqttTarget {
    settings: BrokerSettings,
}

impl MqttTarget {
    pub fn new(settings: BrokerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }
}

#[async_trait]
impl Connect for MqttTarget {
    type Connection = MqttConnection;
    type Error = TelemetryError;

    /// Connect, wait for CONNACK, then subscribe to the telemetry topic
    async fn connect(&self) -> Result<MqttConnection> {
        let (client, mut eventloop) = AsyncClient::new(self.settings.options(), REQUEST_CAPACITY);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    debug!(code = ?ack.code, "broker accepted connection");
                    break;
                }
                Ok(event) => trace!(?event, "event before CONNACK"),
                Err(e) => return Err(TelemetryError::Broker(e.to_string())),
            }
        }

        client
            .subscribe(&self.settings.topic, QoS::AtMostOnce)
            .await
            .map_err(|e| TelemetryError::Broker(e.to_string()))?;

        Ok(MqttConnection {
            client,
            eventloop,
            topic: self.settings.topic.clone(),
        })
    }

    fn describe(&self) -> String {
        format!("mqtt://{}:{}", self.settings.host, self.settings.port)
    }
}

/// Live subscription
pub struct MqttConnection {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
}

#[async_trait]
impl Subscription for MqttConnection {
    /// Wait for the next message published on the subscribed topic
    ///
    /// Returns `Broker` when the connection is lost; the connection should
    /// then be dropped.
    async fn recv(&mut self) -> Result<Vec<u8>> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish)))
                    if topic_matches(&self.topic, &publish.topic) =>
                {
                    return Ok(publish.payload.to_vec());
                }
                Ok(event) => trace!(?event, "mqtt event"),
                Err(e) => return Err(TelemetryError::Broker(e.to_string())),
            }
        }
    }
}

/// Whether a publish on `topic` falls under the subscription `filter`
///
/// `filter` may use the `+` and `#` wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    rumqttc::matches(topic, filter)
}

impl MqttConnection {
    /// Send DISCONNECT
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "disconnect request failed");
        }
    }
}

impl std::fmt::Debug for MqttConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConnection")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{BackoffPolicy, RetryingConnector};

    #[test]
    fn test_settings_builder() {
        let settings = BrokerSettings::new("192.168.4.1", 1883, "v1/devices/me/telemetry")
            .credentials("sensor", "secret")
            .client_id("dash");

        assert_eq!(settings.username.as_deref(), Some("sensor"));
        assert_eq!(settings.client_id, "dash");
        assert_eq!(
            MqttTarget::new(settings).describe(),
            "mqtt://192.168.4.1:1883"
        );
    }

    #[test]
    fn test_topic_filter_wildcards() {
        assert!(topic_matches("v1/devices/me/telemetry", "v1/devices/me/telemetry"));
        assert!(topic_matches("sensors/#", "sensors/a"));
        assert!(topic_matches("sensors/#", "sensors/a/b"));
        assert!(topic_matches("+/telemetry", "node1/telemetry"));

        assert!(!topic_matches("sensors/#", "other/a"));
        assert!(!topic_matches("+/telemetry", "node1/status"));
        assert!(!topic_matches("v1/devices/me/telemetry", "v1/devices/me/attributes"));
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails() {
        // port 9 (discard) is closed on test machines
        let target = MqttTarget::new(BrokerSettings::new("127.0.0.1", 9, "t"));
        let connector = RetryingConnector::new(BackoffPolicy::new(2, Duration::from_millis(10)));

        let err = connector.connect(&target).await.unwrap_err();
        assert!(matches!(
            err,
            TelemetryError::ConnectionFailed { attempts: 2, .. }
        ));
    }
}
