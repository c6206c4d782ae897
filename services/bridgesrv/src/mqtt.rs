//! MQTT boundary
//!
//! One `AsyncClient` plus a background event-loop task. Inbound control
//! messages (`{prefix}/+/+/command` and the Home Assistant status topic) are
//! parsed here and forwarded to the engine over a channel; outbound traffic
//! goes through the [`Publisher`] trait so the engine never touches the
//! client directly.

use async_trait::async_trait;
use ezville_proto::DeviceKind;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::MqttConfig;
use crate::error::Result;

/// Payload Home Assistant publishes on its status topic when it comes up.
pub const HA_BIRTH_PAYLOAD: &str = "online";

/// A control message received over MQTT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub kind: DeviceKind,
    pub group: u8,
    pub sub: u8,
    pub attribute: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Command(CommandRequest),
    /// Home Assistant came (back) online; re-announce everything
    DiscoveryRearm,
}

/// Outbound side of the MQTT boundary.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<()>;
}

/// Parse `{prefix}/{kind}_{group:02}_{sub:02}/{attribute}/command`.
pub fn parse_command_topic(prefix: &str, topic: &str, payload: &str) -> Option<CommandRequest> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let mut parts = rest.split('/');
    let device = parts.next()?;
    let attribute = parts.next()?;
    if parts.next()? != "command" || parts.next().is_some() {
        return None;
    }

    let mut device_parts = device.split('_');
    let kind = DeviceKind::from_name(device_parts.next()?)?;
    let group: u8 = device_parts.next()?.parse().ok()?;
    let sub: u8 = device_parts.next()?.parse().ok()?;
    if device_parts.next().is_some() {
        return None;
    }

    Some(CommandRequest {
        kind,
        group,
        sub,
        attribute: attribute.to_string(),
        value: payload.trim().to_string(),
    })
}

fn qos_level(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Connected MQTT session handle. Cloning shares the underlying client.
#[derive(Clone)]
pub struct MqttLink {
    client: AsyncClient,
    qos: QoS,
}

impl MqttLink {
    /// Connect and spawn the event-loop task. Control messages arrive on the
    /// returned channel; the task resubscribes after every reconnect.
    pub async fn connect(config: &MqttConfig) -> Result<(Self, mpsc::Receiver<ControlEvent>)> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let (tx, rx) = mpsc::channel(64);
        let qos = qos_level(config.qos);

        let subscriber = client.clone();
        let prefix = config.prefix.clone();
        let command_filter = format!("{}/+/+/command", config.prefix);
        let status_topic = format!("{}/status", config.discovery_prefix);
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT session established");
                        for topic in [&command_filter, &status_topic] {
                            if let Err(e) = subscriber.subscribe(topic, qos).await {
                                warn!("MQTT subscribe to {} failed: {}", topic, e);
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let payload = String::from_utf8_lossy(&publish.payload);
                        let event = if publish.topic == status_topic {
                            (payload.trim() == HA_BIRTH_PAYLOAD).then_some(ControlEvent::DiscoveryRearm)
                        } else {
                            parse_command_topic(&prefix, &publish.topic, &payload)
                                .map(ControlEvent::Command)
                        };
                        let Some(event) = event else {
                            debug!("Ignoring MQTT message on {}", publish.topic);
                            continue;
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if tx.is_closed() {
                            break;
                        }
                        warn!("MQTT connection error: {}; retrying", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            debug!("MQTT event loop task exiting");
        });

        Ok((Self { client, qos }, rx))
    }
}

#[async_trait]
impl Publisher for MqttLink {
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<()> {
        self.client
            .publish(topic, self.qos, retain, payload.as_bytes().to_vec())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_topic_parses() {
        let req = parse_command_topic("ezville", "ezville/light_01_02/power/command", "ON")
            .expect("valid topic");
        assert_eq!(req.kind, DeviceKind::Light);
        assert_eq!(req.group, 1);
        assert_eq!(req.sub, 2);
        assert_eq!(req.attribute, "power");
        assert_eq!(req.value, "ON");
    }

    #[test]
    fn batch_button_topic_parses() {
        let req = parse_command_topic(
            "ezville",
            "ezville/batch_01_01/elevator-up/command",
            "PRESS",
        )
        .expect("valid topic");
        assert_eq!(req.kind, DeviceKind::Batch);
        assert_eq!(req.attribute, "elevator-up");
    }

    #[test]
    fn malformed_topics_rejected() {
        assert!(parse_command_topic("ezville", "ezville/light_01_02/power/state", "ON").is_none());
        assert!(parse_command_topic("ezville", "ezville/fan_01_02/power/command", "ON").is_none());
        assert!(parse_command_topic("ezville", "ezville/light_01/power/command", "ON").is_none());
        assert!(parse_command_topic("ezville", "other/light_01_02/power/command", "ON").is_none());
        assert!(parse_command_topic("ezville", "ezville/light_zz_02/power/command", "ON").is_none());
        assert!(
            parse_command_topic("ezville", "ezville/light_01_02/power/command/extra", "ON")
                .is_none()
        );
    }

    #[test]
    fn qos_mapping() {
        assert_eq!(qos_level(0), QoS::AtMostOnce);
        assert_eq!(qos_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_level(2), QoS::ExactlyOnce);
    }
}
