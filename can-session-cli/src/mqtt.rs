//! MQTT transport
//!
//! Subscribes to the gateway's status topic and forwards each publish payload
//! to the session engine unchanged. The subscription is renewed on every
//! ConnAck, so it survives broker reconnects.

use crate::config::MqttConfig;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Largest publish payload accepted from the broker
const MAX_PACKET_SIZE: usize = 64 * 1024;

pub struct MqttSubscriber {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
    reconnect_delay: Duration,
}

impl MqttSubscriber {
    pub fn new(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(true);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.as_deref().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, 10);

        Self {
            client,
            eventloop,
            topic: config.topic.clone(),
            reconnect_delay: config.reconnect_delay(),
        }
    }

    /// Poll the broker until shutdown or until the engine stops accepting frames
    pub async fn run(mut self, frames: mpsc::Sender<Vec<u8>>, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("MQTT subscriber: shutdown signal received");
                    break;
                }
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            log::info!("Connected to MQTT broker");
                            self.subscribe().await;
                        }
                        Ok(Event::Incoming(Packet::SubAck(_))) => {
                            log::info!("Subscribed to {}", self.topic);
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            if publish.topic != self.topic {
                                log::trace!("Ignoring publish on {}", publish.topic);
                                continue;
                            }
                            log::trace!("Frame received: {} bytes", publish.payload.len());
                            if frames.send(publish.payload.to_vec()).await.is_err() {
                                log::error!("Session engine stopped, closing MQTT subscriber");
                                break;
                            }
                        }
                        Ok(other) => log::trace!("MQTT event: {:?}", other),
                        Err(e) => {
                            log::error!("MQTT connection error: {}", e);
                            tokio::select! {
                                _ = &mut shutdown => {
                                    log::info!("MQTT subscriber: shutdown signal received");
                                    break;
                                }
                                _ = tokio::time::sleep(self.reconnect_delay) => {}
                            }
                        }
                    }
                }
            }
        }

        if let Err(e) = self.client.disconnect().await {
            log::warn!("Error disconnecting MQTT client: {}", e);
        }
    }

    async fn subscribe(&mut self) {
        match self.client.subscribe(&self.topic, QoS::AtMostOnce).await {
            Ok(()) => log::debug!("Subscription to {} requested", self.topic),
            Err(e) => log::error!("Error subscribing to {}: {}", self.topic, e),
        }
    }
}
