//! MQTT command publishing towards the broker the provisioned devices
//! listen on. The dispatcher uses this to mirror every switch state
//! change onto the device command topic.

use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use std::time::Duration;
use tokio_rustls::rustls::ClientConfig;

/// Configuration for the broker connection, read from the environment in
/// `main`.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: format!("homeauto-backend-{}", uuid::Uuid::new_v4()),
            username: None,
            password: None,
            use_tls: false,
            keep_alive_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MqttError {
    ConnectionFailed(String),
    PublishFailed(String),
}

impl std::fmt::Display for MqttError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MqttError::ConnectionFailed(msg) => write!(f, "MQTT connection failed: {}", msg),
            MqttError::PublishFailed(msg) => write!(f, "MQTT publish failed: {}", msg),
        }
    }
}

impl std::error::Error for MqttError {}

/// Topic a switch listens on for state commands.
pub fn command_topic(switch_name: &str) -> String {
    format!("home/switches/{}/set", switch_name)
}

/// A connected publisher. The event loop runs on its own task for the
/// lifetime of the publisher; publishes are fire-and-forget at QoS 1.
pub struct MqttCommandPublisher {
    client: AsyncClient,
    _event_handle: tokio::task::JoinHandle<()>,
}

impl MqttCommandPublisher {
    pub async fn connect(config: MqttConfig) -> Result<Self, MqttError> {
        let mut mqtt_options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);

        mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            mqtt_options.set_credentials(username, password);
        }

        if config.use_tls {
            // Trust the operating system's root certificates
            let mut root_cert_store = tokio_rustls::rustls::RootCertStore::empty();

            let cert_result = rustls_native_certs::load_native_certs();
            for err in &cert_result.errors {
                warn!("Error loading native cert: {}", err);
            }

            let (added, _ignored) = root_cert_store.add_parsable_certificates(cert_result.certs);
            debug!("Loaded {} native root certificates for TLS", added);

            let client_config = ClientConfig::builder()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth();

            mqtt_options.set_transport(Transport::tls_with_config(client_config.into()));
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, 64);

        let event_handle = tokio::spawn(async move {
            Self::run_event_loop(eventloop).await;
        });

        info!(
            "MQTT publisher connected to {}:{}",
            config.broker_host, config.broker_port
        );

        Ok(Self {
            client,
            _event_handle: event_handle,
        })
    }

    async fn run_event_loop(mut eventloop: EventLoop) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("MQTT connection acknowledged");
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT event loop error: {}", e);
                    break;
                }
            }
        }
    }

    /// Publish a switch state command ("ON"/"OFF") to the switch's
    /// command topic.
    pub async fn publish_state(&self, switch_name: &str, state: &str) -> Result<(), MqttError> {
        self.client
            .publish(
                command_topic(switch_name),
                QoS::AtLeastOnce,
                false,
                state.as_bytes(),
            )
            .await
            .map_err(|e| MqttError::PublishFailed(e.to_string()))
    }

    pub async fn disconnect(&self) -> Result<(), MqttError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| MqttError::ConnectionFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mqtt_config_default() {
        let config = MqttConfig::default();
        assert_eq!(config.broker_host, "localhost");
        assert_eq!(config.broker_port, 1883);
        assert!(!config.use_tls);
        assert!(config.client_id.starts_with("homeauto-backend-"));
    }

    #[test]
    fn test_command_topic_format() {
        assert_eq!(command_topic("lamp1"), "home/switches/lamp1/set");
    }

    #[test]
    fn test_mqtt_error_display() {
        let err = MqttError::PublishFailed("broker gone".to_string());
        assert!(err.to_string().contains("publish failed"));

        let err = MqttError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("connection failed"));
    }
}
