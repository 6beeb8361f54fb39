pub mod mqtt;

pub use mqtt::{MqttCommandPublisher, MqttConfig, MqttError};
