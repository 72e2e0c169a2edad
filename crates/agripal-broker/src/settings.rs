//! Connection parameters for the broker session.

use std::time::Duration;

use rumqttc::{MqttOptions, Transport};

use crate::error::SettingsError;

/// Everything needed to open and keep a broker session.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    /// Wrap the session in TLS using the platform's root certificates.
    pub tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Prefix of the per-process client identifier; a random suffix is added.
    pub client_id_prefix: String,
    /// Wildcard subscription covering every device topic.
    pub topic: String,
    /// Fixed delay between reconnect attempts.
    pub reconnect_interval: Duration,
    pub keep_alive: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8883,
            tls: true,
            username: None,
            password: None,
            client_id_prefix: "agripal_backend_".to_string(),
            topic: "agripal/#".to_string(),
            reconnect_interval: Duration::from_secs(5),
            keep_alive: Duration::from_secs(30),
        }
    }
}

impl BrokerSettings {
    /// Checks the settings can produce a usable session.
    ///
    /// # Errors
    ///
    /// Returns a [`SettingsError`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.host.trim().is_empty() {
            return Err(SettingsError::EmptyHost);
        }
        if self.topic.trim().is_empty() {
            return Err(SettingsError::EmptyTopic);
        }
        if self.reconnect_interval < Duration::from_secs(1) {
            return Err(SettingsError::ZeroReconnectInterval);
        }
        Ok(())
    }

    /// Generates a fresh client identifier: the prefix plus eight hex digits.
    pub fn client_id(&self) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}{}", self.client_id_prefix.trim(), &suffix[..8])
    }

    /// Builds the rumqttc options for one session with the given client id.
    pub(crate) fn mqtt_options(&self, client_id: &str) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);

        if let Some(username) = &self.username {
            options.set_credentials(
                username.clone(),
                self.password.clone().unwrap_or_default(),
            );
        }
        if self.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }
}
