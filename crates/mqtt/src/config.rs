use hostname::get as get_hostname;
use std::env;

#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    /// Retained availability topic: `online` after each connect, `offline` as last will.
    pub status_topic: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            clean_session: true,
            status_topic: None,
        }
    }
}

impl MqttConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = MqttConfig::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = non_empty("MQTT_BROKER_HOST") {
            cfg.host = v;
        }
        if let Some(p) = non_empty("MQTT_BROKER_PORT").and_then(|v| v.parse::<u16>().ok()) {
            cfg.port = p;
        }
        if let Some(v) = non_empty("MQTT_CLIENT_ID") {
            cfg.client_id = v;
        }
        cfg.username = non_empty("MQTT_USERNAME");
        cfg.password = non_empty("MQTT_PASSWORD");
        if let Some(s) = non_empty("MQTT_KEEP_ALIVE_SECS").and_then(|v| v.parse::<u16>().ok()) {
            cfg.keep_alive_secs = s;
        }

        cfg
    }
}

fn default_client_id() -> String {
    let host = get_hostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("spabridge-{}-{}", host, std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("MQTT_BROKER_HOST", "broker.lan"),
            ("MQTT_BROKER_PORT", "8883"),
            ("MQTT_USERNAME", "spa"),
            ("MQTT_PASSWORD", "secret"),
            ("MQTT_KEEP_ALIVE_SECS", "not-a-number"),
        ]);
        let cfg = MqttConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.host, "broker.lan");
        assert_eq!(cfg.port, 8883);
        assert_eq!(cfg.username.as_deref(), Some("spa"));
        assert_eq!(cfg.password.as_deref(), Some("secret"));
        assert_eq!(cfg.keep_alive_secs, 30);
        assert!(cfg.client_id.starts_with("spabridge-"));
    }

    #[test]
    fn empty_values_are_ignored() {
        let cfg = MqttConfig::from_lookup(|k| (k == "MQTT_BROKER_HOST").then(String::new));
        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.username, None);
    }
}
