use std::sync::Arc;

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub mqtt_connected: IntGauge,
    pub spa_operations: IntCounterVec, // labels: operation, outcome
    pub commands: IntCounterVec,       // label: command
    pub last_refresh: IntGauge,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        let registry = Registry::new();
        let mqtt_connected = IntGauge::new("spabridge_mqtt_connected", "MQTT connection status (1 connected, 0 otherwise)")
            .expect("static metric definition");
        let spa_operations = IntCounterVec::new(
            Opts::new("spabridge_spa_operations_total", "Spa operations by outcome"),
            &["operation", "outcome"],
        )
        .expect("static metric definition");
        let commands = IntCounterVec::new(
            Opts::new("spabridge_commands_total", "Commands received from the hub"),
            &["command"],
        )
        .expect("static metric definition");
        let last_refresh = IntGauge::new("spabridge_last_refresh_timestamp", "Epoch seconds of the last successful status refresh")
            .expect("static metric definition");

        let _ = registry.register(Box::new(mqtt_connected.clone()));
        let _ = registry.register(Box::new(spa_operations.clone()));
        let _ = registry.register(Box::new(commands.clone()));
        let _ = registry.register(Box::new(last_refresh.clone()));

        Arc::new(Self { registry, mqtt_connected, spa_operations, commands, last_refresh })
    }

    #[cfg(test)]
    pub fn operation_count(&self, operation: &str, outcome: &str) -> u64 {
        self.spa_operations.with_label_values(&[operation, outcome]).get()
    }

    /// Prometheus text exposition plus its content type.
    pub fn render(&self) -> Result<(Vec<u8>, String), prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        Ok((buf, encoder.format_type().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_registered_families() {
        let metrics = Metrics::new();
        metrics.spa_operations.with_label_values(&["read_status", "success"]).inc();
        metrics.commands.with_label_values(&["SET_TEMP"]).inc();
        let (body, content_type) = metrics.render().unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("spabridge_spa_operations_total{operation=\"read_status\",outcome=\"success\"} 1"));
        assert!(text.contains("spabridge_commands_total{command=\"SET_TEMP\"} 1"));
        assert_eq!(metrics.operation_count("read_status", "success"), 1);
    }
}
