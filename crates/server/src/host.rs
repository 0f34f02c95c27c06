//! Outbound side of the hub connection.
//!
//! Facades push [`HostMessage`]s through a [`HostLink`] without waiting on the
//! broker; [`run_publisher`] drains them to MQTT and keeps the cache the HTTP
//! API reads.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use spabridge_core::{
    driver_topic, node_topic, notice_topic, params_doc_topic, profile_topic, report_topic, Driver,
    DriverSlot, Uom,
};
use spabridge_mqtt::MqttService;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeInfo {
    pub address: String,
    pub name: String,
    pub node_def_id: String,
    pub primary: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    Driver { address: String, driver: Driver, value: f64, uom: Uom },
    Command { address: String, command: &'static str, value: i32 },
    NodeAdded(NodeInfo),
    Notice { key: String, message: Option<String> },
    Profile(Value),
    ParamsDoc(String),
}

#[derive(Clone)]
pub struct HostLink {
    tx: mpsc::UnboundedSender<HostMessage>,
}

impl HostLink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HostMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn driver(&self, address: &str, slot: &DriverSlot) {
        self.send(HostMessage::Driver {
            address: address.to_string(),
            driver: slot.driver,
            value: slot.value,
            uom: slot.uom,
        });
    }

    pub fn command(&self, address: &str, command: &'static str, value: i32) {
        self.send(HostMessage::Command { address: address.to_string(), command, value });
    }

    pub fn node_added(&self, info: NodeInfo) {
        self.send(HostMessage::NodeAdded(info));
    }

    pub fn notice(&self, key: &str, message: &str) {
        self.send(HostMessage::Notice { key: key.to_string(), message: Some(message.to_string()) });
    }

    pub fn clear_notice(&self, key: &str) {
        self.send(HostMessage::Notice { key: key.to_string(), message: None });
    }

    pub fn profile(&self, profile: Value) {
        self.send(HostMessage::Profile(profile));
    }

    pub fn params_doc(&self, doc: &str) {
        self.send(HostMessage::ParamsDoc(doc.to_string()));
    }

    fn send(&self, msg: HostMessage) {
        if self.tx.send(msg).is_err() {
            trace!("host publisher stopped; dropping message");
        }
    }
}

/// Topic, retain flag and payload for one outbound message.
pub fn encode(msg: &HostMessage) -> (String, bool, Vec<u8>) {
    match msg {
        HostMessage::Driver { address, driver, value, uom } => (
            driver_topic(address, driver.as_str()),
            true,
            json!({ "value": value, "uom": uom }).to_string().into_bytes(),
        ),
        HostMessage::Command { address, command, value } => (
            report_topic(address, command),
            false,
            json!({ "value": value }).to_string().into_bytes(),
        ),
        HostMessage::NodeAdded(info) => (
            node_topic(&info.address),
            true,
            serde_json::to_vec(info).unwrap_or_default(),
        ),
        // An empty retained payload removes the notice on the broker.
        HostMessage::Notice { key, message } => (
            notice_topic(key),
            true,
            message.clone().map(String::into_bytes).unwrap_or_default(),
        ),
        HostMessage::Profile(profile) => (profile_topic(), true, profile.to_string().into_bytes()),
        HostMessage::ParamsDoc(doc) => (params_doc_topic(), true, doc.clone().into_bytes()),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverView {
    pub value: f64,
    pub uom: Uom,
    pub updated_at: DateTime<Utc>,
}

/// Last values reported to the hub.
#[derive(Debug, Default, Serialize)]
pub struct HostCache {
    pub nodes: BTreeMap<String, NodeInfo>,
    pub drivers: BTreeMap<String, BTreeMap<String, DriverView>>,
    pub notices: BTreeMap<String, String>,
}

impl HostCache {
    pub fn apply(&mut self, msg: &HostMessage) {
        match msg {
            HostMessage::Driver { address, driver, value, uom } => {
                self.drivers.entry(address.clone()).or_default().insert(
                    driver.as_str().to_string(),
                    DriverView { value: *value, uom: *uom, updated_at: Utc::now() },
                );
            }
            HostMessage::NodeAdded(info) => {
                self.nodes.insert(info.address.clone(), info.clone());
            }
            HostMessage::Notice { key, message: Some(text) } => {
                self.notices.insert(key.clone(), text.clone());
            }
            HostMessage::Notice { key, message: None } => {
                self.notices.remove(key);
            }
            HostMessage::Command { .. } | HostMessage::Profile(_) | HostMessage::ParamsDoc(_) => {}
        }
    }
}

pub async fn run_publisher(
    mut rx: mpsc::UnboundedReceiver<HostMessage>,
    mqtt: MqttService,
    cache: Arc<RwLock<HostCache>>,
) {
    while let Some(msg) = rx.recv().await {
        cache.write().await.apply(&msg);
        let (topic, retain, payload) = encode(&msg);
        debug!(%topic, retain, "publishing to hub");
        if let Err(e) = mqtt.publish(&topic, retain, payload).await {
            warn!(error = %e, %topic, "failed to publish to hub");
        }
    }
    debug!("host publisher finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use spabridge_core::DriverTable;

    #[test]
    fn driver_messages_are_retained_json() {
        let table = DriverTable::spa();
        let (link, mut rx) = HostLink::channel();
        link.driver("spa", table.slot(Driver::CurrentTemp).unwrap());
        let msg = rx.try_recv().unwrap();
        let (topic, retain, payload) = encode(&msg);
        assert_eq!(topic, "balboa/spa/driver/CLITEMP");
        assert!(retain);
        let body: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(body, json!({"value": 0.0, "uom": 4}));
    }

    #[test]
    fn heartbeat_reports_are_not_retained() {
        let (topic, retain, payload) = encode(&HostMessage::Command {
            address: "controller".into(),
            command: "DON",
            value: 2,
        });
        assert_eq!(topic, "balboa/controller/report/DON");
        assert!(!retain);
        assert_eq!(payload, br#"{"value":2}"#);
    }

    #[test]
    fn cleared_notice_publishes_empty_payload() {
        let (topic, retain, payload) = encode(&HostMessage::Notice { key: "host".into(), message: None });
        assert_eq!(topic, "balboa/notices/host");
        assert!(retain);
        assert!(payload.is_empty());
    }

    #[test]
    fn cache_tracks_drivers_and_notices() {
        let mut cache = HostCache::default();
        cache.apply(&HostMessage::Notice { key: "host".into(), message: Some("Please enter the Host/IP address".into()) });
        cache.apply(&HostMessage::Driver {
            address: "spa".into(),
            driver: Driver::TargetTemp,
            value: 100.0,
            uom: Uom::CELSIUS,
        });
        assert_eq!(cache.notices.len(), 1);
        assert_eq!(cache.drivers["spa"]["GV6"].value, 100.0);

        cache.apply(&HostMessage::Notice { key: "host".into(), message: None });
        assert!(cache.notices.is_empty());
    }

    #[test]
    fn dropped_publisher_does_not_panic() {
        let (link, rx) = HostLink::channel();
        drop(rx);
        link.notice("host", "Please enter the Host/IP address");
    }
}
