use std::sync::Arc;

use serde_json::{Map, Value};
use spabridge_core::{
    params_topic, parse_command_topic, ControllerCommand, DriverTable, SpaCommand,
    CONTROLLER_ADDRESS, SPA_ADDRESS,
};
use tracing::{debug, error, info, warn};

use crate::adapter::{DeviceAdapter, SpaConnector};
use crate::host::{HostLink, NodeInfo};
use crate::node::SpaNode;
use crate::profile::{self, CONTROLLER_DEF_ID};

pub type CustomParams = Map<String, Value>;

pub const HOST_NOTICE: &str = "host";
pub const HOST_NOTICE_TEXT: &str = "Please enter the Host/IP address";
const CONTROLLER_NAME: &str = "SpaNodeServer";

/// Flips on every long poll so the hub can tell the bridge is alive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    on: bool,
}

impl Heartbeat {
    /// Advance one beat and return the report to send.
    pub fn tick(&mut self) -> &'static str {
        let report = if self.on { "DOF" } else { "DON" };
        self.on = !self.on;
        report
    }
}

pub struct Controller<C> {
    drivers: DriverTable,
    heartbeat: Heartbeat,
    host: Option<String>,
    fallback_host: Option<String>,
    adapter: Arc<DeviceAdapter<C>>,
    node: Option<SpaNode<C>>,
    link: HostLink,
}

impl<C: SpaConnector> Controller<C> {
    pub fn new(adapter: Arc<DeviceAdapter<C>>, link: HostLink) -> Self {
        link.node_added(NodeInfo {
            address: CONTROLLER_ADDRESS.to_string(),
            name: CONTROLLER_NAME.to_string(),
            node_def_id: CONTROLLER_DEF_ID.to_string(),
            primary: CONTROLLER_ADDRESS.to_string(),
        });
        Self {
            drivers: DriverTable::controller(),
            heartbeat: Heartbeat::default(),
            host: None,
            fallback_host: None,
            adapter,
            node: None,
            link,
        }
    }

    /// Host used when a parameter delivery carries none.
    pub fn with_fallback_host(mut self, host: Option<String>) -> Self {
        self.fallback_host = host.filter(|h| !h.trim().is_empty());
        self
    }

    pub fn start(&self) {
        info!(version = env!("CARGO_PKG_VERSION"), "starting Balboa spa bridge");
        self.link.profile(profile::node_definitions());
        self.link.params_doc(profile::PARAMS_DOC);
        self.report_status();
    }

    /// Apply a parameter delivery. Returns whether a usable host was found.
    pub async fn handle_params(&mut self, params: &CustomParams) -> bool {
        self.link.clear_notice(HOST_NOTICE);
        let host = params
            .get("host")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .or(self.fallback_host.as_deref())
            .map(str::to_string);
        let Some(host) = host else {
            error!("spa host is not configured");
            self.link.notice(HOST_NOTICE, HOST_NOTICE_TEXT);
            return false;
        };
        info!(%host, "spa host configured");
        self.host = Some(host);
        self.discover().await;
        true
    }

    /// Create the spa node if it does not exist yet; otherwise point it at
    /// the current host.
    pub async fn discover(&mut self) {
        let Some(host) = self.host.clone() else {
            warn!("discovery skipped; no spa host configured");
            return;
        };
        if let Some(node) = self.node.as_mut() {
            node.set_host(&host);
            return;
        }
        info!(%host, "adding spa node");
        let mut node = SpaNode::new(&host, self.adapter.clone(), self.link.clone());
        self.link.node_added(node.info(CONTROLLER_ADDRESS));
        node.start().await;
        self.node = Some(node);
    }

    pub fn long_poll(&mut self) {
        let report = self.heartbeat.tick();
        debug!(report, "heartbeat");
        self.link.command(CONTROLLER_ADDRESS, report, 2);
    }

    pub async fn short_poll(&mut self) {
        if let Some(node) = self.node.as_mut() {
            node.refresh().await;
        }
    }

    /// Re-report every node, the controller included.
    pub fn query(&self) {
        self.report_status();
        if let Some(node) = &self.node {
            node.query();
        }
    }

    pub async fn dispatch(&mut self, address: &str, command: &str, payload: &[u8]) {
        match address {
            CONTROLLER_ADDRESS => match ControllerCommand::parse(command) {
                Ok(cmd) => {
                    self.count(cmd.name());
                    match cmd {
                        ControllerCommand::Query => self.query(),
                        ControllerCommand::Discover => self.discover().await,
                    }
                }
                Err(e) => warn!(address, error = %e, "dropping controller command"),
            },
            SPA_ADDRESS => {
                let cmd = match SpaCommand::parse(command, payload) {
                    Ok(cmd) => cmd,
                    Err(e) => {
                        warn!(address, command, error = %e, "dropping spa command");
                        return;
                    }
                };
                let Some(node) = self.node.as_mut() else {
                    warn!(command, "spa node not created yet; dropping command");
                    return;
                };
                self.adapter.metrics().commands.with_label_values(&[cmd.name()]).inc();
                node.handle_command(cmd).await;
            }
            other => warn!(address = other, command, "command for unknown node"),
        }
    }

    /// Route one inbound MQTT message.
    pub async fn on_message(&mut self, topic: &str, payload: &[u8]) {
        if topic == params_topic() {
            match serde_json::from_slice::<CustomParams>(payload) {
                Ok(params) => {
                    self.handle_params(&params).await;
                }
                Err(e) => warn!(error = %e, "ignoring malformed parameter delivery"),
            }
            return;
        }
        match parse_command_topic(topic) {
            Some((address, command)) => self.dispatch(address, command, payload).await,
            None => debug!(%topic, "ignoring message on unexpected topic"),
        }
    }

    pub fn stop(&self) {
        info!("Balboa spa bridge stopping");
    }

    fn report_status(&self) {
        for slot in self.drivers.iter() {
            self.link.driver(CONTROLLER_ADDRESS, slot);
        }
    }

    fn count(&self, command: &str) {
        self.adapter.metrics().commands.with_label_values(&[command]).inc();
    }
}

#[cfg(test)]
impl<C> Controller<C> {
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn node(&self) -> Option<&SpaNode<C>> {
        self.node.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::fake::*;
    use crate::host::HostMessage;
    use serde_json::json;
    use spabridge_core::Driver;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn controller(
        fake: &FakeConnector,
    ) -> (Controller<FakeConnector>, UnboundedReceiver<HostMessage>) {
        let (link, rx) = HostLink::channel();
        (Controller::new(Arc::new(adapter(fake)), link), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<HostMessage>) -> Vec<HostMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn params(v: Value) -> CustomParams {
        v.as_object().cloned().unwrap()
    }

    fn notices(msgs: &[HostMessage]) -> Vec<(String, Option<String>)> {
        msgs.iter()
            .filter_map(|m| match m {
                HostMessage::Notice { key, message } => Some((key.clone(), message.clone())),
                _ => None,
            })
            .collect()
    }

    fn nodes_added(msgs: &[HostMessage]) -> Vec<String> {
        msgs.iter()
            .filter_map(|m| match m {
                HostMessage::NodeAdded(info) => Some(info.address.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn start_publishes_profile_doc_and_status() {
        let fake = FakeConnector::default();
        let (ctl, mut rx) = controller(&fake);
        ctl.start();
        let msgs = drain(&mut rx);
        assert_eq!(nodes_added(&msgs), vec!["controller"]);
        assert!(msgs.iter().any(|m| matches!(m, HostMessage::Profile(_))));
        assert!(msgs.iter().any(|m| matches!(m, HostMessage::ParamsDoc(_))));
        assert!(msgs.iter().any(|m| matches!(
            m,
            HostMessage::Driver { driver: Driver::Status, value, .. } if *value == 1.0
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_host_raises_a_single_notice() {
        let fake = FakeConnector::default();
        let (mut ctl, mut rx) = controller(&fake);
        drain(&mut rx);

        assert!(!ctl.handle_params(&params(json!({}))).await);
        let msgs = drain(&mut rx);
        assert_eq!(
            notices(&msgs),
            vec![
                ("host".to_string(), None),
                ("host".to_string(), Some(HOST_NOTICE_TEXT.to_string())),
            ]
        );
        assert!(ctl.node().is_none());
        assert!(fake.calls().is_empty());

        assert!(!ctl.handle_params(&params(json!({"host": "  "}))).await);
        assert!(ctl.node().is_none());
        drain(&mut rx);

        assert!(ctl.handle_params(&params(json!({"host": "10.0.0.5"}))).await);
        let msgs = drain(&mut rx);
        assert_eq!(notices(&msgs), vec![("host".to_string(), None)]);
        assert_eq!(nodes_added(&msgs), vec!["spa"]);
        assert_eq!(ctl.node().map(|n| n.host()), Some("10.0.0.5"));
        // The new node refreshes once as it starts.
        assert_eq!(fake.calls().first(), Some(&Call::Open("10.0.0.5".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_is_idempotent_and_retargets() {
        let fake = FakeConnector::with(|s| s.reading = Some(sample_reading()));
        let (mut ctl, mut rx) = controller(&fake);
        ctl.handle_params(&params(json!({"host": "10.0.0.5"}))).await;
        ctl.dispatch("controller", "DISCOVER", b"").await;
        ctl.discover().await;
        ctl.handle_params(&params(json!({"host": "10.0.0.9"}))).await;

        assert_eq!(nodes_added(&drain(&mut rx)), vec!["controller", "spa"]);
        let node = ctl.node().unwrap();
        assert_eq!(node.host(), "10.0.0.9");
        assert_eq!(node.drivers().get(Driver::CurrentTemp), Some(98.0));
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_host_survives_deliveries_without_host() {
        let fake = FakeConnector::default();
        let (link, mut rx) = HostLink::channel();
        let mut ctl = Controller::new(Arc::new(adapter(&fake)), link)
            .with_fallback_host(Some("10.0.0.7".into()));

        assert!(ctl.handle_params(&CustomParams::new()).await);
        assert!(ctl.handle_params(&params(json!({"host": ""}))).await);
        let msgs = drain(&mut rx);
        assert!(notices(&msgs).iter().all(|(_, message)| message.is_none()));
        assert_eq!(nodes_added(&msgs), vec!["controller", "spa"]);
        assert_eq!(ctl.node().map(|n| n.host()), Some("10.0.0.7"));

        assert!(ctl.handle_params(&params(json!({"host": "10.0.0.5"}))).await);
        assert_eq!(ctl.node().map(|n| n.host()), Some("10.0.0.5"));
        assert!(ctl.handle_params(&CustomParams::new()).await);
        assert_eq!(ctl.host(), Some("10.0.0.7"));
    }

    #[tokio::test]
    async fn discover_without_host_does_nothing() {
        let fake = FakeConnector::default();
        let (mut ctl, _rx) = controller(&fake);
        ctl.discover().await;
        assert!(ctl.node().is_none());
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn heartbeat_alternates() {
        let fake = FakeConnector::default();
        let (mut ctl, mut rx) = controller(&fake);
        drain(&mut rx);
        for _ in 0..4 {
            ctl.long_poll();
        }
        let reports: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|m| match m {
                HostMessage::Command { command, value, .. } => Some((command, value)),
                _ => None,
            })
            .collect();
        assert_eq!(reports, vec![("DON", 2), ("DOF", 2), ("DON", 2), ("DOF", 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn query_reports_controller_and_spa() {
        let fake = FakeConnector::default();
        let (mut ctl, mut rx) = controller(&fake);
        ctl.handle_params(&params(json!({"host": "10.0.0.5"}))).await;
        drain(&mut rx);

        ctl.dispatch("controller", "QUERY", b"").await;
        let drivers = drain(&mut rx)
            .into_iter()
            .filter(|m| matches!(m, HostMessage::Driver { .. }))
            .count();
        assert_eq!(drivers, 8);
        assert_eq!(
            ctl.adapter.metrics().commands.with_label_values(&["QUERY"]).get(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn routes_mqtt_messages() {
        let fake = FakeConnector::default();
        let (mut ctl, _rx) = controller(&fake);
        ctl.on_message("balboa/params", br#"{"host":"spa.lan"}"#).await;
        assert_eq!(ctl.host(), Some("spa.lan"));

        ctl.on_message("balboa/spa/cmd/SET_TEMP", br#"{"value": 101}"#).await;
        ctl.on_message("balboa/spa/cmd/SET_TEMP", b"warm").await;
        ctl.on_message("balboa/spa/cmd/REBOOT", b"1").await;
        ctl.on_message("balboa/params", b"not json").await;

        assert_eq!(fake.writes(), vec![Call::SetTemperature(101.0)]);
        let node = ctl.node().unwrap();
        assert_eq!(node.drivers().get(Driver::TargetTemp), Some(101.0));
        assert_eq!(ctl.host(), Some("spa.lan"));
    }

    #[tokio::test]
    async fn spa_commands_before_discovery_are_dropped() {
        let fake = FakeConnector::default();
        let (mut ctl, _rx) = controller(&fake);
        ctl.dispatch("spa", "SET_LIGHT", b"1").await;
        assert!(fake.calls().is_empty());
    }
}
