use std::sync::Arc;

use chrono::Utc;
use spabridge_core::{Driver, DriverTable, SpaCommand, SPA_ADDRESS};
use tracing::{debug, info};

use crate::adapter::{DeviceAdapter, SpaConnector, SpaReading};
use crate::host::{HostLink, NodeInfo};

pub const NODE_DEF_ID: &str = "spa";

/// Blower and circulation pump are only switched on by an exact 100.
fn on_off_flag(value: i32) -> bool {
    value == 100
}

/// The spa as seen by the hub: one driver table plus the commands that move it.
pub struct SpaNode<C> {
    address: String,
    name: String,
    host: String,
    drivers: DriverTable,
    adapter: Arc<DeviceAdapter<C>>,
    link: HostLink,
}

impl<C: SpaConnector> SpaNode<C> {
    pub fn new(host: &str, adapter: Arc<DeviceAdapter<C>>, link: HostLink) -> Self {
        Self {
            address: SPA_ADDRESS.to_string(),
            name: SPA_ADDRESS.to_string(),
            host: host.to_string(),
            drivers: DriverTable::spa(),
            adapter,
            link,
        }
    }

    pub fn info(&self, primary: &str) -> NodeInfo {
        NodeInfo {
            address: self.address.clone(),
            name: self.name.clone(),
            node_def_id: NODE_DEF_ID.to_string(),
            primary: primary.to_string(),
        }
    }

    pub fn set_host(&mut self, host: &str) {
        if self.host != host {
            info!(old = %self.host, new = %host, "spa host changed");
            self.host = host.to_string();
        }
    }

    pub async fn start(&mut self) {
        self.refresh().await;
    }

    /// Run a command against the spa, then record the requested value whatever
    /// the spa answered.
    pub async fn handle_command(&mut self, cmd: SpaCommand) {
        let host = self.host.clone();
        let (driver, value, result) = match cmd {
            SpaCommand::SetPump1Speed(v) => (Driver::Pump1, v, self.adapter.set_pump(&host, 0, v).await),
            SpaCommand::SetPump2Speed(v) => (Driver::Pump2, v, self.adapter.set_pump(&host, 1, v).await),
            SpaCommand::SetTemp(v) => (Driver::TargetTemp, v, self.adapter.set_temperature(&host, v).await),
            SpaCommand::SetBlower(v) => {
                (Driver::Blower, v, self.adapter.set_blower(&host, on_off_flag(v)).await)
            }
            SpaCommand::SetCirculationPump(v) => (
                Driver::CirculationPump,
                v,
                self.adapter.set_circulation_pump(&host, on_off_flag(v)).await,
            ),
            SpaCommand::SetLight(v) => (Driver::Light, v, self.adapter.set_light(&host, v).await),
            SpaCommand::Query => {
                self.query();
                return;
            }
        };
        if let Err(e) = result {
            debug!(command = cmd.name(), error = %e, "spa command failed");
        }
        self.set_driver(driver, value as f64);
    }

    /// Pull a full status from the spa and apply it in one step.
    pub async fn refresh(&mut self) {
        match self.adapter.read_status(&self.host).await {
            Ok(reading) => {
                self.apply(&reading);
                self.adapter.metrics().last_refresh.set(Utc::now().timestamp());
            }
            Err(e) => debug!(error = %e, "spa status refresh failed"),
        }
    }

    /// Report every driver, changed or not.
    pub fn query(&self) {
        for slot in self.drivers.iter() {
            self.link.driver(&self.address, slot);
        }
    }

    fn apply(&mut self, reading: &SpaReading) {
        let flag = |on: bool| if on { 100.0 } else { 0.0 };
        let mut updates = vec![
            (Driver::TargetTemp, reading.target_temp),
            (Driver::Pump1, reading.pump1 as f64),
            (Driver::Pump2, reading.pump2 as f64),
            (Driver::CirculationPump, flag(reading.circulation_pump)),
            (Driver::Blower, flag(reading.blower_on)),
            (Driver::Light, reading.light as f64),
        ];
        if let Some(temp) = reading.current_temp {
            updates.push((Driver::CurrentTemp, temp));
        }
        for (driver, value) in updates {
            self.set_driver(driver, value);
        }
    }

    fn set_driver(&mut self, driver: Driver, value: f64) {
        if self.drivers.set(driver, value) == Some(true) {
            if let Some(slot) = self.drivers.slot(driver) {
                self.link.driver(&self.address, slot);
            }
        }
    }
}

#[cfg(test)]
impl<C> SpaNode<C> {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn drivers(&self) -> &DriverTable {
        &self.drivers
    }
}
