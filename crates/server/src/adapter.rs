//! One spa operation per call over a short-lived session.
//!
//! Every call walks `connect -> panel request -> wait for config -> operate ->
//! disconnect`. The disconnect runs on every path once a connection exists.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use spabridge_bwa::{BwaSession, SpaStatus};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, trace, warn};

use crate::config::BridgeConfig;
use crate::metrics::Metrics;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("spa unreachable: {0}")]
    DeviceUnreachable(String),
    #[error("spa configuration not loaded within {0:?}")]
    ProtocolTimeout(Duration),
    #[error("invalid response from spa: {0}")]
    InvalidResponse(String),
    #[error("request rejected before reaching the spa: {0}")]
    InvalidRequest(String),
}

impl AdapterError {
    pub fn outcome(&self) -> &'static str {
        match self {
            AdapterError::DeviceUnreachable(_) => "unreachable",
            AdapterError::ProtocolTimeout(_) => "timeout",
            AdapterError::InvalidResponse(_) => "invalid_response",
            AdapterError::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl From<spabridge_bwa::Error> for AdapterError {
    fn from(e: spabridge_bwa::Error) -> Self {
        match e {
            spabridge_bwa::Error::Io(io) => AdapterError::DeviceUnreachable(io.to_string()),
            other => AdapterError::InvalidResponse(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ReadStatus,
    SetTemperature,
    SetPump,
    SetBlower,
    SetCirculationPump,
    SetLight,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::ReadStatus => "read_status",
            Operation::SetTemperature => "set_temperature",
            Operation::SetPump => "set_pump",
            Operation::SetBlower => "set_blower",
            Operation::SetCirculationPump => "set_circulation_pump",
            Operation::SetLight => "set_light",
        }
    }
}

/// Values a status read hands back to the node.
#[derive(Debug, Clone, PartialEq)]
pub struct SpaReading {
    pub current_temp: Option<f64>,
    pub target_temp: f64,
    pub pump1: u8,
    pub pump2: u8,
    pub circulation_pump: bool,
    pub blower_on: bool,
    pub light: u8,
}

impl From<&SpaStatus> for SpaReading {
    fn from(s: &SpaStatus) -> Self {
        Self {
            current_temp: s.current_temp,
            target_temp: s.target_temp,
            pump1: s.pumps[0],
            pump2: s.pumps[1],
            circulation_pump: s.circulation_pump,
            blower_on: s.blower != 0,
            light: s.lights[0] as u8,
        }
    }
}

/// An open connection to the spa.
#[async_trait]
pub trait SpaLink: Send {
    async fn request_panel(&mut self) -> Result<(), spabridge_bwa::Error>;
    fn readiness(&self) -> watch::Receiver<bool>;
    fn last_update(&self) -> u64;
    fn reading(&self) -> Option<SpaReading>;
    async fn set_temperature(&mut self, temp: f64) -> Result<(), spabridge_bwa::Error>;
    async fn set_pump(&mut self, pump: usize, speed: u8) -> Result<(), spabridge_bwa::Error>;
    async fn set_blower(&mut self, on: bool) -> Result<(), spabridge_bwa::Error>;
    async fn set_circulation_pump(&mut self, on: bool) -> Result<(), spabridge_bwa::Error>;
    async fn set_light(&mut self, on: bool) -> Result<(), spabridge_bwa::Error>;
    async fn close(&mut self) -> Result<(), spabridge_bwa::Error>;
}

#[async_trait]
pub trait SpaConnector: Send + Sync {
    type Link: SpaLink;

    async fn open(&self, host: &str) -> Result<Self::Link, spabridge_bwa::Error>;
}

pub struct BwaConnector {
    port: u16,
}

impl BwaConnector {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

#[async_trait]
impl SpaConnector for BwaConnector {
    type Link = BwaSession;

    async fn open(&self, host: &str) -> Result<BwaSession, spabridge_bwa::Error> {
        BwaSession::connect(host, self.port).await
    }
}

#[async_trait]
impl SpaLink for BwaSession {
    async fn request_panel(&mut self) -> Result<(), spabridge_bwa::Error> {
        self.send_panel_request(0, 1).await
    }

    fn readiness(&self) -> watch::Receiver<bool> {
        BwaSession::readiness(self)
    }

    fn last_update(&self) -> u64 {
        BwaSession::last_update(self)
    }

    fn reading(&self) -> Option<SpaReading> {
        self.status().as_ref().map(SpaReading::from)
    }

    async fn set_temperature(&mut self, temp: f64) -> Result<(), spabridge_bwa::Error> {
        BwaSession::set_temperature(self, temp).await
    }

    async fn set_pump(&mut self, pump: usize, speed: u8) -> Result<(), spabridge_bwa::Error> {
        self.change_pump(pump, speed).await
    }

    async fn set_blower(&mut self, on: bool) -> Result<(), spabridge_bwa::Error> {
        self.change_blower(on as u8).await
    }

    // The panel has no toggle of its own for the circulation pump; it is driven
    // through pump 1, the same as the deployed hub integration.
    async fn set_circulation_pump(&mut self, on: bool) -> Result<(), spabridge_bwa::Error> {
        self.change_pump(0, on as u8).await
    }

    async fn set_light(&mut self, on: bool) -> Result<(), spabridge_bwa::Error> {
        self.change_light(0, on).await
    }

    async fn close(&mut self) -> Result<(), spabridge_bwa::Error> {
        self.disconnect().await
    }
}

/// Wait for the readiness flag, bounded by `limit`. Returns whether it was seen.
pub async fn wait_until_ready(mut ready: watch::Receiver<bool>, limit: Duration) -> bool {
    timeout(limit, ready.wait_for(|loaded| *loaded)).await.is_ok_and(|r| r.is_ok())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdapterSettings {
    pub ready_timeout: Duration,
    pub settle_window: Duration,
    pub require_ready: bool,
}

impl From<&BridgeConfig> for AdapterSettings {
    fn from(cfg: &BridgeConfig) -> Self {
        Self {
            ready_timeout: cfg.ready_timeout,
            settle_window: cfg.settle_window,
            require_ready: cfg.require_ready,
        }
    }
}

pub struct DeviceAdapter<C> {
    connector: C,
    settings: AdapterSettings,
    metrics: Arc<Metrics>,
}

impl<C: SpaConnector> DeviceAdapter<C> {
    pub fn new(connector: C, settings: AdapterSettings, metrics: Arc<Metrics>) -> Self {
        Self { connector, settings, metrics }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub async fn read_status(&self, host: &str) -> Result<SpaReading, AdapterError> {
        let result = async {
            let mut link = self.open(host).await?;
            self.settle(&link).await;
            let reading = link
                .reading()
                .ok_or_else(|| AdapterError::InvalidResponse("no status update received".into()));
            self.close(&mut link).await;
            reading
        }
        .await;
        self.record(Operation::ReadStatus, result)
    }

    pub async fn set_temperature(&self, host: &str, temp: i32) -> Result<(), AdapterError> {
        let result = async {
            let mut link = self.open(host).await?;
            let sent = link.set_temperature(temp as f64).await.map_err(AdapterError::from);
            self.close(&mut link).await;
            sent
        }
        .await;
        self.record(Operation::SetTemperature, result)
    }

    /// `pump` is zero-based.
    pub async fn set_pump(&self, host: &str, pump: usize, speed: i32) -> Result<(), AdapterError> {
        let result = async {
            let speed = u8::try_from(speed)
                .map_err(|_| AdapterError::InvalidRequest(format!("pump speed {speed}")))?;
            let mut link = self.open(host).await?;
            let sent = link.set_pump(pump, speed).await.map_err(AdapterError::from);
            self.close(&mut link).await;
            sent
        }
        .await;
        self.record(Operation::SetPump, result)
    }

    pub async fn set_blower(&self, host: &str, on: bool) -> Result<(), AdapterError> {
        let result = async {
            let mut link = self.open(host).await?;
            let sent = link.set_blower(on).await.map_err(AdapterError::from);
            self.close(&mut link).await;
            sent
        }
        .await;
        self.record(Operation::SetBlower, result)
    }

    pub async fn set_circulation_pump(&self, host: &str, on: bool) -> Result<(), AdapterError> {
        let result = async {
            let mut link = self.open(host).await?;
            let sent = link.set_circulation_pump(on).await.map_err(AdapterError::from);
            self.close(&mut link).await;
            sent
        }
        .await;
        self.record(Operation::SetCirculationPump, result)
    }

    pub async fn set_light(&self, host: &str, level: i32) -> Result<(), AdapterError> {
        let result = async {
            let mut link = self.open(host).await?;
            let sent = link.set_light(level != 0).await.map_err(AdapterError::from);
            self.close(&mut link).await;
            sent
        }
        .await;
        self.record(Operation::SetLight, result)
    }

    async fn open(&self, host: &str) -> Result<C::Link, AdapterError> {
        debug!(host, "connecting to spa");
        let mut link = self.connector.open(host).await?;
        if let Err(e) = self.handshake(&mut link).await {
            self.close(&mut link).await;
            return Err(e);
        }
        Ok(link)
    }

    async fn handshake(&self, link: &mut C::Link) -> Result<(), AdapterError> {
        link.request_panel().await?;
        let limit = self.settings.ready_timeout;
        if wait_until_ready(link.readiness(), limit).await {
            return Ok(());
        }
        if self.settings.require_ready {
            return Err(AdapterError::ProtocolTimeout(limit));
        }
        warn!(waited = ?limit, "spa configuration not loaded; continuing anyway");
        Ok(())
    }

    // Observes the update counter across the window; the counter never shortens it.
    async fn settle(&self, link: &C::Link) {
        let before = link.last_update();
        sleep(self.settings.settle_window).await;
        let after = link.last_update();
        trace!(before, after, fresh = after != before, "settle window elapsed");
    }

    async fn close(&self, link: &mut C::Link) {
        if let Err(e) = link.close().await {
            debug!(error = %e, "error while disconnecting from spa");
        }
    }

    fn record<T>(&self, op: Operation, result: Result<T, AdapterError>) -> Result<T, AdapterError> {
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.outcome(),
        };
        self.metrics.spa_operations.with_label_values(&[op.as_str(), outcome]).inc();
        result
    }
}
