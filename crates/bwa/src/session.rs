use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::protocol::{
    self, parse_panel_config, parse_status, Frame, FrameDecoder, PanelConfig, SpaStatus,
    ITEM_BLOWER, ITEM_LIGHT1, ITEM_PUMP1, MSG_PANEL_CONFIG, MSG_STATUS_UPDATE,
};
use crate::{Error, Result};

// The panel drops toggles that arrive back to back.
const TOGGLE_SPACING: Duration = Duration::from_secs(1);

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Default)]
struct SpaState {
    status: Option<SpaStatus>,
    config: Option<PanelConfig>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<SpaState>,
    updates: AtomicU64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SpaState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn apply(&self, frame: &Frame, ready: &watch::Sender<bool>) {
        match frame.message_type() {
            MSG_STATUS_UPDATE => match parse_status(&frame.payload) {
                Ok(status) => {
                    self.state().status = Some(status);
                    self.updates.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => debug!(error = %e, "ignoring status update"),
            },
            MSG_PANEL_CONFIG => match parse_panel_config(&frame.payload) {
                Ok(config) => {
                    debug!(?config, "panel configuration loaded");
                    self.state().config = Some(config);
                    ready.send_replace(true);
                }
                Err(e) => debug!(error = %e, "ignoring panel configuration"),
            },
            other => trace!(msg = other, "unhandled message"),
        }
    }
}

/// One connection to a BWA module.
///
/// A listener task started on construction decodes everything the spa pushes.
/// The panel configuration arriving flips the readiness flag; each status
/// update bumps [`last_update`](Self::last_update).
pub struct BwaSession {
    writer: Writer,
    shared: Arc<Shared>,
    ready: watch::Receiver<bool>,
    listener: JoinHandle<()>,
}

impl BwaSession {
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        debug!(host, port, "connecting to spa");
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (ready_tx, ready_rx) = watch::channel(false);
        let shared = Arc::new(Shared::default());
        let listener = tokio::spawn(listen(reader, shared.clone(), ready_tx));
        Self {
            writer: Box::new(writer),
            shared,
            ready: ready_rx,
            listener,
        }
    }

    pub fn readiness(&self) -> watch::Receiver<bool> {
        self.ready.clone()
    }

    pub fn is_config_loaded(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn last_update(&self) -> u64 {
        self.shared.updates.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> Option<SpaStatus> {
        self.shared.state().status.clone()
    }

    pub fn panel_config(&self) -> Option<PanelConfig> {
        self.shared.state().config.clone()
    }

    pub async fn send_panel_request(&mut self, a: u8, b: u8) -> Result<()> {
        self.send(protocol::panel_request(a, b)).await
    }

    pub async fn set_temperature(&mut self, temp: f64) -> Result<()> {
        let scale = self.status().map(|s| s.temp_scale).unwrap_or_default();
        let raw = scale.encode(temp)?;
        debug!(temp, raw, "setting target temperature");
        self.send(protocol::set_temperature(raw)).await
    }

    /// Step pump `pump` (zero-based) to `speed` by cycling its toggle.
    pub async fn change_pump(&mut self, pump: usize, speed: u8) -> Result<()> {
        let config = self.panel_config().ok_or(Error::NotReady("panel configuration"))?;
        let speeds = config.pumps.get(pump).copied().unwrap_or(0);
        if speeds == 0 {
            return Err(Error::Unsupported(format!("pump {}", pump + 1)));
        }
        if speed > speeds {
            return Err(Error::Unsupported(format!("pump {} speed {speed}", pump + 1)));
        }
        let status = self.status().ok_or(Error::NotReady("status"))?;
        let current = status.pumps[pump];
        self.cycle(ITEM_PUMP1 + pump as u8, current, speed, speeds).await
    }

    pub async fn change_blower(&mut self, speed: u8) -> Result<()> {
        let config = self.panel_config().ok_or(Error::NotReady("panel configuration"))?;
        if config.blower == 0 {
            return Err(Error::Unsupported("blower".into()));
        }
        let speed = speed.min(config.blower);
        let status = self.status().ok_or(Error::NotReady("status"))?;
        self.cycle(ITEM_BLOWER, status.blower, speed, config.blower).await
    }

    pub async fn change_light(&mut self, light: usize, on: bool) -> Result<()> {
        let config = self.panel_config().ok_or(Error::NotReady("panel configuration"))?;
        if !config.lights.get(light).copied().unwrap_or(false) {
            return Err(Error::Unsupported(format!("light {}", light + 1)));
        }
        let status = self.status().ok_or(Error::NotReady("status"))?;
        if status.lights[light] == on {
            trace!(light, on, "light already in requested state");
            return Ok(());
        }
        self.send(protocol::toggle_item(ITEM_LIGHT1 + light as u8)).await
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.listener.abort();
        self.writer.shutdown().await?;
        debug!("disconnected from spa");
        Ok(())
    }

    async fn cycle(&mut self, item: u8, current: u8, target: u8, speeds: u8) -> Result<()> {
        let states = speeds + 1;
        let toggles = (target + states - current % states) % states;
        trace!(item, current, target, toggles, "cycling item");
        for i in 0..toggles {
            if i > 0 {
                sleep(TOGGLE_SPACING).await;
            }
            self.send(protocol::toggle_item(item)).await?;
        }
        Ok(())
    }

    async fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        trace!(bytes = frame.len(), "sending frame");
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

impl Drop for BwaSession {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn listen<R>(mut reader: R, shared: Arc<Shared>, ready: watch::Sender<bool>)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::default();
    let mut buf = [0u8; 512];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("spa closed the connection");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "spa read failed");
                return;
            }
        };
        decoder.extend(&buf[..n]);
        while let Some(frame) = decoder.next_frame() {
            shared.apply(&frame, &ready);
        }
    }
}
