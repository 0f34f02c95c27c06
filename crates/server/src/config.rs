use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use spabridge_bwa::DEFAULT_PORT;
use tracing::warn;

/// Runtime settings for the bridge, built once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Used whenever the hub's parameters carry no `host`; a non-empty hub value wins.
    pub spa_host: Option<String>,
    pub spa_port: u16,
    pub short_poll: Duration,
    pub long_poll: Duration,
    pub ready_timeout: Duration,
    pub settle_window: Duration,
    pub require_ready: bool,
    pub http_addr: Option<SocketAddr>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            spa_host: None,
            spa_port: DEFAULT_PORT,
            short_poll: Duration::from_secs(60),
            long_poll: Duration::from_secs(120),
            ready_timeout: Duration::from_secs(30),
            settle_window: Duration::from_secs(3),
            require_ready: false,
            http_addr: Some(SocketAddr::from(([0, 0, 0, 0], 8080))),
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = BridgeConfig::default();

        if let Some(v) = lookup("SPA_HOST") {
            let v = v.trim();
            if !v.is_empty() {
                cfg.spa_host = Some(v.to_string());
            }
        }
        if let Some(v) = lookup("SPA_PORT") {
            match v.parse::<u16>() {
                Ok(p) => cfg.spa_port = p,
                Err(_) => warn!(value = %v, "ignoring invalid SPA_PORT"),
            }
        }
        secs(&lookup, "SPA_SHORT_POLL_SECS", &mut cfg.short_poll, false);
        secs(&lookup, "SPA_LONG_POLL_SECS", &mut cfg.long_poll, false);
        secs(&lookup, "SPA_READY_TIMEOUT_SECS", &mut cfg.ready_timeout, true);
        secs(&lookup, "SPA_SETTLE_SECS", &mut cfg.settle_window, true);
        if let Some(v) = lookup("SPA_REQUIRE_READY") {
            cfg.require_ready = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = lookup("SPA_HTTP_ADDR") {
            if v.trim().is_empty() {
                cfg.http_addr = None;
            } else {
                match v.trim().parse::<SocketAddr>() {
                    Ok(addr) => cfg.http_addr = Some(addr),
                    Err(_) => warn!(value = %v, "ignoring invalid SPA_HTTP_ADDR"),
                }
            }
        }

        cfg
    }
}

// Poll periods must stay non-zero; tokio intervals panic on a zero period.
fn secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut Duration, zero_ok: bool) {
    let Some(v) = lookup(key) else { return };
    match v.trim().parse::<u64>() {
        Ok(0) if !zero_ok => warn!(key, "ignoring zero period"),
        Ok(s) => *slot = Duration::from_secs(s),
        Err(_) => warn!(key, value = %v, "ignoring invalid number of seconds"),
    }
}
