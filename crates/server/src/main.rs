use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use rumqttc::QoS;
use spabridge_core::{bridge_status_topic, command_wildcard_all, params_topic};
use spabridge_mqtt::{MqttConfig, MqttEvent, MqttService};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod adapter;
mod config;
mod controller;
mod host;
mod http;
mod metrics;
mod node;
mod profile;

use adapter::{AdapterSettings, BwaConnector, DeviceAdapter};
use config::BridgeConfig;
use controller::{Controller, CustomParams};
use host::{HostCache, HostLink};
use metrics::Metrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let cfg = BridgeConfig::from_env();
    let metrics = Metrics::new();

    let mut mqtt_cfg = MqttConfig::from_env();
    mqtt_cfg.status_topic = Some(bridge_status_topic());
    info!(host = %mqtt_cfg.host, port = mqtt_cfg.port, "configuring MQTT client");
    let mqtt = MqttService::connect(mqtt_cfg)
        .await
        .context("failed to initialize MQTT")?;

    // Take the receiver before subscribing so retained parameters are not missed.
    let mut events = mqtt.events();
    mqtt.subscribe(&params_topic(), QoS::AtLeastOnce)
        .await
        .context("failed to subscribe to parameters")?;
    mqtt.subscribe(command_wildcard_all(), QoS::AtLeastOnce)
        .await
        .context("failed to subscribe to commands")?;

    let cache = Arc::new(RwLock::new(HostCache::default()));
    let (link, host_rx) = HostLink::channel();
    tokio::spawn(host::run_publisher(host_rx, mqtt.clone(), cache.clone()));

    if let Some(addr) = cfg.http_addr {
        let app = http::router(http::AppState {
            mqtt: mqtt.clone(),
            cache: cache.clone(),
            metrics: metrics.clone(),
        });
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind HTTP listener on {addr}"))?;
        info!(%addr, "starting HTTP server");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "HTTP server stopped");
            }
        });
    }

    let adapter = Arc::new(DeviceAdapter::new(
        BwaConnector::new(cfg.spa_port),
        AdapterSettings::from(&cfg),
        metrics.clone(),
    ));
    let mut controller = Controller::new(adapter, link).with_fallback_host(cfg.spa_host.clone());
    controller.start();

    if cfg.spa_host.is_some() {
        controller.handle_params(&CustomParams::new()).await;
    }

    let mut short_poll = interval_at(Instant::now() + cfg.short_poll, cfg.short_poll);
    short_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut long_poll = interval_at(Instant::now() + cfg.long_poll, cfg.long_poll);
    long_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = short_poll.tick() => controller.short_poll().await,
            _ = long_poll.tick() => controller.long_poll(),
            event = events.recv() => match event {
                Ok(MqttEvent::Publish { topic, payload }) => controller.on_message(&topic, &payload).await,
                Ok(MqttEvent::Connected) => metrics.mqtt_connected.set(1),
                Ok(MqttEvent::Disconnected) => metrics.mqtt_connected.set(0),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "MQTT event receiver lagged"),
                Err(RecvError::Closed) => {
                    error!("MQTT event stream closed");
                    break;
                }
            },
        }
    }

    controller.stop();
    if let Err(e) = mqtt.disconnect().await {
        warn!(error = %e, "MQTT disconnect failed");
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,spabridge=info,rumqttc=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
