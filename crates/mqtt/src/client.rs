use std::collections::HashMap;
use std::sync::{Arc, atomic::{AtomicBool, Ordering}};
use std::time::Duration;

use rumqttc::{AsyncClient, ClientError, Event, EventLoop, Incoming, LastWill, MqttOptions, Outgoing, QoS};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;

const STATUS_ONLINE: &str = "online";
const STATUS_OFFLINE: &str = "offline";

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("MQTT client error: {0}")]
    Client(#[from] ClientError),
}

#[derive(Debug, Clone)]
pub enum MqttEvent {
    Connected,
    Disconnected,
    Publish { topic: String, payload: Vec<u8> },
}

#[derive(Clone)]
pub struct MqttService {
    client: AsyncClient,
    ready: Arc<AtomicBool>,
    events_tx: broadcast::Sender<MqttEvent>,
    subscriptions: Arc<RwLock<HashMap<String, QoS>>>,
    status_topic: Option<String>,
    _loop_handle: Arc<JoinHandle<()>>,
}

impl MqttService {
    pub async fn connect(config: MqttConfig) -> Result<Self, MqttError> {
        let (client, eventloop) = build_client(&config);
        let ready = Arc::new(AtomicBool::new(false));
        let (tx, _) = broadcast::channel(256);
        let subscriptions = Arc::new(RwLock::new(HashMap::new()));

        let loop_handle = tokio::spawn(run_eventloop(
            eventloop,
            client.clone(),
            ready.clone(),
            tx.clone(),
            subscriptions.clone(),
            config.status_topic.clone(),
        ));

        Ok(Self {
            client,
            ready,
            events_tx: tx,
            subscriptions,
            status_topic: config.status_topic,
            _loop_handle: Arc::new(loop_handle),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn events(&self) -> broadcast::Receiver<MqttEvent> {
        self.events_tx.subscribe()
    }

    pub async fn publish<T: Into<Vec<u8>>>(&self, topic: &str, retain: bool, payload: T) -> Result<(), MqttError> {
        self.client.publish(topic, QoS::AtLeastOnce, retain, payload).await?;
        Ok(())
    }

    /// Subscribe and remember the filter so it is restored after a reconnect.
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        self.client.subscribe(topic, qos).await?;
        self.subscriptions.write().await.insert(topic.to_string(), qos);
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), MqttError> {
        if let Some(topic) = &self.status_topic {
            self.client.publish(topic, QoS::AtLeastOnce, true, STATUS_OFFLINE).await?;
        }
        self.ready.store(false, Ordering::Relaxed);
        self.client.disconnect().await?;
        Ok(())
    }
}

fn build_client(config: &MqttConfig) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(&config.client_id, &config.host, config.port);
    opts.set_keep_alive(Duration::from_secs(config.keep_alive_secs as u64));
    opts.set_clean_session(config.clean_session);
    if let (Some(u), Some(p)) = (&config.username, &config.password) {
        opts.set_credentials(u.clone(), p.clone());
    }
    if let Some(topic) = &config.status_topic {
        opts.set_last_will(LastWill::new(topic, STATUS_OFFLINE, QoS::AtLeastOnce, true));
    }
    opts.set_request_channel_capacity(64);
    AsyncClient::new(opts, 64)
}

// Only non-blocking client calls in here: this loop drains the request channel.
async fn run_eventloop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    ready: Arc<AtomicBool>,
    events_tx: broadcast::Sender<MqttEvent>,
    subscriptions: Arc<RwLock<HashMap<String, QoS>>>,
    status_topic: Option<String>,
) {
    let mut backoff_secs = 1u64;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                info!("MQTT connected");
                ready.store(true, Ordering::Relaxed);
                backoff_secs = 1;

                for (topic, qos) in subscriptions.read().await.iter() {
                    debug!(%topic, "restoring subscription");
                    if let Err(err) = client.try_subscribe(topic, *qos) {
                        warn!(?err, %topic, "failed to restore subscription");
                    }
                }
                if let Some(topic) = &status_topic {
                    if let Err(err) = client.try_publish(topic, QoS::AtLeastOnce, true, STATUS_ONLINE) {
                        warn!(?err, "failed to publish online status");
                    }
                }
                let _ = events_tx.send(MqttEvent::Connected);
            }
            Ok(Event::Incoming(Incoming::Publish(p))) => {
                let _ = events_tx.send(MqttEvent::Publish {
                    topic: p.topic.clone(),
                    payload: p.payload.to_vec(),
                });
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("MQTT disconnect requested");
                ready.store(false, Ordering::Relaxed);
                let _ = events_tx.send(MqttEvent::Disconnected);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "MQTT connection error; retrying in {}s", backoff_secs);
                if ready.swap(false, Ordering::Relaxed) {
                    let _ = events_tx.send(MqttEvent::Disconnected);
                }
                sleep(Duration::from_secs(backoff_secs)).await;
                backoff_secs = (backoff_secs * 2).min(60);
            }
        }
    }
}
