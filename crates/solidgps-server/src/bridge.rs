use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use solidgps::{
    entity::{self, Entity, EntityState},
    Coordinator, JsonFileStore, Login, TrackerEvent, UpdateError,
};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

/// Everything pushed to websocket clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BridgeMessage {
    State(EntityState),
    Event(TrackerEvent),
}

/// The entities of every configured device plus the channel their updates
/// go out on.
pub struct Bridge {
    entities: Vec<Box<dyn Entity>>,
    tx: broadcast::Sender<BridgeMessage>,
}

impl Default for Bridge {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            entities: Vec::new(),
            tx,
        }
    }
}

impl Bridge {
    /// Register a device and hand back the poller that keeps it updated.
    ///
    /// `store` is the file the CLI writes re-entered credentials to.
    pub fn add_device<L: Login>(
        &mut self,
        coordinator: Coordinator<L>,
        store: Arc<JsonFileStore>,
        period: Duration,
    ) -> DevicePoller<L> {
        self.entities.extend(entity::entities_for(&coordinator));
        DevicePoller::new(coordinator, store, period, self.tx.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeMessage> {
        self.tx.subscribe()
    }

    /// Websocket clients currently subscribed.
    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn states(&self) -> Vec<EntityState> {
        self.entities.iter().map(|e| e.state()).collect()
    }
}

/// Drives one coordinator on a fixed period.
///
/// While the coordinator waits for reauthentication each tick checks the
/// config file instead of the vendor.
pub struct DevicePoller<L> {
    coordinator: Coordinator<L>,
    store: Arc<JsonFileStore>,
    entities: Vec<Box<dyn Entity>>,
    events: broadcast::Receiver<TrackerEvent>,
    tx: broadcast::Sender<BridgeMessage>,
    period: Duration,
}

impl<L: Login> DevicePoller<L> {
    fn new(
        coordinator: Coordinator<L>,
        store: Arc<JsonFileStore>,
        period: Duration,
        tx: broadcast::Sender<BridgeMessage>,
    ) -> Self {
        Self {
            entities: entity::entities_for(&coordinator),
            events: coordinator.subscribe(),
            coordinator,
            store,
            tx,
            period,
        }
    }

    pub async fn run(mut self) {
        let mut ticks = tokio::time::interval(self.period);
        loop {
            ticks.tick().await;
            if self.coordinator.reauth_reason().is_some() && !self.pick_up_reauth() {
                continue;
            }
            self.poll_once().await;
        }
    }

    /// Poll and push the results out. False once the device needs the user.
    pub async fn poll_once(&mut self) -> bool {
        let keep_going = match self.coordinator.refresh().await {
            Ok(_) => {
                for e in &self.entities {
                    self.tx.send(BridgeMessage::State(e.state())).ok();
                }
                true
            }
            Err(UpdateError::Transient(e)) => {
                log::warn!("{}: {e}, retrying in {:?}", self.coordinator.imei(), self.period);
                true
            }
            Err(e) => {
                log::error!(
                    "{}: {e}; waiting for `solidgps-cli reauth` to update {}",
                    self.coordinator.imei(),
                    self.store.path().display()
                );
                false
            }
        };
        while let Ok(event) = self.events.try_recv() {
            self.tx.send(BridgeMessage::Event(event)).ok();
        }
        keep_going
    }

    /// Resume once the stored auth code or tracking code differs from the
    /// rejected one.
    pub fn pick_up_reauth(&mut self) -> bool {
        let config = match self.store.load() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("failed to read {}: {e}", self.store.path().display());
                return false;
            }
        };
        let stored = match config.entry(self.coordinator.imei()) {
            Some(entry) => &entry.credentials,
            None => return false,
        };
        let current = &self.coordinator.entry().credentials;
        if stored.auth_code == current.auth_code && stored.tracking_code == current.tracking_code {
            return false;
        }
        log::info!("{}: picked up new credentials, resuming", self.coordinator.imei());
        let (auth_code, tracking_code) = (stored.auth_code.clone(), stored.tracking_code.clone());
        if let Err(e) = self.coordinator.complete_reauth(auth_code, tracking_code) {
            log::warn!("{}: {e}", self.coordinator.imei());
        }
        true
    }
}
