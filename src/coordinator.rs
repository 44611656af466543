use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::{
    api::{ApiClient, RawResponse},
    auth::{Authenticator, Login},
    config::{ConfigStore, EntryConfig},
    error::ConfigError,
    location::{self, LocationSnapshot},
    urls::Endpoints,
    Error,
};

pub const EVENT_MOTION_STARTED: &str = "solidgps_motion_started";
pub const EVENT_MOTION_STOPPED: &str = "solidgps_motion_stopped";
pub const EVENT_REAUTH_REQUIRED: &str = "solidgps_reauth_required";

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data")]
pub enum TrackerEvent {
    #[serde(rename = "solidgps_motion_started")]
    MotionStarted { imei: String },
    #[serde(rename = "solidgps_motion_stopped")]
    MotionStopped { imei: String },
    #[serde(rename = "solidgps_reauth_required")]
    ReauthRequired { imei: String, reason: String },
}

impl TrackerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MotionStarted { .. } => EVENT_MOTION_STARTED,
            Self::MotionStopped { .. } => EVENT_MOTION_STOPPED,
            Self::ReauthRequired { .. } => EVENT_REAUTH_REQUIRED,
        }
    }

    pub fn imei(&self) -> &str {
        match self {
            Self::MotionStarted { imei }
            | Self::MotionStopped { imei }
            | Self::ReauthRequired { imei, .. } => imei,
        }
    }
}

/// Why a poll did not produce fresh data.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Try again on the next scheduled poll.
    #[error("error communicating with SolidGPS: {0}")]
    Transient(#[source] Error),
    /// The user has to supply new credentials before polling resumes.
    #[error("SolidGPS reauthentication required: {0}")]
    ReauthRequired(String),
}

impl UpdateError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ReauthRequired(_))
    }
}

/// Read side of a coordinator's snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotReader(watch::Receiver<Option<LocationSnapshot>>);

impl From<watch::Receiver<Option<LocationSnapshot>>> for SnapshotReader {
    fn from(rx: watch::Receiver<Option<LocationSnapshot>>) -> Self {
        Self(rx)
    }
}

impl SnapshotReader {
    pub fn get(&self) -> Option<LocationSnapshot> {
        self.0.borrow().clone()
    }
}

/// Polls one device and keeps its credentials fresh.
///
/// The coordinator never schedules itself: the host calls [`Coordinator::refresh`]
/// on whatever period it likes.
pub struct Coordinator<L = Authenticator> {
    client: ApiClient,
    login: L,
    entry: EntryConfig,
    store: Arc<dyn ConfigStore>,
    previous_speed: Option<f64>,
    snapshot: watch::Sender<Option<LocationSnapshot>>,
    events: broadcast::Sender<TrackerEvent>,
    reauth_reason: Option<String>,
}

impl Coordinator<Authenticator> {
    pub fn new(
        http: Client,
        endpoints: Endpoints,
        entry: EntryConfig,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        let client = ApiClient::new(http, endpoints.clone(), &entry.credentials);
        Self::with_login(client, Authenticator::new(endpoints), entry, store)
    }
}

impl<L: Login> Coordinator<L> {
    pub fn with_login(
        client: ApiClient,
        login: L,
        entry: EntryConfig,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        let (snapshot, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            client,
            login,
            entry,
            store,
            previous_speed: None,
            snapshot,
            events,
            reauth_reason: None,
        }
    }

    pub fn imei(&self) -> &str {
        self.entry.imei()
    }

    pub fn entry(&self) -> &EntryConfig {
        &self.entry
    }

    pub fn snapshot(&self) -> Option<LocationSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn snapshot_reader(&self) -> SnapshotReader {
        SnapshotReader(self.snapshot.subscribe())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Set while polling is blocked on the user.
    pub fn reauth_reason(&self) -> Option<&str> {
        self.reauth_reason.as_deref()
    }

    /// Run one poll.
    ///
    /// On success the new snapshot (possibly none) is published and returned.
    /// On a transient failure the previous snapshot stays in place.
    pub async fn refresh(&mut self) -> Result<Option<LocationSnapshot>, UpdateError> {
        if let Some(reason) = &self.reauth_reason {
            return Err(UpdateError::ReauthRequired(reason.clone()));
        }
        let response = match self.client.fetch().await {
            Ok(response) => response,
            Err(e) if e.is_auth() => self.handle_auth_refresh(e).await?,
            Err(e) => return Err(UpdateError::Transient(e)),
        };
        let data = location::extract(&response, self.imei());
        if let Some(snap) = &data {
            self.fire_motion_events(snap.speed);
            self.previous_speed = snap.speed;
        }
        self.snapshot.send_replace(data.clone());
        Ok(data)
    }

    async fn handle_auth_refresh(&mut self, original: Error) -> Result<RawResponse, UpdateError> {
        let (email, password) = match self.entry.credentials.login_details() {
            Some((email, password)) => (email.to_string(), password.to_string()),
            None => {
                return Err(self.fatal(format!(
                    "SolidGPS authentication expired ({original}). \
                     Please re-authenticate with email and password."
                )))
            }
        };

        log::debug!("Auth expired, attempting re-login for {email}");
        let login = match self.login.login(&email, &password).await {
            Ok(login) => login,
            Err(e) if e.is_auth() => {
                return Err(self.fatal(format!("SolidGPS re-login failed: {e}")))
            }
            Err(e) => return Err(UpdateError::Transient(e)),
        };

        self.client.update_credentials(login.account_id.clone(), login.auth_code.clone());
        self.entry.credentials.account_id = Some(login.account_id);
        self.entry.credentials.auth_code = login.auth_code;
        if let Err(e) = self.store.save_entry(&self.entry) {
            log::warn!("Failed to persist refreshed credentials for {}: {e}", self.imei());
        }
        log::info!("SolidGPS credentials refreshed successfully");

        match self.client.fetch().await {
            Ok(response) => Ok(response),
            Err(e) if e.is_auth() => {
                Err(self.fatal("SolidGPS authentication failed after re-login".into()))
            }
            Err(e) => Err(UpdateError::Transient(e)),
        }
    }

    /// Latch the coordinator until [`Coordinator::complete_reauth`] runs.
    fn fatal(&mut self, reason: String) -> UpdateError {
        log::warn!("{reason}");
        self.reauth_reason = Some(reason.clone());
        self.events
            .send(TrackerEvent::ReauthRequired {
                imei: self.imei().to_string(),
                reason: reason.clone(),
            })
            .ok();
        UpdateError::ReauthRequired(reason)
    }

    fn fire_motion_events(&self, current_speed: Option<f64>) {
        let event = match motion_transition(self.previous_speed, current_speed) {
            Some(Motion::Started) => TrackerEvent::MotionStarted {
                imei: self.imei().to_string(),
            },
            Some(Motion::Stopped) => TrackerEvent::MotionStopped {
                imei: self.imei().to_string(),
            },
            None => return,
        };
        log::debug!("{} for {}", event.event_type(), self.imei());
        self.events.send(event).ok();
    }

    /// Install credentials the user entered after a fatal auth failure and
    /// resume polling.
    pub fn complete_reauth(
        &mut self,
        auth_code: String,
        tracking_code: Option<String>,
    ) -> Result<(), ConfigError> {
        self.client.set_auth_code(auth_code.clone());
        self.client.set_tracking_code(tracking_code.clone());
        self.entry.credentials.auth_code = auth_code;
        self.entry.credentials.tracking_code = tracking_code;
        self.reauth_reason = None;
        self.store.save_entry(&self.entry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    Started,
    Stopped,
}

/// Compare the speeds of two consecutive polls.
pub fn motion_transition(previous: Option<f64>, current: Option<f64>) -> Option<Motion> {
    match (location::is_moving(previous), location::is_moving(current)) {
        (false, true) => Some(Motion::Started),
        (true, false) => Some(Motion::Stopped),
        _ => None,
    }
}
