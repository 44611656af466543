//! Host-facing views of a coordinator's snapshot.
//!
//! Each adapter holds a [`SnapshotReader`] and computes its properties on
//! demand, so it never goes stale relative to the coordinator.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::{
    config::EntryConfig,
    coordinator::{Coordinator, SnapshotReader},
    location::LocationSnapshot,
    Login,
};

pub const DOMAIN: &str = "solidgps";
pub const MANUFACTURER: &str = "SolidGPS";
pub const MODEL: &str = "GPS Tracker";

pub const ATTR_SPEED: &str = "speed";
pub const ATTR_COURSE: &str = "course";
pub const ATTR_GPS_QUALITY: &str = "gps_quality";
pub const ATTR_LOCATION_SOURCE: &str = "location_source";
pub const ATTR_LAST_GPS_UPDATE: &str = "last_gps_update";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    DeviceTracker,
    Sensor,
    BinarySensor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
}

impl DeviceInfo {
    pub fn for_entry(entry: &EntryConfig) -> Self {
        Self {
            identifiers: vec![(DOMAIN.to_string(), entry.imei().to_string())],
            name: entry.title(),
            manufacturer: MANUFACTURER.to_string(),
            model: MODEL.to_string(),
        }
    }
}

/// What a host shows for one entity at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub unique_id: String,
    pub platform: Platform,
    /// `None` means the entity takes the device's name.
    pub name: Option<String>,
    pub state: Value,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

pub trait Entity: Send + Sync {
    fn unique_id(&self) -> String;
    fn platform(&self) -> Platform;
    fn state(&self) -> EntityState;
}

/// The device tracker entity.
#[derive(Debug, Clone)]
pub struct Tracker {
    reader: SnapshotReader,
    imei: String,
    device: DeviceInfo,
}

impl Tracker {
    pub fn new(reader: SnapshotReader, entry: &EntryConfig) -> Self {
        Self {
            reader,
            imei: entry.imei().to_string(),
            device: DeviceInfo::for_entry(entry),
        }
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn source_type(&self) -> &'static str {
        "gps"
    }

    pub fn latitude(&self) -> Option<f64> {
        self.reader.get().map(|s| s.latitude)
    }

    pub fn longitude(&self) -> Option<f64> {
        self.reader.get().map(|s| s.longitude)
    }

    /// The vendor reports no accuracy.
    pub fn location_accuracy(&self) -> f64 {
        0.0
    }

    pub fn extra_state_attributes(&self) -> Option<Map<String, Value>> {
        self.reader.get().map(|snap| tracker_attributes(&snap))
    }
}

fn tracker_attributes(snap: &LocationSnapshot) -> Map<String, Value> {
    let mut attrs = Map::new();
    if let Some(speed) = snap.speed {
        attrs.insert(ATTR_SPEED.into(), json!(speed));
    }
    if let Some(course) = snap.course {
        attrs.insert(ATTR_COURSE.into(), json!(course));
    }
    if let Some(quality) = &snap.quality {
        attrs.insert(ATTR_GPS_QUALITY.into(), json!(quality));
    }
    attrs.insert(ATTR_LOCATION_SOURCE.into(), json!(snap.source));
    if let Some(ts) = snap.utc.and_then(format_timestamp) {
        attrs.insert(ATTR_LAST_GPS_UPDATE.into(), json!(ts));
    }
    attrs
}

/// RFC 3339 rendering of an epoch timestamp.
pub fn format_timestamp(utc: i64) -> Option<String> {
    OffsetDateTime::from_unix_timestamp(utc)
        .ok()?
        .format(&Rfc3339)
        .ok()
}

impl Entity for Tracker {
    fn unique_id(&self) -> String {
        format!("{DOMAIN}_{}", self.imei)
    }

    fn platform(&self) -> Platform {
        Platform::DeviceTracker
    }

    // zone state is left to the host
    fn state(&self) -> EntityState {
        let mut attributes = Map::new();
        attributes.insert("source_type".into(), json!(self.source_type()));
        if let Some(snap) = self.reader.get() {
            attributes.insert("latitude".into(), json!(snap.latitude));
            attributes.insert("longitude".into(), json!(snap.longitude));
            attributes.insert("gps_accuracy".into(), json!(self.location_accuracy()));
            attributes.extend(tracker_attributes(&snap));
        }
        EntityState {
            unique_id: self.unique_id(),
            platform: self.platform(),
            name: None,
            state: Value::Null,
            attributes,
        }
    }
}

/// Static description of a sensor.
pub struct SensorDescription {
    pub key: &'static str,
    pub name: &'static str,
    pub device_class: Option<&'static str>,
    pub unit_of_measurement: Option<&'static str>,
    pub state_class: Option<&'static str>,
    pub value_fn: fn(&LocationSnapshot) -> Option<Value>,
}

pub static SENSOR_DESCRIPTIONS: [SensorDescription; 2] = [
    SensorDescription {
        key: "speed",
        name: "Speed",
        device_class: Some("speed"),
        unit_of_measurement: Some("km/h"),
        state_class: Some("measurement"),
        value_fn: speed_value,
    },
    SensorDescription {
        key: "gps_quality",
        name: "GPS quality",
        device_class: None,
        unit_of_measurement: None,
        state_class: None,
        value_fn: quality_value,
    },
];

impl std::fmt::Debug for SensorDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorDescription")
            .field("key", &self.key)
            .field("device_class", &self.device_class)
            .field("unit_of_measurement", &self.unit_of_measurement)
            .finish()
    }
}

fn speed_value(snap: &LocationSnapshot) -> Option<Value> {
    snap.speed.map(|s| json!(s))
}

fn quality_value(snap: &LocationSnapshot) -> Option<Value> {
    snap.quality.clone().map(Value::String)
}

#[derive(Debug, Clone)]
pub struct Sensor {
    reader: SnapshotReader,
    imei: String,
    description: &'static SensorDescription,
}

impl Sensor {
    pub fn new(
        reader: SnapshotReader,
        imei: &str,
        description: &'static SensorDescription,
    ) -> Self {
        Self {
            reader,
            imei: imei.to_string(),
            description,
        }
    }

    pub fn native_value(&self) -> Option<Value> {
        self.reader.get().and_then(|snap| (self.description.value_fn)(&snap))
    }
}

impl Entity for Sensor {
    fn unique_id(&self) -> String {
        format!("{DOMAIN}_{}_{}", self.imei, self.description.key)
    }

    fn platform(&self) -> Platform {
        Platform::Sensor
    }

    fn state(&self) -> EntityState {
        let mut attributes = Map::new();
        let desc = self.description;
        for (key, value) in [
            ("device_class", desc.device_class),
            ("unit_of_measurement", desc.unit_of_measurement),
            ("state_class", desc.state_class),
        ] {
            if let Some(value) = value {
                attributes.insert(key.into(), json!(value));
            }
        }
        EntityState {
            unique_id: self.unique_id(),
            platform: self.platform(),
            name: Some(desc.name.to_string()),
            state: self.native_value().unwrap_or(Value::Null),
            attributes,
        }
    }
}

/// On while the last fix reports a positive speed.
#[derive(Debug, Clone)]
pub struct MovingSensor {
    reader: SnapshotReader,
    imei: String,
}

impl MovingSensor {
    pub fn new(reader: SnapshotReader, imei: &str) -> Self {
        Self {
            reader,
            imei: imei.to_string(),
        }
    }

    /// `None` until there is a snapshot.
    pub fn is_on(&self) -> Option<bool> {
        self.reader.get().map(|snap| snap.is_moving())
    }
}

impl Entity for MovingSensor {
    fn unique_id(&self) -> String {
        format!("{DOMAIN}_{}_moving", self.imei)
    }

    fn platform(&self) -> Platform {
        Platform::BinarySensor
    }

    fn state(&self) -> EntityState {
        let mut attributes = Map::new();
        attributes.insert("device_class".into(), json!("motion"));
        EntityState {
            unique_id: self.unique_id(),
            platform: self.platform(),
            name: Some("Moving".to_string()),
            state: self.is_on().map(Value::Bool).unwrap_or(Value::Null),
            attributes,
        }
    }
}

/// Every entity a configured device exposes.
pub fn entities_for<L: Login>(coordinator: &Coordinator<L>) -> Vec<Box<dyn Entity>> {
    let entry = coordinator.entry();
    let imei = entry.imei();
    let mut ret: Vec<Box<dyn Entity>> = vec![
        Box::new(Tracker::new(coordinator.snapshot_reader(), entry)),
        Box::new(MovingSensor::new(coordinator.snapshot_reader(), imei)),
    ];
    for description in &SENSOR_DESCRIPTIONS {
        ret.push(Box::new(Sensor::new(
            coordinator.snapshot_reader(),
            imei,
            description,
        )));
    }
    ret
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use tokio::sync::watch;

    use super::*;
    use crate::{
        api::build_client,
        config::{Credentials, EntryConfig, JsonFileStore},
        coordinator::Coordinator,
        location::LocationSource,
        urls::Endpoints,
    };

    fn entry() -> EntryConfig {
        let credentials = Credentials {
            imei: "867530912345".into(),
            account_id: None,
            auth_code: "a".into(),
            tracking_code: None,
            email: None,
            password: None,
        };
        EntryConfig::new(credentials, None)
    }

    fn snapshot() -> LocationSnapshot {
        LocationSnapshot {
            latitude: 1.5,
            longitude: 2.5,
            speed: Some(10.0),
            course: None,
            utc: Some(1000),
            quality: Some("3".into()),
            source: LocationSource::Gps,
        }
    }

    fn reader(
        snap: Option<LocationSnapshot>,
    ) -> (watch::Sender<Option<LocationSnapshot>>, SnapshotReader) {
        let (tx, rx) = watch::channel(snap);
        (tx, SnapshotReader::from(rx))
    }

    #[test]
    fn tracker_properties() {
        let (tx, rx) = reader(None);
        let tracker = Tracker::new(rx, &entry());
        assert_eq!(tracker.unique_id(), "solidgps_867530912345");
        assert_eq!(tracker.device_info().name, "SolidGPS 2345");
        assert_eq!(tracker.latitude(), None);
        assert_eq!(tracker.extra_state_attributes(), None);

        tx.send_replace(Some(snapshot()));
        assert_eq!(tracker.latitude(), Some(1.5));
        assert_eq!(tracker.longitude(), Some(2.5));
        assert_eq!(tracker.location_accuracy(), 0.0);
        assert_eq!(
            Value::Object(tracker.extra_state_attributes().unwrap()),
            json!({
                "speed": 10.0,
                "gps_quality": "3",
                "location_source": "gps",
                "last_gps_update": "1970-01-01T00:16:40Z",
            })
        );
    }

    #[test]
    fn tracker_state() {
        let (_tx, rx) = reader(Some(snapshot()));
        let state = Tracker::new(rx, &entry()).state();
        assert_eq!(state.platform, Platform::DeviceTracker);
        assert_eq!(state.state, Value::Null);
        assert_eq!(state.attributes["latitude"], json!(1.5));
        assert_eq!(state.attributes["source_type"], json!("gps"));
        assert_eq!(state.attributes["gps_accuracy"], json!(0.0));
        assert!(!state.attributes.contains_key(ATTR_COURSE));
    }

    #[test]
    fn sensors() {
        let (tx, rx) = reader(None);
        let speed = Sensor::new(rx.clone(), "1", &SENSOR_DESCRIPTIONS[0]);
        let quality = Sensor::new(rx, "1", &SENSOR_DESCRIPTIONS[1]);
        assert_eq!(speed.unique_id(), "solidgps_1_speed");
        assert_eq!(quality.unique_id(), "solidgps_1_gps_quality");
        assert_eq!(speed.native_value(), None);

        tx.send_replace(Some(snapshot()));
        assert_eq!(speed.native_value(), Some(json!(10.0)));
        assert_eq!(quality.native_value(), Some(json!("3")));
        let state = speed.state();
        assert_eq!(state.attributes["unit_of_measurement"], json!("km/h"));
        assert_eq!(state.attributes["device_class"], json!("speed"));
        assert!(quality.state().attributes.is_empty());
    }

    #[test]
    fn moving_sensor() {
        let (tx, rx) = reader(None);
        let moving = MovingSensor::new(rx, "1");
        assert_eq!(moving.unique_id(), "solidgps_1_moving");
        assert_eq!(moving.is_on(), None);
        assert_eq!(moving.state().state, Value::Null);

        let mut snap = snapshot();
        tx.send_replace(Some(snap.clone()));
        assert_eq!(moving.is_on(), Some(true));
        snap.speed = None;
        tx.send_replace(Some(snap.clone()));
        assert_eq!(moving.is_on(), Some(false));
        snap.speed = Some(0.0);
        tx.send_replace(Some(snap));
        assert_eq!(moving.state().state, json!(false));
    }

    #[test]
    fn timestamps() {
        assert_eq!(format_timestamp(0).as_deref(), Some("1970-01-01T00:00:00Z"));
        assert_eq!(
            format_timestamp(1_700_000_000).as_deref(),
            Some("2023-11-14T22:13:20Z")
        );
    }

    #[test]
    fn one_device_four_entities() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path().join("config.json")));
        let coordinator = Coordinator::new(
            build_client().unwrap(),
            Endpoints::default(),
            entry(),
            store,
        );
        let ids: Vec<String> = entities_for(&coordinator)
            .iter()
            .map(|e| e.unique_id())
            .collect();
        assert_eq!(
            ids,
            [
                "solidgps_867530912345",
                "solidgps_867530912345_moving",
                "solidgps_867530912345_speed",
                "solidgps_867530912345_gps_quality",
            ]
        );
    }
}
