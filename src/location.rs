use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::RawResponse;

/// Course value the vendor sends when the heading is unknown.
const UNKNOWN_COURSE: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    Gps,
    Cell,
}

impl LocationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gps => "gps",
            Self::Cell => "cell",
        }
    }
}

impl fmt::Display for LocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The latest known position of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSnapshot {
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    /// Fix time in epoch seconds.
    pub utc: Option<i64>,
    pub quality: Option<String>,
    pub source: LocationSource,
}

impl LocationSnapshot {
    /// A missing speed counts as standing still.
    pub fn is_moving(&self) -> bool {
        is_moving(self.speed)
    }
}

pub(crate) fn is_moving(speed: Option<f64>) -> bool {
    speed.map(|s| s > 0.0).unwrap_or(false)
}

/// Pull the latest fix for `imei` out of a data response.
///
/// GPS fixes win over cell tower fixes. Unparsable coordinates discard the
/// whole fix, any other unparsable field is dropped on its own.
pub fn extract(response: &RawResponse, imei: &str) -> Option<LocationSnapshot> {
    let device = match response.device(imei) {
        Some(device) => device,
        None => {
            log::warn!("IMEI {imei} not found in API response");
            return None;
        }
    };
    let (entry, source) = match first_fix(device, "gps_data") {
        Some(entry) => (entry, LocationSource::Gps),
        None => match first_fix(device, "cell_data") {
            Some(entry) => (entry, LocationSource::Cell),
            None => {
                log::debug!("No GPS or cell data available for IMEI {imei}");
                return None;
            }
        },
    };

    let latitude = entry.get("latitude").and_then(parse_float);
    let longitude = entry.get("longitude").and_then(parse_float);
    let (latitude, longitude) = match (latitude, longitude) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => {
            log::warn!(
                "Failed to parse coordinates for IMEI {imei}: {:?}, {:?}",
                entry.get("latitude"),
                entry.get("longitude")
            );
            return None;
        }
    };

    let speed = optional_field(entry, "sog", imei, parse_float);
    let course = entry
        .get("cog")
        .filter(|cog| !is_unknown_course(cog))
        .and_then(|cog| {
            let ret = parse_float(cog);
            if ret.is_none() {
                log::debug!("Failed to parse course for IMEI {imei}: {cog}");
            }
            ret
        });
    let utc = optional_field(entry, "UTC", imei, parse_epoch);
    let quality = entry.get("quality").and_then(as_text);

    Some(LocationSnapshot {
        latitude,
        longitude,
        speed,
        course,
        utc,
        quality,
        source,
    })
}

fn first_fix<'a>(device: &'a Value, key: &str) -> Option<&'a Value> {
    device.get(key)?.as_array()?.first()
}

fn optional_field<T>(
    entry: &Value,
    key: &str,
    imei: &str,
    parse: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    let raw = entry.get(key).filter(|v| !v.is_null())?;
    let ret = parse(raw);
    if ret.is_none() {
        log::debug!("Failed to parse {key} for IMEI {imei}: {raw}");
    }
    ret
}

fn is_unknown_course(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty() || s == UNKNOWN_COURSE,
        _ => false,
    }
}

fn parse_float(value: &Value) -> Option<f64> {
    let ret = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    ret.is_finite().then_some(ret)
}

fn parse_epoch(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
