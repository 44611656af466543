//! Poll SolidGPS trackers and expose them to a home automation host.
//!
//! A [`Coordinator`] owns one device's credentials and latest
//! [`LocationSnapshot`]. Hosts drive it on a timer and read the result through
//! the adapters in [`entity`]. When the vendor rejects the stored auth code the
//! coordinator logs in through the vendor website with the saved email and
//! password, writes the new tokens through a [`ConfigStore`] and retries once.

pub mod api;
pub mod auth;
pub mod config;
pub mod coordinator;
pub mod entity;
mod error;
pub mod flow;
pub mod location;
pub mod scrape;
pub mod urls;

pub use api::{build_client, ApiClient, RawResponse};
pub use auth::{Authenticator, DeviceMetadata, Login, LoginResult};
pub use config::{Config, ConfigStore, Credentials, EntryConfig, JsonFileStore};
pub use coordinator::{Coordinator, SnapshotReader, TrackerEvent, UpdateError};
pub use error::{ConfigError, Error};
pub use flow::{ConfigFlow, FlowError, ManualSetup};
pub use location::{extract, LocationSnapshot, LocationSource};
pub use urls::Endpoints;
