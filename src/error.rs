use reqwest::StatusCode;

/// Errors raised while talking to SolidGPS.
///
/// Everything except [`Error::Auth`] and [`Error::Login`] is a generic API
/// failure the host should retry on its own schedule.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("error communicating with SolidGPS API: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("SolidGPS API returned HTTP {0}")]
    HttpStatus(StatusCode),
    #[error("invalid JSON from SolidGPS API: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("SolidGPS API returned empty response")]
    EmptyResponse,
    #[error("SolidGPS API returned status {0}")]
    VendorStatus(String),
    #[error("invalid url: {0}")]
    Url(String),
    /// Credentials were rejected by the vendor.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The scraped login flow failed for a reason worth retrying later.
    #[error("login error: {0}")]
    Login(String),
}

impl Error {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub fn is_login(&self) -> bool {
        matches!(self, Self::Login(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no configured device with IMEI {0}")]
    UnknownEntry(String),
}
