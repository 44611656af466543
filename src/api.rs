use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, REFERER},
    Client, StatusCode,
};
use serde_json::Value;

use crate::{config::Credentials, urls::Endpoints, Error};

pub const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the HTTP client used for data requests.
pub fn build_client() -> Result<Client, Error> {
    let ret = Client::builder().timeout(API_TIMEOUT).build()?;
    Ok(ret)
}

/// A validated body from the data endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse(Value);

impl RawResponse {
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn status(&self) -> Option<i64> {
        status_code(&self.0)
    }

    /// The `Results` record for one device.
    pub fn device(&self, imei: &str) -> Option<&Value> {
        self.0.get("Results")?.as_object()?.get(imei)
    }

}

/// Client for the per-device data endpoint.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    endpoints: Endpoints,
    imei: String,
    account_id: Option<String>,
    auth_code: String,
    tracking_code: Option<String>,
}

impl ApiClient {
    pub fn new(http: Client, endpoints: Endpoints, credentials: &Credentials) -> Self {
        Self {
            http,
            endpoints,
            imei: credentials.imei.clone(),
            account_id: credentials.account_id.clone(),
            auth_code: credentials.auth_code.clone(),
            tracking_code: credentials.tracking_code.clone(),
        }
    }

    /// Request the latest fixes for this device.
    pub async fn fetch(&self) -> Result<RawResponse, Error> {
        let params = [
            ("IMEI", self.imei.as_str()),
            ("account_id", self.account_id.as_deref().unwrap_or_default()),
            ("auth_code", self.auth_code.as_str()),
            ("tracking_code", self.tracking_code.as_deref().unwrap_or_default()),
            ("startEpoch", ""),
            ("endEpoch", ""),
        ];
        log::debug!("requesting latest data for IMEI {}", self.imei);
        let res = self
            .http
            .get(self.endpoints.data_url())
            .query(&params)
            .headers(self.required_headers())
            .timeout(API_TIMEOUT)
            .send()
            .await?;
        if res.status() != StatusCode::OK {
            return Err(Error::HttpStatus(res.status()));
        }
        let body = res.bytes().await?;
        let data: Value = serde_json::from_slice(&body).map_err(Error::InvalidJson)?;
        if is_empty(&data) {
            return Err(Error::EmptyResponse);
        }
        match status_code(&data) {
            Some(200) => Ok(RawResponse(data)),
            Some(401) => Err(Error::Auth("Authentication failed (status 401)".into())),
            _ => Err(Error::VendorStatus(
                data.get("status").map(Value::to_string).unwrap_or_else(|| "missing".into()),
            )),
        }
    }

    /// Swap in the tokens harvested by a fresh login.
    pub fn update_credentials(
        &mut self,
        account_id: impl Into<String>,
        auth_code: impl Into<String>,
    ) {
        self.account_id = Some(account_id.into());
        self.auth_code = auth_code.into();
    }

    pub fn set_tracking_code(&mut self, tracking_code: Option<String>) {
        self.tracking_code = tracking_code;
    }

    pub fn set_auth_code(&mut self, auth_code: impl Into<String>) {
        self.auth_code = auth_code.into();
    }

    /// Succeeds when the vendor accepts the held credentials.
    pub async fn validate_credentials(&self) -> Result<(), Error> {
        self.fetch().await?;
        Ok(())
    }

    fn required_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-requested-with", HeaderValue::from_static("XMLHttpRequest"));
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        if let Ok(referer) = HeaderValue::from_str(&self.endpoints.referer()) {
            headers.insert(REFERER, referer);
        }
        headers
    }
}

fn is_empty(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(_) => false,
    }
}

/// Only a numeric `status` counts; a quoted one is a vendor error.
fn status_code(data: &Value) -> Option<i64> {
    data.get("status")?.as_i64()
}
