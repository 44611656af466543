use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{scrape, urls::Endpoints, Error};

pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

const LOGIN_ACTION: &str = "user_registration_ajax_login_submit";
const LOGIN_REDIRECT: &str = "/dashboard/";

/// What a successful web login hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResult {
    pub account_id: String,
    pub auth_code: String,
    /// Devices on the account keyed by IMEI.
    pub devices: BTreeMap<String, DeviceMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    #[serde(rename = "Nickname", default)]
    pub nickname: Option<String>,
    #[serde(rename = "DeviceType", default)]
    pub device_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Something that can trade an email and password for fresh tokens.
///
/// [`Authenticator`] is the only real implementation; the seam exists so the
/// scraping can be swapped without touching the coordinator.
#[async_trait]
pub trait Login: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResult, Error>;
}

/// Logs in through the vendor's WordPress site.
#[derive(Debug, Clone, Default)]
pub struct Authenticator {
    endpoints: Endpoints,
}

impl Authenticator {
    pub fn new(endpoints: Endpoints) -> Self {
        Self { endpoints }
    }

    /// Run the three step login on a fresh cookie jar.
    ///
    /// Rejected credentials come back as [`Error::Auth`], anything else that
    /// goes wrong as [`Error::Login`].
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResult, Error> {
        // one jar per attempt, dropped with the client
        let session = Client::builder()
            .cookie_store(true)
            .timeout(LOGIN_TIMEOUT)
            .build()
            .map_err(network_error)?;
        let nonce = self.get_login_nonce(&session).await?;
        self.submit_login(&session, email, password, &nonce).await?;
        let ret = self.extract_dashboard_data(&session).await?;
        log::debug!("login found {} device(s)", ret.devices.len());
        Ok(ret)
    }

    async fn get_login_nonce(&self, session: &Client) -> Result<String, Error> {
        let html = session
            .get(self.endpoints.login_page_url())
            .send()
            .await
            .map_err(network_error)?
            .text()
            .await
            .map_err(network_error)?;
        scrape::find_login_nonce(&html)
            .ok_or_else(|| Error::Login("Could not find login nonce in page".into()))
    }

    async fn submit_login(
        &self,
        session: &Client,
        email: &str,
        password: &str,
        nonce: &str,
    ) -> Result<(), Error> {
        let form = [
            ("username", email),
            ("password", password),
            ("redirect", LOGIN_REDIRECT),
        ];
        let res = session
            .post(self.endpoints.login_ajax_url())
            .query(&[("action", LOGIN_ACTION), ("security", nonce)])
            .form(&form)
            .send()
            .await
            .map_err(network_error)?;
        let status = res.status();
        let body = res.text().await.map_err(network_error)?;
        if !status.is_success() {
            return Err(Error::Login(format!("Login request returned HTTP {status}")));
        }
        let result: Value = serde_json::from_str(&body)
            .map_err(|e| Error::Login(format!("Unexpected login response: {e}")))?;
        check_login_reply(&result)
    }

    async fn extract_dashboard_data(&self, session: &Client) -> Result<LoginResult, Error> {
        let html = session
            .get(self.endpoints.dashboard_url())
            .send()
            .await
            .map_err(network_error)?
            .text()
            .await
            .map_err(network_error)?;
        parse_dashboard(&html)
    }
}

#[async_trait]
impl Login for Authenticator {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResult, Error> {
        Authenticator::login(self, email, password).await
    }
}

fn network_error(e: reqwest::Error) -> Error {
    Error::Login(format!("Network error during login: {e}"))
}

/// Only an explicit `"success": false` object means the credentials were
/// rejected. WordPress answers `-1` or `0` for a stale nonce or unknown action.
fn check_login_reply(result: &Value) -> Result<(), Error> {
    let reply = match result {
        Value::Object(reply) => reply,
        other => {
            return Err(Error::Login(format!("Unexpected login response: {other}")));
        }
    };
    match reply.get("success").and_then(Value::as_bool) {
        Some(true) => Ok(()),
        Some(false) => Err(Error::Auth(login_failure_message(result))),
        None => Err(Error::Login("Login response has no success flag".into())),
    }
}

fn login_failure_message(result: &Value) -> String {
    const DEFAULT: &str = "Login failed";
    match result.get("data") {
        Some(Value::Object(data)) => data
            .get("message")
            .and_then(Value::as_str)
            .map(scrape::strip_tags)
            .unwrap_or_else(|| DEFAULT.to_string()),
        Some(Value::String(data)) => scrape::strip_tags(data),
        _ => DEFAULT.to_string(),
    }
}

/// Pull the account tokens and device list out of the dashboard page.
pub fn parse_dashboard(html: &str) -> Result<LoginResult, Error> {
    let account_info = scrape::extract_js_object(html, "account_info")
        .filter(|m| !m.is_empty())
        .ok_or_else(|| Error::Login("Could not extract account_info from dashboard".into()))?;
    let device_info = scrape::extract_js_object(html, "device_info")
        .filter(|m| !m.is_empty())
        .ok_or_else(|| Error::Login("Could not extract device_info from dashboard".into()))?;

    let account_id = account_info.get("AccountID").and_then(token_string);
    let auth_code = account_info.get("AuthCode").and_then(token_string);
    let (account_id, auth_code) = match (account_id, auth_code) {
        (Some(account_id), Some(auth_code)) => (account_id, auth_code),
        _ => {
            return Err(Error::Login(
                "Missing AccountID or AuthCode in account_info".into(),
            ))
        }
    };

    let devices = device_info
        .into_iter()
        .map(|(imei, raw)| {
            let meta = serde_json::from_value(raw).unwrap_or_else(|e| {
                log::debug!("unexpected device_info entry for {imei}: {e}");
                DeviceMetadata::default()
            });
            (imei, meta)
        })
        .collect();

    Ok(LoginResult {
        account_id,
        auth_code,
        devices,
    })
}

/// Tokens may be numbers or strings; empty strings don't count.
fn token_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
