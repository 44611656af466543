//! Interactive setup and reauthentication of device entries.

use reqwest::Client;

use crate::{
    api::ApiClient,
    auth::{Login, LoginResult},
    config::{Config, Credentials, EntryConfig},
    urls::Endpoints,
    Error,
};

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("invalid credentials: {0}")]
    InvalidAuth(String),
    #[error("cannot connect to SolidGPS: {0}")]
    CannotConnect(String),
    #[error("device {0} is already configured")]
    AlreadyConfigured(String),
    #[error("device {0} is not on this account")]
    UnknownDevice(String),
}

impl From<Error> for FlowError {
    fn from(e: Error) -> Self {
        match e {
            Error::Auth(msg) => Self::InvalidAuth(msg),
            other => Self::CannotConnect(other.to_string()),
        }
    }
}

/// Tokens entered by hand instead of through a web login.
#[derive(Debug, Clone, Default)]
pub struct ManualSetup {
    pub imei: String,
    pub auth_code: String,
    pub tracking_code: String,
    pub device_name: Option<String>,
}

/// Builds validated entries; the caller decides where they get stored.
#[derive(Debug, Clone)]
pub struct ConfigFlow {
    http: Client,
    endpoints: Endpoints,
}

impl ConfigFlow {
    pub fn new(http: Client, endpoints: Endpoints) -> Self {
        Self { http, endpoints }
    }

    /// Log in and list the devices on the account.
    pub async fn discover<L: Login>(
        &self,
        login: &L,
        email: &str,
        password: &str,
    ) -> Result<LoginResult, FlowError> {
        Ok(login.login(email, password).await?)
    }

    /// Create an entry for one of the devices found by [`ConfigFlow::discover`].
    ///
    /// The entry keeps the email and password so an expired auth code can be
    /// renewed without the user.
    pub async fn setup_from_login(
        &self,
        existing: &Config,
        login: &LoginResult,
        imei: &str,
        email: &str,
        password: &str,
        device_name: Option<String>,
    ) -> Result<EntryConfig, FlowError> {
        abort_if_configured(existing, imei)?;
        let device = login
            .devices
            .get(imei)
            .ok_or_else(|| FlowError::UnknownDevice(imei.to_string()))?;
        let device_name = device_name
            .filter(|s| !s.trim().is_empty())
            .or_else(|| device.nickname.clone());
        let credentials = Credentials {
            imei: imei.to_string(),
            account_id: Some(login.account_id.clone()),
            auth_code: login.auth_code.clone(),
            tracking_code: None,
            email: Some(email.to_string()),
            password: Some(password.to_string()),
        };
        self.validate(&credentials).await?;
        Ok(EntryConfig::new(credentials, device_name))
    }

    pub async fn setup_manual(
        &self,
        existing: &Config,
        input: ManualSetup,
    ) -> Result<EntryConfig, FlowError> {
        let imei = input.imei.trim().to_string();
        abort_if_configured(existing, &imei)?;
        let credentials = Credentials {
            imei,
            account_id: None,
            auth_code: input.auth_code,
            tracking_code: Some(input.tracking_code),
            email: None,
            password: None,
        };
        self.validate(&credentials).await?;
        Ok(EntryConfig::new(credentials, input.device_name))
    }

    /// Check replacement tokens for an entry whose auth code stopped working
    /// and return the updated entry.
    pub async fn reauth(
        &self,
        entry: &EntryConfig,
        auth_code: String,
        tracking_code: String,
    ) -> Result<EntryConfig, FlowError> {
        let mut updated = entry.clone();
        updated.credentials.auth_code = auth_code;
        updated.credentials.tracking_code = Some(tracking_code);
        self.validate(&updated.credentials).await?;
        Ok(updated)
    }

    async fn validate(&self, credentials: &Credentials) -> Result<(), FlowError> {
        let client = ApiClient::new(self.http.clone(), self.endpoints.clone(), credentials);
        client.validate_credentials().await?;
        Ok(())
    }
}

fn abort_if_configured(existing: &Config, imei: &str) -> Result<(), FlowError> {
    if existing.entry(imei).is_some() {
        return Err(FlowError::AlreadyConfigured(imei.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use mockito::Matcher;

    use super::*;
    use crate::{api::build_client, auth::DeviceMetadata};

    const DATA_PATH: &str = "/custom/dashboardConfig/dashboard.9/request.php";
    const OK: &str = r#"{"status":200,"Results":{}}"#;

    fn flow(server: &mockito::ServerGuard) -> ConfigFlow {
        ConfigFlow::new(build_client().unwrap(), Endpoints::new(&server.url()).unwrap())
    }

    fn login_result() -> LoginResult {
        let mut devices = BTreeMap::new();
        devices.insert(
            "111".to_string(),
            DeviceMetadata {
                nickname: Some("Van".into()),
                ..Default::default()
            },
        );
        devices.insert("222".to_string(), DeviceMetadata::default());
        LoginResult {
            account_id: "9".into(),
            auth_code: "abc".into(),
            devices,
        }
    }

    #[tokio::test]
    async fn setup_from_login_uses_nickname() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", DATA_PATH)
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("IMEI".into(), "111".into()),
                Matcher::UrlEncoded("account_id".into(), "9".into()),
            ]))
            .with_status(200)
            .with_body(OK)
            .expect(1)
            .create_async()
            .await;
        let entry = flow(&server)
            .setup_from_login(
                &Config::default(),
                &login_result(),
                "111",
                "me@example.com",
                "pw",
                None,
            )
            .await
            .unwrap();
        assert_eq!(entry.title(), "Van");
        assert_eq!(entry.credentials.login_details(), Some(("me@example.com", "pw")));
        mock.assert_async().await;

        let entry = flow(&server)
            .setup_from_login(
                &Config::default(),
                &login_result(),
                "222",
                "me@example.com",
                "pw",
                None,
            )
            .await;
        // 222 is not matched by the mock above
        assert!(matches!(entry, Err(FlowError::CannotConnect(_))), "{entry:?}");
    }

    #[tokio::test]
    async fn setup_from_login_rejects_unknown_and_duplicate() {
        let server = mockito::Server::new_async().await;
        let err = flow(&server)
            .setup_from_login(&Config::default(), &login_result(), "333", "e", "p", None)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::UnknownDevice(imei) if imei == "333"));

        let mut existing = Config::default();
        existing.upsert(EntryConfig::new(
            Credentials {
                imei: "111".into(),
                account_id: None,
                auth_code: "x".into(),
                tracking_code: None,
                email: None,
                password: None,
            },
            None,
        ));
        let err = flow(&server)
            .setup_from_login(&existing, &login_result(), "111", "e", "p", None)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::AlreadyConfigured(_)));
    }

    #[tokio::test]
    async fn manual_setup() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", DATA_PATH)
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("auth_code".into(), "good".into()),
                Matcher::UrlEncoded("tracking_code".into(), "trk".into()),
            ]))
            .with_status(200)
            .with_body(OK)
            .create_async()
            .await;
        let _m = server
            .mock("GET", DATA_PATH)
            .match_query(Matcher::UrlEncoded("auth_code".into(), "bad".into()))
            .with_status(200)
            .with_body(r#"{"status":401}"#)
            .create_async()
            .await;

        let input = ManualSetup {
            imei: " 867530912345 ".into(),
            auth_code: "good".into(),
            tracking_code: "trk".into(),
            device_name: Some("".into()),
        };
        let entry = flow(&server)
            .setup_manual(&Config::default(), input.clone())
            .await
            .unwrap();
        assert_eq!(entry.imei(), "867530912345");
        assert_eq!(entry.title(), "SolidGPS 2345");
        assert!(entry.credentials.login_details().is_none());

        let err = flow(&server)
            .setup_manual(
                &Config::default(),
                ManualSetup {
                    auth_code: "bad".into(),
                    ..input
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidAuth(_)), "{err:?}");
    }

    #[tokio::test]
    async fn reauth_validates_new_tokens() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", DATA_PATH)
            .match_query(Matcher::UrlEncoded("auth_code".into(), "new".into()))
            .with_status(200)
            .with_body(OK)
            .create_async()
            .await;
        let entry = EntryConfig::new(
            Credentials {
                imei: "1".into(),
                account_id: None,
                auth_code: "old".into(),
                tracking_code: Some("t0".into()),
                email: None,
                password: None,
            },
            Some("Car".into()),
        );
        let updated = flow(&server)
            .reauth(&entry, "new".into(), "t1".into())
            .await
            .unwrap();
        assert_eq!(updated.credentials.auth_code, "new");
        assert_eq!(updated.credentials.tracking_code.as_deref(), Some("t1"));
        assert_eq!(updated.title(), "Car");
        // the original entry is untouched
        assert_eq!(entry.credentials.auth_code, "old");
    }
}
