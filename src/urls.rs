use url::Url;

use crate::Error;

pub const DEFAULT_BASE_URL: &str = "https://www.solidgps.com/";

const DATA_PATH: &str = "custom/dashboardConfig/dashboard.9/request.php";
const LOGIN_PAGE_PATH: &str = "login/";
const LOGIN_AJAX_PATH: &str = "wp-admin/admin-ajax.php";
const DASHBOARD_PATH: &str = "dashboard/";

/// The vendor URLs, all rooted at one base so a mock server can stand in
/// for the real site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: Url,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            base: Url::parse(DEFAULT_BASE_URL).expect("default base url is valid"),
        }
    }
}

impl Endpoints {
    pub fn new(base: &str) -> Result<Self, Error> {
        let mut base = Url::parse(base).map_err(|e| Error::Url(e.to_string()))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base })
    }

    /// The value sent as `Referer` on data requests.
    pub fn referer(&self) -> String {
        self.base.to_string()
    }

    pub fn data_url(&self) -> Url {
        self.join(DATA_PATH)
    }

    pub fn login_page_url(&self) -> Url {
        self.join(LOGIN_PAGE_PATH)
    }

    pub fn login_ajax_url(&self) -> Url {
        self.join(LOGIN_AJAX_PATH)
    }

    pub fn dashboard_url(&self) -> Url {
        self.join(DASHBOARD_PATH)
    }

    fn join(&self, path: &str) -> Url {
        // all paths are static relative references
        self.base.join(path).unwrap_or_else(|_| self.base.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_urls() {
        let urls = Endpoints::default();
        assert_eq!(
            urls.data_url().as_str(),
            "https://www.solidgps.com/custom/dashboardConfig/dashboard.9/request.php"
        );
        assert_eq!(urls.login_page_url().as_str(), "https://www.solidgps.com/login/");
        assert_eq!(
            urls.login_ajax_url().as_str(),
            "https://www.solidgps.com/wp-admin/admin-ajax.php"
        );
        assert_eq!(urls.dashboard_url().as_str(), "https://www.solidgps.com/dashboard/");
        assert_eq!(urls.referer(), "https://www.solidgps.com/");
    }

    #[test]
    fn base_without_trailing_slash() {
        let urls = Endpoints::new("http://127.0.0.1:1234").unwrap();
        assert_eq!(urls.dashboard_url().as_str(), "http://127.0.0.1:1234/dashboard/");
        let urls = Endpoints::new("http://127.0.0.1:1234/proxy").unwrap();
        assert_eq!(urls.login_page_url().as_str(), "http://127.0.0.1:1234/proxy/login/");
    }
}
