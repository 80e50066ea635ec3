//! Authenticated location directory.
//!
//! The directory sits behind a form login. Sessions are kept in the client's
//! cookie store and re-established once when a data page bounces back to the
//! login form.

mod parse;

pub use parse::{find_csrf_token, is_login_page, parse_listings, CsrfToken};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use geocrawl::grid::{resolve_regions, Cell, GridError, GridTiler};
use geocrawl::models::CrawlScope;

use crate::element::RawElement;
use crate::error::FetchError;
use crate::http::HttpClient;
use crate::overpass::TagFilter;
use crate::source::CellSource;

const LOGIN_PATH: &str = "login";
const LOCATIONS_PATH: &str = "locations";

/// Login for the directory.
#[derive(Debug, Clone, Default)]
pub struct DirectoryCredentials {
    pub username: String,
    pub password: String,
}

pub struct DirectorySource {
    http: HttpClient,
    base_url: Url,
    credentials: DirectoryCredentials,
    logged_in: Mutex<bool>,
}

impl DirectorySource {
    /// `http` must keep cookies.
    pub fn new(
        http: HttpClient,
        base_url: &str,
        credentials: DirectoryCredentials,
    ) -> Result<Self, FetchError> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| FetchError::Parse(format!("invalid directory URL {}: {}", base_url, e)))?;
        Ok(Self {
            http,
            base_url,
            credentials,
            logged_in: Mutex::new(false),
        })
    }

    fn url(&self, path: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(path)
            .map_err(|e| FetchError::Parse(format!("invalid directory path {}: {}", path, e)))
    }

    /// Read the login form's token and post the credentials.
    pub async fn login(&self) -> Result<(), FetchError> {
        if self.credentials.username.is_empty() || self.credentials.password.is_empty() {
            return Err(FetchError::Auth("no directory credentials configured".into()));
        }

        let login_url = self.url(LOGIN_PATH)?;
        let page = self.http.get_text(login_url.as_str()).await?;
        let token = find_csrf_token(&page)?
            .ok_or_else(|| FetchError::Auth("login form has no CSRF token".into()))?;

        let form = [
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
            (token.field.as_str(), token.value.as_str()),
        ];
        let body = match self.http.post_form(login_url.as_str(), &form).await {
            Ok(body) => body,
            Err(FetchError::Status { status, .. }) if status == 401 || status == 403 => {
                return Err(FetchError::Auth(format!("login rejected (HTTP {})", status)));
            }
            Err(e) => return Err(e),
        };
        if is_login_page(&body)? {
            return Err(FetchError::Auth("login rejected".into()));
        }

        info!("Logged in to directory as {}", self.credentials.username);
        Ok(())
    }

    async fn ensure_login(&self, force: bool) -> Result<(), FetchError> {
        let mut logged_in = self.logged_in.lock().await;
        if force || !*logged_in {
            *logged_in = false;
            self.login().await?;
            *logged_in = true;
        }
        Ok(())
    }

    /// Listings of one state.
    pub async fn fetch_state(&self, code: &str) -> Result<Vec<RawElement>, FetchError> {
        let mut url = self.url(LOCATIONS_PATH)?;
        url.query_pairs_mut().append_pair("state", code);

        self.ensure_login(false).await?;
        let mut page = self.http.get_text(url.as_str()).await?;
        if is_login_page(&page)? {
            debug!("Directory session expired, logging in again");
            self.ensure_login(true).await?;
            page = self.http.get_text(url.as_str()).await?;
            if is_login_page(&page)? {
                return Err(FetchError::Auth("session not accepted".into()));
            }
        }
        parse_listings(&page)
    }
}

#[async_trait]
impl CellSource for DirectorySource {
    /// One cell per state; the directory is paged by state, not by area.
    fn plan(&self, _tiler: &GridTiler, scope: &CrawlScope) -> Result<Vec<Cell>, GridError> {
        Ok(resolve_regions(&scope.states)?
            .into_iter()
            .enumerate()
            .map(|(index, region)| Cell {
                index,
                region: region.code.to_string(),
                center: region.bounds.center(),
                bounds: region.bounds,
            })
            .collect())
    }

    async fn fetch_cell(
        &self,
        cell: &Cell,
        _filters: &[TagFilter],
    ) -> Result<Vec<RawElement>, FetchError> {
        self.fetch_state(&cell.region).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> DirectorySource {
        let http = HttpClient::builder().cookie_store(true).build().unwrap();
        DirectorySource::new(
            http,
            "https://directory.example.com/app",
            DirectoryCredentials::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_urls_are_relative_to_base() {
        let source = source();
        assert_eq!(
            source.url(LOGIN_PATH).unwrap().as_str(),
            "https://directory.example.com/app/login"
        );
    }

    #[test]
    fn test_one_cell_per_state() {
        let source = source();
        let tiler = GridTiler::default();
        let scope = CrawlScope::new(vec![], vec!["ne".into(), "IA".into()]);
        let cells = source.plan(&tiler, &scope).unwrap();
        let regions: Vec<&str> = cells.iter().map(|c| c.region.as_str()).collect();
        assert_eq!(regions, vec!["IA", "NE"]);
        assert_eq!(cells[1].index, 1);
        assert_eq!(source.plan(&tiler, &CrawlScope::default()).unwrap().len(), 51);
    }

    #[tokio::test]
    async fn test_login_requires_credentials() {
        assert!(matches!(source().login().await, Err(FetchError::Auth(_))));
    }
}
