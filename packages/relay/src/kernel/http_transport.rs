//! reqwest-backed transport with a resettable cookie jar.

use async_trait::async_trait;
use reqwest::cookie::Jar;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error};

use super::{BaseTransport, HttpResponse};
use crate::error::TransportError;

/// The target rejects requests that do not look like they come from a browser.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/87.0.4280.88 Safari/537.36";

/// Upper bound for the landing page GET.
const LANDING_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ReqwestTransport {
    client: RwLock<reqwest::Client>,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        Ok(Self {
            client: RwLock::new(Self::build_client()?),
        })
    }

    /// Each client gets its own jar, so replacing the client is how cookies are cleared.
    fn build_client() -> Result<reqwest::Client, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .cookie_provider(Arc::new(Jar::default()))
            .timeout(LANDING_TIMEOUT)
            .build()?;
        Ok(client)
    }

    fn client(&self) -> reqwest::Client {
        self.client
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl BaseTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        debug!(url = %url, "GET");
        let response = self.client().get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse::new(status, body))
    }

    async fn post_form(
        &self,
        url: &str,
        headers: &[(&str, String)],
        form: &[(&str, String)],
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let mut request = self.client().post(url).timeout(timeout).form(form);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse::new(status, body))
    }

    fn clear_cookies(&self) {
        match Self::build_client() {
            Ok(fresh) => {
                *self
                    .client
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = fresh;
                debug!("Cookie jar reset");
            }
            Err(e) => error!(error = %e, "Failed to rebuild HTTP client, keeping old cookies"),
        }
    }
}
