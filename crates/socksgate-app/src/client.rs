//! HTTP client for a running daemon.

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use socksgate_proxy::{ProxyStatus, RawConfig};
use socksgate_server::{CheckResponse, ErrorResponse, ToggleRequest};
use thiserror::Error;
use url::Url;

/// Errors talking to the daemon.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Could not reach SocksGate at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The daemon answered with an error body.
    #[error("{message} ({code}, HTTP {status})")]
    Api {
        status: StatusCode,
        code: String,
        message: String,
    },
}

/// Result type for client calls.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client for the daemon's HTTP API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base: Url,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)?;
        let client = reqwest::Client::builder()
            .user_agent(format!("SocksGate/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { base, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// GET /api/state
    pub async fn state(&self) -> Result<ProxyStatus> {
        let url = self.endpoint("/api/state")?;
        let response = self.send(self.client.get(url.clone()), &url).await?;
        decode(response).await
    }

    /// POST /api/toggle
    pub async fn toggle(&self, enabled: bool) -> Result<ProxyStatus> {
        let url = self.endpoint("/api/toggle")?;
        let request = self.client.post(url.clone()).json(&ToggleRequest { enabled });
        let response = self.send(request, &url).await?;
        decode(response).await
    }

    /// PUT /api/config
    pub async fn update_config(&self, config: &RawConfig) -> Result<ProxyStatus> {
        let url = self.endpoint("/api/config")?;
        let request = self.client.put(url.clone()).json(config);
        let response = self.send(request, &url).await?;
        decode(response).await
    }

    /// GET /api/check?url=
    pub async fn check(&self, target: &str) -> Result<CheckResponse> {
        let url = self.check_url(target)?;
        let response = self.send(self.client.get(url.clone()), &url).await?;
        decode(response).await
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    fn check_url(&self, target: &str) -> Result<Url> {
        let mut url = self.endpoint("/api/check")?;
        url.query_pairs_mut().append_pair("url", target);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &Url) -> Result<Response> {
        request.send().await.map_err(|source| {
            if source.is_connect() || source.is_timeout() {
                ClientError::Unreachable {
                    url: url.to_string(),
                    source,
                }
            } else {
                ClientError::Http(source)
            }
        })
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(error) => ClientError::Api {
            status,
            code: error.code,
            message: error.error,
        },
        Err(_) => ClientError::Api {
            status,
            code: "unknown".to_string(),
            message: body,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_join_the_base() {
        let client = ApiClient::new("http://127.0.0.1:48766").unwrap();
        assert_eq!(
            client.endpoint("/api/state").unwrap().as_str(),
            "http://127.0.0.1:48766/api/state"
        );
    }

    #[test]
    fn check_url_is_encoded() {
        let client = ApiClient::new("http://127.0.0.1:48766/").unwrap();
        let url = client.check_url("https://a.example.com/x?y=1").unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:48766/api/check?url=https%3A%2F%2Fa.example.com%2Fx%3Fy%3D1"
        );
    }

    #[test]
    fn invalid_base_url() {
        assert!(matches!(
            ApiClient::new("not a url"),
            Err(ClientError::InvalidUrl(_))
        ));
    }
}
