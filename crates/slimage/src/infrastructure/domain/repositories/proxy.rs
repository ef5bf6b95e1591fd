use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use url::Url;

use crate::domain::repositories::fetcher::{FetchError, Fetcher};

/// Fetches sources over HTTP from below a URL prefix.
#[derive(Debug, Clone)]
pub struct ProxyFetcher {
    prefix: Url,
    client: Client,
}

impl ProxyFetcher {
    pub fn new(prefix: &str) -> Result<Self, FetchError> {
        Self::with_client(prefix, Client::new())
    }

    pub fn with_client(prefix: &str, client: Client) -> Result<Self, FetchError> {
        let prefix = Url::parse(prefix)
            .map_err(|e| FetchError::Other(format!("invalid proxy prefix {prefix}: {e}")))?;
        if prefix.cannot_be_a_base() {
            return Err(FetchError::Other(format!(
                "proxy prefix {prefix} cannot be a base url"
            )));
        }

        Ok(Self { prefix, client })
    }

    pub fn source_url(&self, path: &str) -> Result<Url, FetchError> {
        let mut url = self.prefix.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::InvalidPath(path.to_string()))?
            .pop_if_empty()
            .extend(path.split('/').filter(|segment| !segment.is_empty()));

        Ok(url)
    }
}

#[async_trait]
impl Fetcher for ProxyFetcher {
    async fn fetch(&self, path: &str) -> Result<Bytes, FetchError> {
        let url = self.source_url(path)?;

        let res = self.client.get(url.clone()).send().await?;
        if res.status() != StatusCode::OK {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: res.status().as_u16(),
            });
        }

        Ok(res.bytes().await?)
    }
}
