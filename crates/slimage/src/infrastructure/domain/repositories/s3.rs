use std::time::SystemTime;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sigv4::{
    http_request::{
        sign, PercentEncodingMode, SignableBody, SignableRequest, SigningSettings,
        UriPathNormalizationMode,
    },
    sign::v4,
};
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use url::Url;

use crate::domain::repositories::fetcher::{FetchError, Fetcher};

/// Fetches sources from an S3 compatible object store.
///
/// The first path segment names the bucket and the rest is the object key,
/// so `/photos/cats/a.jpg` reads `cats/a.jpg` from bucket `photos`.
#[derive(Debug, Clone)]
pub struct S3Fetcher {
    endpoint: Url,
    region: String,
    credentials: Credentials,
    client: Client,
}

impl S3Fetcher {
    pub fn new(
        endpoint: &str,
        region: &str,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Result<Self, FetchError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| FetchError::Other(format!("invalid s3 endpoint {endpoint}: {e}")))?;
        if endpoint.host_str().is_none() {
            return Err(FetchError::Other(format!("s3 endpoint {endpoint} has no host")));
        }

        Ok(Self {
            endpoint,
            region: region.to_string(),
            credentials: Credentials::new(access_key_id, secret_access_key, None, None, "slimage"),
            client: Client::new(),
        })
    }

    pub fn object_url(&self, path: &str) -> Result<Url, FetchError> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() < 2 {
            return Err(FetchError::InvalidPath(path.to_string()));
        }

        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::InvalidPath(path.to_string()))?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }

    fn host(url: &Url) -> String {
        match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => String::new(),
        }
    }

    /// Headers that authenticate a GET of `url` at `time`.
    pub fn signed_headers(
        &self,
        url: &Url,
        time: SystemTime,
    ) -> Result<Vec<(String, String)>, FetchError> {
        let host = Self::host(url);
        let body_hash = hex::encode(Sha256::digest(b""));

        let identity = self.credentials.clone().into();
        let mut settings = SigningSettings::default();
        // object keys are signed as sent, S3 does not normalize them
        settings.percent_encoding_mode = PercentEncodingMode::Single;
        settings.uri_path_normalization_mode = UriPathNormalizationMode::Disabled;

        let params = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name("s3")
            .time(time)
            .settings(settings)
            .build()
            .map_err(|e| FetchError::Other(format!("error build signing params: {e}")))?;

        let headers = vec![
            ("host", host.as_str()),
            ("x-amz-content-sha256", body_hash.as_str()),
        ];
        let request = SignableRequest::new(
            "GET",
            url.as_str(),
            headers.into_iter(),
            SignableBody::Bytes(&[]),
        )
        .map_err(|e| FetchError::Other(format!("error create signable request: {e}")))?;

        let (instructions, _signature) = sign(request, &params.into())
            .map_err(|e| FetchError::Other(format!("error sign request: {e}")))?
            .into_parts();

        let mut signed: Vec<(String, String)> = instructions
            .headers()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        signed.push(("x-amz-content-sha256".to_string(), body_hash));

        Ok(signed)
    }
}

#[async_trait]
impl Fetcher for S3Fetcher {
    async fn fetch(&self, path: &str) -> Result<Bytes, FetchError> {
        let url = self.object_url(path)?;

        let mut req = self.client.get(url.clone());
        for (name, value) in self.signed_headers(&url, SystemTime::now())? {
            req = req.header(name, value);
        }

        let res = req.send().await?;
        match res.status() {
            StatusCode::OK => Ok(res.bytes().await?),
            StatusCode::NOT_FOUND => Err(FetchError::NotFound(path.to_string())),
            status => Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }),
        }
    }
}
