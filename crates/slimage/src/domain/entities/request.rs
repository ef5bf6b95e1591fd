use http::Uri;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::size::Size;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid locator {url:?}: {reason}")]
    InvalidLocator { url: String, reason: String },
    #[error("invalid cache key: {0}")]
    InvalidCacheKey(#[from] serde_json::Error),
}

/// Which file the caller wants transformed and served, and how.
///
/// `url` keeps the locator exactly as received, query string included.
/// A width or height of 0 means the dimension was not specified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageRequest {
    pub url: String,
    pub width: u32,
    pub height: u32,
    // parsed and carried through the cache key, not interpreted by any transform yet
    #[serde(default)]
    pub fit: String,
}

impl ImageRequest {
    /// Parses a request locator such as `/cats/a.jpg?w=100&h=50&fit=crop`.
    ///
    /// Unparsable `w` and `h` values are treated as unspecified, so the image
    /// is still served, only unsized.
    pub fn from_url(raw_url: &str) -> Result<Self, RequestError> {
        let uri: Uri = raw_url.parse().map_err(|e: http::uri::InvalidUri| {
            RequestError::InvalidLocator {
                url: raw_url.to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut width = None;
        let mut height = None;
        let mut fit = None;
        if let Some(query) = uri.query() {
            for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
                match name.as_ref() {
                    "w" if width.is_none() => width = Some(parse_dimension(&value)),
                    "h" if height.is_none() => height = Some(parse_dimension(&value)),
                    "fit" if fit.is_none() => fit = Some(value.into_owned()),
                    _ => {}
                }
            }
        }

        Ok(Self {
            url: raw_url.to_string(),
            width: width.unwrap_or(0),
            height: height.unwrap_or(0),
            fit: fit.unwrap_or_default(),
        })
    }

    /// Rebuilds a request from a key produced by [`ImageRequest::cache_key`].
    pub fn from_cache_key(cache_key: &str) -> Result<Self, RequestError> {
        Ok(serde_json::from_str(cache_key)?)
    }

    /// Encodes every field of the request; identical requests give identical keys.
    pub fn cache_key(&self) -> Result<String, RequestError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The requested output size, or `None` when either side is unspecified.
    pub fn size(&self) -> Option<Size> {
        Size::new(self.width, self.height)
    }
}

fn parse_dimension(value: &str) -> u32 {
    value.trim().parse::<u32>().unwrap_or(0)
}
