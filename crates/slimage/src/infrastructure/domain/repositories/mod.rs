pub mod filesystem;
pub mod proxy;
pub mod s3;
pub mod usage;

use std::sync::Arc;

use crate::{domain::repositories::fetcher::Fetcher, infrastructure::config::FetcherConfig};

use self::{filesystem::FilesystemFetcher, proxy::ProxyFetcher, s3::S3Fetcher};

/// Builds the fetch strategy selected in the configuration.
pub fn build_fetcher(config: &FetcherConfig) -> Result<Arc<dyn Fetcher>, anyhow::Error> {
    let fetcher: Arc<dyn Fetcher> = match config {
        FetcherConfig::Filesystem { root } => {
            info!("serving sources from directory {root}");
            Arc::new(FilesystemFetcher::new(root))
        }
        FetcherConfig::Proxy { prefix } => {
            info!("proxying sources from {prefix}");
            Arc::new(ProxyFetcher::new(prefix)?)
        }
        FetcherConfig::S3 {
            endpoint,
            region,
            access_key_id,
            secret_access_key,
        } => {
            info!("serving sources from object store {endpoint} ({region})");
            Arc::new(S3Fetcher::new(
                endpoint,
                region,
                access_key_id,
                secret_access_key,
            )?)
        }
    };

    Ok(fetcher)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_build_fetcher() {
        let configs = [
            FetcherConfig::Filesystem {
                root: "/srv/images".to_string(),
            },
            FetcherConfig::Proxy {
                prefix: "http://origin.example.com/images".to_string(),
            },
            FetcherConfig::S3 {
                endpoint: "http://127.0.0.1:9000".to_string(),
                region: "us-east-1".to_string(),
                access_key_id: "key".to_string(),
                secret_access_key: "secret".to_string(),
            },
        ];

        for config in &configs {
            assert!(build_fetcher(config).is_ok(), "{config:?}");
        }
    }

    #[test]
    fn test_build_fetcher_with_bad_prefix() {
        let config = FetcherConfig::Proxy {
            prefix: "origin.example.com".to_string(),
        };

        assert!(build_fetcher(&config).is_err());
    }
}
