use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use slimage_cache::MEGABYTE;

/// Where source images are read from.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FetcherConfig {
    Filesystem {
        root: String,
    },
    Proxy {
        prefix: String,
    },
    S3 {
        endpoint: String,
        #[serde(default = "default_region")]
        region: String,
        access_key_id: String,
        secret_access_key: String,
    },
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    #[serde(skip)]
    path: PathBuf,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    #[serde(default = "default_source_cache_mb")]
    pub source_cache_mb: usize,
    #[serde(default = "default_output_cache_mb")]
    pub output_cache_mb: usize,
    #[serde(default = "default_counter_path")]
    pub counter_path: String,
    /// Seconds between two saves of the usage counts.
    #[serde(default = "default_flush_interval")]
    pub flush_interval: u64,
    #[serde(default = "default_max_dimension")]
    pub max_width: u32,
    #[serde(default = "default_max_dimension")]
    pub max_height: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_fetcher")]
    pub fetcher: FetcherConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: slimage_home().join("config.yml"),
            port: default_port(),
            num_workers: default_num_workers(),
            source_cache_mb: default_source_cache_mb(),
            output_cache_mb: default_output_cache_mb(),
            counter_path: default_counter_path(),
            flush_interval: default_flush_interval(),
            max_width: default_max_dimension(),
            max_height: default_max_dimension(),
            jpeg_quality: default_jpeg_quality(),
            fetcher: default_fetcher(),
        }
    }
}

fn slimage_home() -> PathBuf {
    match std::env::var("SLIMAGE_HOME") {
        Ok(path) => PathBuf::from(path),
        Err(_) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".slimage"),
    }
}

fn default_port() -> u16 {
    4400
}

fn default_num_workers() -> usize {
    4
}

fn default_source_cache_mb() -> usize {
    128
}

fn default_output_cache_mb() -> usize {
    512
}

fn default_counter_path() -> String {
    slimage_home().join("sizes.json").display().to_string()
}

fn default_flush_interval() -> u64 {
    1
}

fn default_max_dimension() -> u32 {
    2048
}

fn default_jpeg_quality() -> u8 {
    75
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_fetcher() -> FetcherConfig {
    FetcherConfig::Filesystem {
        root: slimage_home().join("images").display().to_string(),
    }
}

impl Config {
    pub fn open<P: AsRef<Path>>(path: Option<P>) -> Result<Config, anyhow::Error> {
        let config_path = match path {
            Some(p) => PathBuf::new().join(p),
            None => slimage_home().join("config.yml"),
        };

        match std::fs::File::open(&config_path) {
            Ok(file) => {
                info!("Open config from {:?}", config_path);
                let mut cfg: Self = serde_yml::from_reader(file)?;
                cfg.path = config_path;
                Ok(cfg)
            }
            Err(_) => {
                let cfg = Config {
                    path: config_path,
                    ..Default::default()
                };
                cfg.save()?;
                info!("Write default config at {:?}", cfg.path);
                Ok(cfg)
            }
        }
    }

    pub fn save(&self) -> Result<(), anyhow::Error> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_yml::to_string(&self)?)?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the directory of the usage file and the filesystem source
    /// root when they are missing.
    pub fn create_dirs(&self) -> Result<(), anyhow::Error> {
        if let Some(parent) = Path::new(&self.counter_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        if let FetcherConfig::Filesystem { root } = &self.fetcher {
            std::fs::create_dir_all(root)?;
        }

        Ok(())
    }

    pub fn source_cache_bytes(&self) -> usize {
        self.source_cache_mb.saturating_mul(MEGABYTE)
    }

    pub fn output_cache_bytes(&self) -> usize {
        self.output_cache_mb.saturating_mul(MEGABYTE)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval.max(1))
    }
}
