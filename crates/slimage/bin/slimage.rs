#[macro_use]
extern crate log;

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use slimage::{
    application::worker::{Pipeline, ResizeTransformer, WorkerPool},
    domain::services::{image::ImageService, source::SourceResolver, usage::UsageCounter},
    infrastructure::{
        config::{Config, FetcherConfig},
        domain::repositories::{build_fetcher, usage::UsageRepositoryImpl},
    },
    presentation::ServerBuilder,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Command {
    /// Fetch sources over HTTP below PREFIX
    Proxy,
    /// Read sources from the directory PREFIX
    Filesystem,
}

/// On-demand image resizing server.
#[derive(Parser)]
#[clap(version, about)]
struct Opts {
    /// Path to config file
    #[clap(long, env = "SLIMAGE_CONFIG")]
    config: Option<String>,
    /// Port to listen on
    #[clap(long, env = "SLIMAGE_PORT")]
    port: Option<u16>,
    /// Number of resize workers
    #[clap(long, env = "SLIMAGE_NUM_WORKERS")]
    num_workers: Option<usize>,
    /// Memory budget of the source cache in MB
    #[clap(long, env = "SLIMAGE_SOURCE_CACHE_MB")]
    source_cache_mb: Option<usize>,
    /// Memory budget of the resized image cache in MB
    #[clap(long, env = "SLIMAGE_OUTPUT_CACHE_MB")]
    output_cache_mb: Option<usize>,
    /// File the size usage counts are kept in
    #[clap(long, env = "SLIMAGE_COUNTER_PATH")]
    counter_path: Option<String>,
    /// Seconds between two saves of the usage counts
    #[clap(long, env = "SLIMAGE_FLUSH_INTERVAL")]
    flush_interval: Option<u64>,
    /// Largest width an image is resized to
    #[clap(long, env = "SLIMAGE_MAX_WIDTH")]
    max_width: Option<u32>,
    /// Largest height an image is resized to
    #[clap(long, env = "SLIMAGE_MAX_HEIGHT")]
    max_height: Option<u32>,
    /// Quality of the encoded JPEG, 1 to 100
    #[clap(long, env = "SLIMAGE_JPEG_QUALITY")]
    jpeg_quality: Option<u8>,
    /// Source backend, overrides the configured fetcher
    #[clap(value_enum, requires = "prefix")]
    command: Option<Command>,
    /// URL prefix or root directory of the sources
    prefix: Option<String>,
}

impl Opts {
    fn apply(self, mut config: Config) -> Config {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(num_workers) = self.num_workers {
            config.num_workers = num_workers;
        }
        if let Some(mb) = self.source_cache_mb {
            config.source_cache_mb = mb;
        }
        if let Some(mb) = self.output_cache_mb {
            config.output_cache_mb = mb;
        }
        if let Some(path) = self.counter_path {
            config.counter_path = path;
        }
        if let Some(interval) = self.flush_interval {
            config.flush_interval = interval;
        }
        if let Some(max_width) = self.max_width {
            config.max_width = max_width;
        }
        if let Some(max_height) = self.max_height {
            config.max_height = max_height;
        }
        if let Some(quality) = self.jpeg_quality {
            config.jpeg_quality = quality;
        }

        match (self.command, self.prefix) {
            (Some(Command::Proxy), Some(prefix)) => {
                config.fetcher = FetcherConfig::Proxy { prefix };
            }
            (Some(Command::Filesystem), Some(root)) => {
                config.fetcher = FetcherConfig::Filesystem { root };
            }
            _ => {}
        }

        config
    }
}

fn init_logger() {
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var("RUST_LOG").is_err() {
        if let Ok(level) = std::env::var("SLIMAGE_LOG") {
            builder.parse_filters(&format!("slimage={level},slimage_cache={level}"));
        }
    }
    builder.init();
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    init_logger();

    let mut opts: Opts = Opts::parse();
    let config = Config::open(opts.config.take())?;
    let config = opts.apply(config);
    config.create_dirs()?;

    debug!("config: {:?}", config);

    let fetcher = build_fetcher(&config.fetcher)?;
    let resolver = SourceResolver::new(fetcher, config.source_cache_bytes());

    let pipeline = Pipeline::new(config.jpeg_quality)
        .with_transformer(ResizeTransformer::new(config.max_width, config.max_height));
    let pool = Arc::new(WorkerPool::start(config.num_workers, pipeline));

    let counter = UsageCounter::open(UsageRepositoryImpl::new(&config.counter_path)).await?;
    counter.start(config.flush_interval())?;

    let image_svc = ImageService::new(
        resolver,
        pool.clone(),
        counter.clone(),
        config.output_cache_bytes(),
    );

    let server = ServerBuilder::new().with_image_svc(image_svc).build()?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("error listen for ctrl+c: {e}");
        }
        info!("ctrl+c signal");
    };

    if let Err(e) = server.serve(([0, 0, 0, 0], config.port), shutdown).await {
        error!("server error: {e}");
    }

    info!("draining worker pool...");
    pool.shutdown().await;

    info!("saving usage counts...");
    if let Err(e) = counter.close().await {
        error!("error save usage counts: {e}");
    }

    Ok(())
}
