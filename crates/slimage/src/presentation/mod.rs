pub mod rest;

use std::{future::Future, net::SocketAddr};

use anyhow::anyhow;
use axum::{extract::Extension, http::Method, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};

use self::rest::{
    health::health_check,
    image::{fetch_image, not_found},
    stats::stats,
};
use crate::{
    domain::services::image::ImageService,
    infrastructure::domain::repositories::usage::UsageRepositoryImpl,
};

pub type ImageSvc = ImageService<UsageRepositoryImpl>;

#[derive(Default)]
pub struct ServerBuilder {
    image_svc: Option<ImageSvc>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image_svc(self, image_svc: ImageSvc) -> Self {
        Self {
            image_svc: Some(image_svc),
        }
    }

    pub fn build(self) -> Result<Server, anyhow::Error> {
        let image_svc = self.image_svc.ok_or_else(|| anyhow!("no image service"))?;

        Ok(Server::new(image_svc))
    }
}

pub struct Server {
    router: Router,
}

impl Server {
    pub fn new(image_svc: ImageSvc) -> Self {
        let router = Router::new()
            .route("/-/health", get(health_check))
            .route("/-/stats", get(stats))
            .route("/{*path}", get(fetch_image))
            .fallback(not_found)
            .layer(Extension(image_svc))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::GET])
                    .allow_headers(Any),
            );

        Self { router }
    }

    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serves until `shutdown` completes, then lets in-flight requests finish.
    pub async fn serve<A, F>(self, addr: A, shutdown: F) -> Result<(), anyhow::Error>
    where
        A: Into<SocketAddr>,
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(addr.into()).await?;
        info!("listening on {}", listener.local_addr()?);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("server shutdown");
        Ok(())
    }
}
