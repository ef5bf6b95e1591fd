use axum::{
    extract::{Extension, Query},
    Json,
};
use serde::{Deserialize, Serialize};
use slimage_cache::CacheStats;

use crate::presentation::ImageSvc;

const DEFAULT_TOP: usize = 20;

#[derive(Debug, Deserialize)]
pub struct Params {
    top: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SizeCount {
    pub size: String,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct Stats {
    pub sizes: Vec<SizeCount>,
    pub source_cache: CacheStats,
    pub resize_cache: CacheStats,
}

pub async fn stats(
    Query(params): Query<Params>,
    Extension(svc): Extension<ImageSvc>,
) -> Json<Stats> {
    let sizes = svc
        .counter()
        .top_sizes(params.top.unwrap_or(DEFAULT_TOP))
        .into_iter()
        .map(|(size, count)| SizeCount {
            size: size.key(),
            count,
        })
        .collect();

    Json(Stats {
        sizes,
        source_cache: svc.source_stats(),
        resize_cache: svc.resize_stats(),
    })
}
