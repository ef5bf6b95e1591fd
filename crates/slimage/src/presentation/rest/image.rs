use axum::{
    body::Body,
    extract::Extension,
    http::{header, Response, StatusCode, Uri},
    response::IntoResponse,
};

use crate::presentation::ImageSvc;

pub async fn fetch_image(
    uri: Uri,
    Extension(svc): Extension<ImageSvc>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let raw_url = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    let image = svc.fetch_image(raw_url).await.map_err(|e| {
        let status = if e.is_unavailable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::NOT_FOUND
        };
        debug!("{raw_url}: {status}: {e}");
        (status, e.to_string())
    })?;

    Response::builder()
        .header(header::CONTENT_TYPE, image.content_type)
        .header(header::CONTENT_LENGTH, image.data.len())
        .body(Body::from(image.data))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Any path no image can live at, such as `/`.
pub async fn not_found(uri: Uri) -> (StatusCode, String) {
    debug!("{uri}: no route");
    (StatusCode::NOT_FOUND, format!("not found: {}", uri.path()))
}
