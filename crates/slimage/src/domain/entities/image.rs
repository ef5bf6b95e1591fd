use bytes::Bytes;

/// Content type of every image the service produces.
pub const CONTENT_TYPE_JPEG: &str = "image/jpeg";

#[derive(Debug, Clone)]
pub struct Image {
    pub content_type: String,
    pub data: Bytes,
}

impl Image {
    pub fn jpeg(data: Bytes) -> Self {
        Self {
            content_type: CONTENT_TYPE_JPEG.to_string(),
            data,
        }
    }
}
