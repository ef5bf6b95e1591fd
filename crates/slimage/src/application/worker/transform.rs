use bytes::Bytes;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, GenericImageView};
use thiserror::Error;

use super::pool::WorkerError;
use crate::domain::entities::request::ImageRequest;

pub const DEFAULT_JPEG_QUALITY: u8 = 75;
pub const DEFAULT_MAX_DIMENSION: u32 = 2048;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("other error: {0}")]
    Other(String),
}

/// One step applied to a decoded image before it is encoded.
pub trait Transformer: Send + Sync {
    fn transform(
        &self,
        req: &ImageRequest,
        image: DynamicImage,
    ) -> Result<DynamicImage, TransformError>;
}

/// Resizes to the requested dimensions with Lanczos3 resampling.
///
/// A request without width and height leaves the image untouched. When only
/// one side is given the other follows the source aspect ratio, and both
/// shrink together if the derived side would exceed its maximum. Requested
/// sides are clamped to the configured maxima. The fit mode is not consulted.
#[derive(Debug, Clone, Copy)]
pub struct ResizeTransformer {
    max_width: u32,
    max_height: u32,
}

impl Default for ResizeTransformer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIMENSION, DEFAULT_MAX_DIMENSION)
    }
}

impl ResizeTransformer {
    pub fn new(max_width: u32, max_height: u32) -> Self {
        Self {
            max_width,
            max_height,
        }
    }

    fn target_dimensions(&self, req: &ImageRequest, src: (u32, u32)) -> Option<(u32, u32)> {
        let (src_width, src_height) = src;
        let width = req.width.min(self.max_width);
        let height = req.height.min(self.max_height);

        match (width, height) {
            (0, 0) => None,
            (width, 0) => {
                let height = scale(src_height, width, src_width);
                if height > self.max_height {
                    let width = scale(src_width, self.max_height, src_height).min(self.max_width);
                    Some((width, self.max_height))
                } else {
                    Some((width, height))
                }
            }
            (0, height) => {
                let width = scale(src_width, height, src_height);
                if width > self.max_width {
                    let height = scale(src_height, self.max_width, src_width).min(self.max_height);
                    Some((self.max_width, height))
                } else {
                    Some((width, height))
                }
            }
            (width, height) => Some((width, height)),
        }
    }
}

// side * num / den, rounded, never below 1
fn scale(side: u32, num: u32, den: u32) -> u32 {
    if den == 0 {
        return 1;
    }
    let scaled = (u64::from(side) * u64::from(num) + u64::from(den) / 2) / u64::from(den);
    scaled.clamp(1, u64::from(u32::MAX)) as u32
}

impl Transformer for ResizeTransformer {
    fn transform(
        &self,
        req: &ImageRequest,
        image: DynamicImage,
    ) -> Result<DynamicImage, TransformError> {
        let Some((width, height)) = self.target_dimensions(req, image.dimensions()) else {
            return Ok(image);
        };

        if width == 0 || height == 0 {
            return Err(TransformError::InvalidDimensions { width, height });
        }

        if image.dimensions() == (width, height) {
            return Ok(image);
        }

        Ok(image.resize_exact(width, height, FilterType::Lanczos3))
    }
}

/// Decode, every transformer in order, then JPEG encode.
pub struct Pipeline {
    transformers: Vec<Box<dyn Transformer>>,
    quality: u8,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY).with_transformer(ResizeTransformer::default())
    }
}

impl Pipeline {
    /// An empty pipeline that only re-encodes.
    pub fn new(quality: u8) -> Self {
        Self {
            transformers: vec![],
            quality: quality.clamp(1, 100),
        }
    }

    pub fn with_transformer<T: Transformer + 'static>(mut self, transformer: T) -> Self {
        self.transformers.push(Box::new(transformer));
        self
    }

    /// CPU bound, run it off the async executor.
    pub fn run(&self, req: &ImageRequest, source: &[u8]) -> Result<Bytes, WorkerError> {
        let mut image = image::load_from_memory(source).map_err(WorkerError::Decode)?;

        for transformer in &self.transformers {
            image = transformer.transform(req, image)?;
        }

        let rgb = image.to_rgb8();
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, self.quality)
            .encode_image(&rgb)
            .map_err(WorkerError::Encode)?;

        Ok(Bytes::from(buf))
    }
}
