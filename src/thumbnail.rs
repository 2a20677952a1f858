use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

pub const THUMB_SIZE: u32 = 150;
pub const THUMB_QUALITY: u8 = 80;

/// A generated preview, as handed to the matcher and the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub path: PathBuf,
    /// File name inside the thumbnail directory.
    pub name: String,
    pub original_name: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("cannot decode image: {0}")]
    Decode(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot encode thumbnail: {0}")]
    Encode(String),
    #[error("bitmap input is not accepted")]
    Bitmap,
}

impl ThumbnailError {
    /// Numeric code reported to clients.
    pub fn code(&self) -> i32 {
        match self {
            ThumbnailError::Decode(_) => 1,
            ThumbnailError::Io(_) => 2,
            ThumbnailError::Encode(_) => 3,
            ThumbnailError::Bitmap => 64,
        }
    }
}

#[async_trait::async_trait]
pub trait Thumbnailer: Send + Sync {
    async fn make_thumb(&self, source: &Path, original_name: &str) -> Result<Thumbnail, ThumbnailError>;
}

/// Writes JPEG thumbnails named after the SHA-256 of the source, so the
/// same upload maps to the same preview file.
pub struct ImageThumbnailer {
    dir: PathBuf,
    size: u32,
    quality: u8,
}

impl ImageThumbnailer {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir, size: THUMB_SIZE, quality: THUMB_QUALITY }
    }

    pub fn with_size(mut self, size: u32, quality: u8) -> Self {
        self.size = size.max(8);
        self.quality = quality.clamp(10, 100);
        self
    }
}

#[async_trait::async_trait]
impl Thumbnailer for ImageThumbnailer {
    async fn make_thumb(&self, source: &Path, original_name: &str) -> Result<Thumbnail, ThumbnailError> {
        let bytes = fs::read(source).await?;
        let name = format!("{}.jpg", hex::encode(Sha256::digest(&bytes)));

        let (size, quality) = (self.size, self.quality);
        let (encoded, width, height) = tokio::task::spawn_blocking(move || render_thumbnail(&bytes, size, quality))
            .await
            .map_err(|e| ThumbnailError::Encode(e.to_string()))??;

        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).await?;
        }
        let path = self.dir.join(&name);
        fs::write(&path, &encoded).await?;
        tracing::debug!("Thumbnail {} ({}x{}) for {}", name, width, height, original_name);

        Ok(Thumbnail { path, name, original_name: original_name.to_string(), width, height })
    }
}

/// Decode, shrink into a `size` box and encode as JPEG.
pub fn render_thumbnail(bytes: &[u8], size: u32, quality: u8) -> Result<(Vec<u8>, u32, u32), ThumbnailError> {
    if bytes.starts_with(b"BM") {
        return Err(ThumbnailError::Bitmap);
    }
    let img = decode_image(bytes)?;
    let thumb = fit_within(img, size);
    let (w, h) = thumb.dimensions();
    let encoded = encode_jpeg(&thumb, quality)?;
    Ok((encoded, w, h))
}

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ThumbnailError> {
    let guessed = image::guess_format(bytes).map_err(|e| ThumbnailError::Decode(e.to_string()))?;
    image::load_from_memory_with_format(bytes, guessed).map_err(|e| ThumbnailError::Decode(e.to_string()))
}

/// Scale so the longer side equals `size`, keeping the aspect ratio.
/// Images already inside the box are returned unchanged.
pub fn fit_within(img: DynamicImage, size: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w <= size && h <= size {
        return img;
    }
    let (tw, th) = if w > h {
        (size, (u64::from(h) * u64::from(size) / u64::from(w)) as u32)
    } else {
        ((u64::from(w) * u64::from(size) / u64::from(h)) as u32, size)
    };
    img.resize_exact(tw.max(1), th.max(1), image::imageops::FilterType::Lanczos3)
}

/// Encode as baseline JPEG; transparent pixels are flattened onto white.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ThumbnailError> {
    let rgb = if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        let (w, h) = rgba.dimensions();
        let mut flat = image::RgbImage::new(w, h);
        for (x, y, px) in rgba.enumerate_pixels() {
            let a = u32::from(px[3]);
            let blend = |c: u8| ((u32::from(c) * a + 255 * (255 - a)) / 255) as u8;
            flat.put_pixel(x, y, image::Rgb([blend(px[0]), blend(px[1]), blend(px[2])]));
        }
        flat
    } else {
        img.to_rgb8()
    };

    let mut out = Vec::new();
    let (w, h) = rgb.dimensions();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
        .map_err(|e| ThumbnailError::Encode(e.to_string()))?;
    Ok(out)
}
