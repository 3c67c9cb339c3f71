use std::{io::Cursor, time::Duration};

use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
    Engine,
};
use bytes::{Bytes, BytesMut};
use image::{imageops::FilterType, DynamicImage, ImageFormat, ImageReader};
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::{
    error::{MediaConnectorError, MultiModalResult},
    resize::smart_resize,
    types::{ImageFrame, ImageSize, ImageSource},
};

/// Where the bytes of an image come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// `data:image/...;base64,...`
    DataUrl(String),
    /// `http(s)://...`
    Url(String),
}

impl MediaSource {
    /// Classifies an `image_url.url` value as inline data or a remote reference.
    pub fn from_url(url: &str) -> Self {
        if url.trim_start().get(..5).is_some_and(|p| p.eq_ignore_ascii_case("data:")) {
            MediaSource::DataUrl(url.to_string())
        } else {
            MediaSource::Url(url.to_string())
        }
    }
}

/// Size ceilings and normalization window applied to every image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageLimits {
    /// Largest accepted encoded payload, in bytes.
    pub max_bytes: u64,
    /// Largest accepted decoded source image, in pixels. Checked from the
    /// header before the full decode.
    pub max_source_pixels: u64,
    pub min_pixels: u64,
    pub max_pixels: u64,
    /// Both output sides are multiples of this.
    pub factor: u32,
    pub max_aspect_ratio: f64,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            max_bytes: 20 * 1024 * 1024,
            max_source_pixels: 32 * 1024 * 1024,
            min_pixels: 4 * 28 * 28,
            max_pixels: 16384 * 28 * 28,
            factor: 28,
            max_aspect_ratio: 200.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaConnectorConfig {
    /// When set, remote images may only come from these hosts (or their
    /// subdomains).
    pub allowed_domains: Option<Vec<String>>,
    /// Upper bound on one remote fetch, body included.
    pub fetch_timeout: Duration,
    pub limits: ImageLimits,
}

impl Default for MediaConnectorConfig {
    fn default() -> Self {
        Self {
            allowed_domains: None,
            fetch_timeout: Duration::from_secs(10),
            limits: ImageLimits::default(),
        }
    }
}

/// Fetches, validates and normalizes images.
#[derive(Debug, Clone)]
pub struct MediaConnector {
    client: Client,
    allowed_domains: Option<Vec<String>>,
    fetch_timeout: Duration,
    limits: ImageLimits,
}

impl MediaConnector {
    pub fn new(client: Client, config: MediaConnectorConfig) -> MultiModalResult<Self> {
        if config.fetch_timeout.is_zero() {
            return Err(MediaConnectorError::Fetch(
                "fetch timeout must be greater than zero".to_string(),
            ));
        }
        let allowed_domains = config.allowed_domains.map(|domains| {
            domains
                .into_iter()
                .map(|d| d.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect()
        });
        Ok(Self {
            client,
            allowed_domains,
            fetch_timeout: config.fetch_timeout,
            limits: config.limits,
        })
    }

    pub fn limits(&self) -> &ImageLimits {
        &self.limits
    }

    pub async fn fetch_image(&self, source: MediaSource) -> MultiModalResult<ImageFrame> {
        let (bytes, image_source) = match source {
            MediaSource::DataUrl(data_url) => {
                let (mime_type, bytes) = self.decode_data_url(&data_url)?;
                (bytes, ImageSource::DataUrl { mime_type })
            }
            MediaSource::Url(url) => {
                let bytes = self.fetch_remote(&url).await?;
                (bytes, ImageSource::Url { url })
            }
        };

        let limits = self.limits.clone();
        tokio::task::spawn_blocking(move || normalize_image(bytes, image_source, &limits))
            .await
            .map_err(|e| MediaConnectorError::Task(e.to_string()))?
    }

    fn decode_data_url(&self, data_url: &str) -> MultiModalResult<(Option<String>, Bytes)> {
        let rest = data_url
            .trim()
            .get(5..)
            .ok_or_else(|| MediaConnectorError::InvalidDataUrl("missing payload".to_string()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| MediaConnectorError::InvalidDataUrl("missing ',' separator".to_string()))?;

        let mut params = header.split(';');
        let mime_type = params
            .next()
            .filter(|m| !m.is_empty())
            .map(str::to_ascii_lowercase);
        if !params.any(|p| p.eq_ignore_ascii_case("base64")) {
            return Err(MediaConnectorError::InvalidDataUrl(
                "only base64 data URLs are supported".to_string(),
            ));
        }
        if let Some(mime) = &mime_type {
            if !mime.starts_with("image/") {
                return Err(MediaConnectorError::InvalidDataUrl(format!(
                    "unsupported media type '{mime}'"
                )));
            }
        }

        let payload: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        // Reject before allocating the decoded buffer.
        let estimated = (payload.len() as u64 / 4) * 3;
        if estimated > self.limits.max_bytes {
            return Err(MediaConnectorError::TooLarge {
                unit: "bytes",
                actual: estimated,
                limit: self.limits.max_bytes,
            });
        }

        let decoded = STANDARD
            .decode(payload.as_bytes())
            .or_else(|_| STANDARD_NO_PAD.decode(payload.as_bytes()))
            .map_err(|e| MediaConnectorError::InvalidDataUrl(format!("invalid base64: {e}")))?;
        self.check_byte_len(decoded.len() as u64)?;
        Ok((mime_type, Bytes::from(decoded)))
    }

    async fn fetch_remote(&self, raw_url: &str) -> MultiModalResult<Bytes> {
        let url = Url::parse(raw_url).map_err(|e| MediaConnectorError::InvalidUrl(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(MediaConnectorError::UnsupportedScheme(other.to_string())),
        }
        self.check_domain(&url)?;

        let started = std::time::Instant::now();
        let bytes = tokio::time::timeout(self.fetch_timeout, self.download(url.clone()))
            .await
            .map_err(|_| MediaConnectorError::Timeout(self.fetch_timeout))??;
        debug!(
            host = url.host_str().unwrap_or_default(),
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched remote image"
        );
        Ok(bytes)
    }

    async fn download(&self, url: Url) -> MultiModalResult<Bytes> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MediaConnectorError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaConnectorError::Fetch(format!(
                "remote server returned {status}"
            )));
        }
        if let Some(len) = response.content_length() {
            self.check_byte_len(len)?;
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| MediaConnectorError::Fetch(e.to_string()))?
        {
            body.extend_from_slice(&chunk);
            self.check_byte_len(body.len() as u64)?;
        }
        Ok(body.freeze())
    }

    fn check_domain(&self, url: &Url) -> MultiModalResult<()> {
        let Some(allowed) = &self.allowed_domains else {
            return Ok(());
        };
        let host = url
            .host_str()
            .ok_or_else(|| MediaConnectorError::InvalidUrl("URL has no host".to_string()))?
            .to_ascii_lowercase();
        let permitted = allowed
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")));
        if permitted {
            Ok(())
        } else {
            Err(MediaConnectorError::DomainNotAllowed(host))
        }
    }

    fn check_byte_len(&self, len: u64) -> MultiModalResult<()> {
        if len > self.limits.max_bytes {
            return Err(MediaConnectorError::TooLarge {
                unit: "bytes",
                actual: len,
                limit: self.limits.max_bytes,
            });
        }
        Ok(())
    }
}

/// Decodes, converts to RGB, resizes and re-encodes as PNG. CPU bound.
fn normalize_image(
    bytes: Bytes,
    source: ImageSource,
    limits: &ImageLimits,
) -> MultiModalResult<ImageFrame> {
    let (width, height) = ImageReader::new(Cursor::new(bytes.as_ref()))
        .with_guessed_format()
        .map_err(|e| MediaConnectorError::Decode(e.to_string()))?
        .into_dimensions()?;
    let original_size = ImageSize::new(width, height);
    if original_size.pixels() > limits.max_source_pixels {
        return Err(MediaConnectorError::TooLarge {
            unit: "pixels",
            actual: original_size.pixels(),
            limit: limits.max_source_pixels,
        });
    }

    let decoded = ImageReader::new(Cursor::new(bytes.as_ref()))
        .with_guessed_format()
        .map_err(|e| MediaConnectorError::Decode(e.to_string()))?
        .decode()?;
    let rgb = decoded.to_rgb8();

    let (target_h, target_w) = smart_resize(height, width, limits)?;
    let resized = if (target_w, target_h) == (width, height) {
        rgb
    } else {
        image::imageops::resize(&rgb, target_w, target_h, FilterType::CatmullRom)
    };

    let mut encoded = Vec::new();
    DynamicImage::ImageRgb8(resized).write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)?;

    Ok(ImageFrame::new(
        source,
        original_size,
        ImageSize::new(target_w, target_h),
        Bytes::from(encoded),
    ))
}
