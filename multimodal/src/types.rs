use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Where a frame came from, for logging. Data URIs are never echoed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    DataUrl { mime_type: Option<String> },
    Url { url: String },
}

/// A decoded image, normalized for the vision encoder.
///
/// The pixels are RGB, resized so both sides are multiples of the patch
/// factor and the pixel count sits inside the configured window, and stored
/// PNG-encoded for transport to the engine.
#[derive(Debug, Clone)]
pub struct ImageFrame {
    source: ImageSource,
    original_size: ImageSize,
    size: ImageSize,
    encoded: Bytes,
}

impl ImageFrame {
    pub fn new(source: ImageSource, original_size: ImageSize, size: ImageSize, encoded: Bytes) -> Self {
        Self {
            source,
            original_size,
            size,
            encoded,
        }
    }

    pub fn source(&self) -> &ImageSource {
        &self.source
    }

    /// Dimensions as received from the client.
    pub fn original_size(&self) -> ImageSize {
        self.original_size
    }

    /// Dimensions after normalization.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// PNG encoding of the normalized pixels.
    pub fn png_bytes(&self) -> &Bytes {
        &self.encoded
    }
}
