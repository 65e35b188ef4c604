//! Image codec plugins.

use std::any::Any;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use plughost_plugin_sdk::prelude::*;

/// Environment variable pointing at the external HEIF decoder library.
pub const HEIF_DECODER_ENV: &str = "VENDOR_HEIF_DECODER";

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_SIGNATURE: &[u8] = &[0xFF, 0xD8, 0xFF];

/// Capability shared by every codec in this module.
pub trait ImageCodec {
    fn mime_type(&self) -> &'static str;

    /// Lowercase file extensions handled by the codec.
    fn extensions(&self) -> &'static [&'static str];

    /// Whether `header` starts like an image this codec decodes.
    fn matches(&self, header: &[u8]) -> bool;
}

#[derive(Debug, Default)]
pub struct PngCodec;

impl ImageCodec for PngCodec {
    fn mime_type(&self) -> &'static str {
        "image/png"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["png"]
    }

    fn matches(&self, header: &[u8]) -> bool {
        header.starts_with(PNG_SIGNATURE)
    }
}

impl Plugin for PngCodec {
    fn description(&self) -> Option<&str> {
        Some("PNG image codec")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// JPEG codec keeping a pool of decode buffers that is released on unload.
#[derive(Debug)]
pub struct JpegCodec {
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl JpegCodec {
    const POOL_SIZE: usize = 4;
    const BUFFER_BYTES: usize = 64 * 1024;

    /// Takes a buffer from the pool, allocating when it is empty.
    pub fn checkout(&self) -> Vec<u8> {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(Self::BUFFER_BYTES))
    }

    /// Returns a buffer to the pool.
    pub fn checkin(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        let mut pool = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if pool.len() < Self::POOL_SIZE {
            pool.push(buffer);
        }
    }

    pub fn pooled(&self) -> usize {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for JpegCodec {
    fn default() -> Self {
        let buffers = (0..Self::POOL_SIZE)
            .map(|_| Vec::with_capacity(Self::BUFFER_BYTES))
            .collect();
        Self {
            buffers: Mutex::new(buffers),
        }
    }
}

impl ImageCodec for JpegCodec {
    fn mime_type(&self) -> &'static str {
        "image/jpeg"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["jpg", "jpeg"]
    }

    fn matches(&self, header: &[u8]) -> bool {
        header.starts_with(JPEG_SIGNATURE)
    }
}

impl Plugin for JpegCodec {
    fn description(&self) -> Option<&str> {
        Some("JPEG image codec")
    }

    fn as_disposable(&self) -> Option<&dyn Disposable> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Disposable for JpegCodec {
    fn dispose(&self) {
        let mut pool = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(released = pool.len(), "Releasing JPEG decode buffers");
        pool.clear();
        pool.shrink_to_fit();
    }
}

/// HEIF codec backed by an external decoder library.
///
/// Reports itself unavailable unless `VENDOR_HEIF_DECODER` names an
/// existing file.
#[derive(Debug)]
pub struct HeifCodec {
    decoder: Option<PathBuf>,
}

impl HeifCodec {
    pub fn decoder(&self) -> Option<&PathBuf> {
        self.decoder.as_ref()
    }
}

impl Default for HeifCodec {
    fn default() -> Self {
        Self {
            decoder: std::env::var_os(HEIF_DECODER_ENV).map(PathBuf::from),
        }
    }
}

impl ImageCodec for HeifCodec {
    fn mime_type(&self) -> &'static str {
        "image/heif"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["heif", "heic"]
    }

    fn matches(&self, header: &[u8]) -> bool {
        header.len() >= 12
            && &header[4..8] == b"ftyp"
            && matches!(&header[8..12], b"heic" | b"heix" | b"mif1")
    }
}

impl Plugin for HeifCodec {
    fn description(&self) -> Option<&str> {
        Some("HEIF image codec")
    }

    fn unavailable_reasons(&self) -> Vec<String> {
        match &self.decoder {
            None => vec![format!("{HEIF_DECODER_ENV} is not set")],
            Some(path) if !path.is_file() => {
                vec![format!("HEIF decoder '{}' not found", path.display())]
            }
            Some(_) => Vec::new(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
