//! Contains the frame type and the contract for grabbing a still image of the display.
//! [CommandFrameSource](command::CommandFrameSource) is the bundled implementation; anything that
//! can hand back an encoded image can stand in for it.

pub mod command;

use std::{io::Cursor, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, ImageFormat};

/// A single captured still of the display, kept in its encoded form so it can be hashed locally
/// and shipped to the classification service without re-encoding.
#[derive(Clone, Debug)]
pub struct Frame {
    encoded: Arc<[u8]>,
}

impl Frame {
    pub fn from_encoded(bytes: Vec<u8>) -> Self {
        Self {
            encoded: bytes.into(),
        }
    }

    /// Encodes an in-memory image as PNG.
    pub fn from_image(image: &DynamicImage) -> Result<Self> {
        let mut buffer = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .context("failed to encode frame as png")?;
        Ok(Self::from_encoded(buffer))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.encoded
    }

    pub fn decode(&self) -> Result<DynamicImage> {
        image::load_from_memory(&self.encoded).context("captured frame is not a readable image")
    }

    /// Media type reported to the classification service. Falls back to png when the bytes don't
    /// match a known signature.
    pub fn media_type(&self) -> &'static str {
        match image::guess_format(&self.encoded) {
            Ok(ImageFormat::Jpeg) => "image/jpeg",
            Ok(ImageFormat::Gif) => "image/gif",
            Ok(ImageFormat::WebP) => "image/webp",
            _ => "image/png",
        }
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.encoded)
    }
}

/// Intended to serve as the contract every screen grabber must implement.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Returns one still image of the current display. Called once per cycle.
    async fn capture(&self) -> Result<Frame>;
}
