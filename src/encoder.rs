//! Text to QR code raster encoding.
//!
//! The [`Encoder`] turns arbitrary text into a square grayscale bitmap of a fixed
//! size. Longer text yields a denser symbol, but the output resolution never changes.

use image::{ImageBuffer, Luma};
use qrcode::types::{Color, QrError};
use qrcode::{EcLevel, QrCode};

use crate::error::{Error, Result};

/// An 8-bit grayscale raster, dark modules are `0` and light modules `255`.
pub type Bitmap = ImageBuffer<Luma<u8>, Vec<u8>>;

/// Side length of the generated image, in pixels.
pub const DEFAULT_SIZE: u32 = 256;

/// Light modules kept around the symbol so scanners can find its edges.
pub const QUIET_ZONE: u32 = 4;

const DARK: Luma<u8> = Luma([0u8]);
const LIGHT: Luma<u8> = Luma([255u8]);

/// Encodes text into fixed-size QR code bitmaps.
///
/// Holds no mutable state, so one instance can be shared by every request.
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    size: u32,
    ec_level: EcLevel,
}

impl Default for Encoder {
    /// 256×256 pixels at the medium error correction level (~15% recovery).
    fn default() -> Self {
        Self {
            size: DEFAULT_SIZE,
            ec_level: EcLevel::M,
        }
    }
}

impl Encoder {
    /// Creates an encoder producing `size`×`size` images.
    ///
    /// `size` is raised to fit the largest symbol (version 40 plus quiet zone)
    /// so every module is at least one pixel wide.
    pub fn new(size: u32, ec_level: EcLevel) -> Self {
        Self {
            size: size.max(177 + 2 * QUIET_ZONE),
            ec_level,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn ec_level(&self) -> EcLevel {
        self.ec_level
    }

    /// Encodes `text` into a QR code bitmap.
    ///
    /// # Errors
    ///
    /// * [`Error::EmptyInput`] if `text` is empty.
    /// * [`Error::EncodingCapacityExceeded`] if `text` does not fit in the
    ///   largest symbol at this error correction level.
    ///
    /// # Example
    ///
    /// ```rust
    /// use qirust_serve::encoder::Encoder;
    ///
    /// let bitmap = Encoder::default().encode("Hello, World!").unwrap();
    /// assert_eq!(bitmap.dimensions(), (256, 256));
    /// ```
    pub fn encode(&self, text: &str) -> Result<Bitmap> {
        if text.is_empty() {
            return Err(Error::EmptyInput);
        }

        let code = QrCode::with_error_correction_level(text.as_bytes(), self.ec_level).map_err(
            |err| match err {
                QrError::DataTooLong => Error::EncodingCapacityExceeded { len: text.len() },
                other => Error::Encoding(other),
            },
        )?;

        Ok(self.rasterize(&code))
    }

    // Integer scale with the symbol centred; leftover pixels stay light.
    fn rasterize(&self, code: &QrCode) -> Bitmap {
        let modules = code.width() as u32;
        let total = modules + 2 * QUIET_ZONE;
        let scale = (self.size / total).max(1);
        let offset = self.size.saturating_sub(total * scale) / 2;

        let mut img = ImageBuffer::from_pixel(self.size, self.size, LIGHT);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            if x < offset || y < offset {
                continue;
            }
            let mx = (x - offset) / scale;
            let my = (y - offset) / scale;
            if mx < QUIET_ZONE || my < QUIET_ZONE {
                continue;
            }
            let (mx, my) = (mx - QUIET_ZONE, my - QUIET_ZONE);
            if mx >= modules || my >= modules {
                continue;
            }
            if code[(mx as usize, my as usize)] == Color::Dark {
                *pixel = DARK;
            }
        }
        img
    }
}

/// Encodes `text` with the default encoder.
pub fn encode(text: &str) -> Result<Bitmap> {
    Encoder::default().encode(text)
}
