//! Glyph rasterization
//!
//! Turns a character into a one-byte-per-pixel coverage bitmap positioned
//! relative to the text baseline.

use crate::config::FontConfig;
use ab_glyph::{Font, FontVec, PxScale, point};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum FontError {
    #[error("failed to read font file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("font file {path:?} has no usable face at index {index}")]
    Parse { path: PathBuf, index: u32 },

    #[error("font face in {0:?} does not report units per em")]
    MissingMetrics(PathBuf),

    #[error("pixel size must be positive, got {0}")]
    InvalidSize(u32),
}

/// Per-character rasterization failure. Callers skip the character.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GlyphError {
    #[error("font has no glyph for {0:?}")]
    Missing(char),
}

/// Coverage bitmap for one character
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glyph {
    pub width: u32,
    pub rows: u32,
    /// Horizontal offset of the bitmap from the pen position
    pub left: i32,
    /// Distance from the baseline up to the bitmap's top row
    pub top: i32,
    /// `rows * width` coverage bytes, row-major
    pub coverage: Vec<u8>,
}

impl Glyph {
    /// A glyph that draws nothing (whitespace)
    pub fn empty() -> Self {
        Self {
            width: 0,
            rows: 0,
            left: 0,
            top: 0,
            coverage: Vec::new(),
        }
    }

    pub fn coverage_at(&self, col: u32, row: u32) -> u8 {
        self.coverage[(row * self.width + col) as usize]
    }
}

/// Anything that can produce glyph bitmaps for the line blitter
pub trait GlyphSource {
    fn rasterize(&mut self, code: char) -> Result<Glyph, GlyphError>;
}

/// Font engine wrapper rendering at a fixed pixel size
pub struct FontRasterizer {
    font: FontVec,
    scale: PxScale,
    pixel_size: u32,
}

impl FontRasterizer {
    /// Load the configured face and fix the render size.
    pub fn init(config: &FontConfig) -> Result<Self, FontError> {
        if config.pixel_size == 0 {
            return Err(FontError::InvalidSize(config.pixel_size));
        }

        let data = std::fs::read(&config.path).map_err(|source| FontError::Read {
            path: config.path.clone(),
            source,
        })?;

        let font = FontVec::try_from_vec_and_index(data, config.face_index).map_err(|_| {
            FontError::Parse {
                path: config.path.clone(),
                index: config.face_index,
            }
        })?;

        // PxScale is ascent-to-descent height; convert so the em square is
        // `pixel_size` pixels tall.
        let units_per_em = font
            .units_per_em()
            .ok_or_else(|| FontError::MissingMetrics(config.path.clone()))?;
        let scale = PxScale::from(config.pixel_size as f32 * font.height_unscaled() / units_per_em);

        info!(
            "Loaded font {:?} (face {}) at {}px",
            config.path, config.face_index, config.pixel_size
        );

        Ok(Self {
            font,
            scale,
            pixel_size: config.pixel_size,
        })
    }

    /// Release the font engine
    pub fn shutdown(self) {
        debug!("Font rasterizer ({}px) shut down", self.pixel_size);
    }
}

impl GlyphSource for FontRasterizer {
    fn rasterize(&mut self, code: char) -> Result<Glyph, GlyphError> {
        let id = self.font.glyph_id(code);
        if id.0 == 0 && !code.is_whitespace() {
            return Err(GlyphError::Missing(code));
        }

        let glyph = id.with_scale_and_position(self.scale, point(0.0, 0.0));
        let Some(outlined) = self.font.outline_glyph(glyph) else {
            return Ok(Glyph::empty());
        };

        let bounds = outlined.px_bounds();
        let width = bounds.width() as u32;
        let rows = bounds.height() as u32;
        let mut coverage = vec![0u8; (width * rows) as usize];
        outlined.draw(|x, y, c| {
            if x < width && y < rows {
                coverage[(y * width + x) as usize] = (c.clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        });

        Ok(Glyph {
            width,
            rows,
            left: bounds.min.x as i32,
            top: -(bounds.min.y as i32),
            coverage,
        })
    }
}
