//! Grid composition of a generation batch into a single result image.
//!
//! Images fill the grid row-major: image `i` lands at
//! `(i % cols * w, i / cols * h)`. Pixels are copied verbatim, never
//! blended or resampled.

use std::io::Cursor;

use image::{imageops, ImageFormat, RgbImage};
use uuid::Uuid;

use crate::error::CompositionError;

/// Rows in the result grid.
pub const GRID_ROWS: u32 = 2;
/// Columns in the result grid.
pub const GRID_COLS: u32 = 2;
/// Number of images a job produces and the grid holds.
pub const BATCH_SIZE: usize = (GRID_ROWS * GRID_COLS) as usize;

/// A composed, PNG-encoded result image.
///
/// Lives in memory for exactly one job; each artifact has its own id so
/// concurrent workers never share storage.
#[derive(Debug, Clone)]
pub struct ResultArtifact {
    pub id: Uuid,
    pub width: u32,
    pub height: u32,
    png: Vec<u8>,
}

impl ResultArtifact {
    /// Encoded PNG bytes.
    pub fn png_bytes(&self) -> &[u8] {
        &self.png
    }

    /// Consume the artifact, returning the encoded PNG bytes.
    pub fn into_png_bytes(self) -> Vec<u8> {
        self.png
    }
}

/// Arrange exactly [`BATCH_SIZE`] same-size images into a 2×2 grid.
pub fn compose(images: &[RgbImage]) -> Result<ResultArtifact, CompositionError> {
    let grid = compose_grid(images, GRID_ROWS, GRID_COLS)?;
    encode(grid)
}

/// Arrange `rows * cols` same-size images into one canvas.
///
/// Nothing is allocated until every input has been validated.
pub fn compose_grid(images: &[RgbImage], rows: u32, cols: u32) -> Result<RgbImage, CompositionError> {
    let expected = rows as usize * cols as usize;
    if images.len() != expected {
        return Err(CompositionError::WrongCount {
            expected,
            actual: images.len(),
        });
    }

    // A zero-cell grid passes the count check with no images.
    let Some(first) = images.first() else {
        return Err(CompositionError::EmptyImage);
    };
    let (w, h) = first.dimensions();
    if w == 0 || h == 0 {
        return Err(CompositionError::EmptyImage);
    }
    for (index, img) in images.iter().enumerate() {
        let (actual_w, actual_h) = img.dimensions();
        if (actual_w, actual_h) != (w, h) {
            return Err(CompositionError::DimensionMismatch {
                index,
                expected_w: w,
                expected_h: h,
                actual_w,
                actual_h,
            });
        }
    }

    let mut canvas = RgbImage::new(cols * w, rows * h);
    for (i, img) in images.iter().enumerate() {
        let i = i as u32;
        let x = (i % cols * w) as i64;
        let y = (i / cols * h) as i64;
        imageops::replace(&mut canvas, img, x, y);
    }
    Ok(canvas)
}

fn encode(grid: RgbImage) -> Result<ResultArtifact, CompositionError> {
    let (width, height) = grid.dimensions();
    let mut png = Vec::new();
    grid.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(ResultArtifact {
        id: Uuid::new_v4(),
        width,
        height,
        png,
    })
}
