//! The owned pixel buffer behind every tile.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, ImageReader, Rgb, RgbImage};

use super::{TileError, TileFormat};

/// JPEG quality used for every encode.
///
/// Fixed so that re-encoding the same pixels always produces identical
/// bytes; tiling the same input twice must yield an identical tree.
const JPEG_QUALITY: u8 = 85;

/// An owned square of RGB pixels.
///
/// Tiles are value-semantic: cloning copies pixels, and every operation
/// returns a new tile. There is no interior concurrency; share tiles across
/// threads by cloning or wrapping in `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    image: RgbImage,
}

impl Tile {
    /// Wrap an existing RGB image buffer.
    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    /// Build a tile from raw interleaved RGB bytes.
    ///
    /// Returns `None` when `bytes.len() != width * height * 3`.
    pub fn from_raw(width: u32, height: u32, bytes: Vec<u8>) -> Option<Self> {
        RgbImage::from_raw(width, height, bytes).map(|image| Self { image })
    }

    /// A uniformly colored square tile.
    pub fn solid(size: u32, color: [u8; 3]) -> Self {
        Self {
            image: RgbImage::from_pixel(size, size, Rgb(color)),
        }
    }

    /// A black square tile.
    pub fn black(size: u32) -> Self {
        Self {
            image: RgbImage::new(size, size),
        }
    }

    /// Tile dimensions as `(width, height)`.
    pub fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Raw interleaved RGB bytes, row-major.
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Borrow the underlying image buffer.
    pub fn as_image(&self) -> &RgbImage {
        &self.image
    }

    /// Return the region contained in the bounding box `(x0, y0, x1, y1)`.
    ///
    /// Coordinates are clamped to the tile bounds.
    pub fn crop(&self, bbox: (u32, u32, u32, u32)) -> Tile {
        let (w, h) = self.image.dimensions();
        let (x0, y0, x1, y1) = bbox;
        let x0 = x0.min(w);
        let y0 = y0.min(h);
        let x1 = x1.clamp(x0, w);
        let y1 = y1.clamp(y0, h);
        Tile {
            image: imageops::crop_imm(&self.image, x0, y0, x1 - x0, y1 - y0).to_image(),
        }
    }

    /// Return a resized copy using bilinear filtering.
    pub fn resize(&self, width: u32, height: u32) -> Tile {
        Tile {
            image: imageops::resize(&self.image, width.max(1), height.max(1), FilterType::Triangle),
        }
    }

    /// Compose a 2x2 group of tiles into a single tile of the same size.
    ///
    /// Each quadrant is downscaled to half size and placed in this layout:
    ///
    /// ```text
    /// +---------+
    /// | tl | tr |
    /// |----+----|
    /// | bl | br |
    /// +---------+
    /// ```
    ///
    /// Missing quadrants (`None`) are left black, which is what the pyramid
    /// reduction wants along odd right and bottom edges.
    pub fn merge(tl: &Tile, tr: Option<&Tile>, bl: Option<&Tile>, br: Option<&Tile>) -> Tile {
        let (w, h) = tl.image.dimensions();
        let (half_w, half_h) = ((w / 2).max(1), (h / 2).max(1));
        let mut out = RgbImage::new(w, h);

        let mut place = |tile: &Tile, x: i64, y: i64| {
            let small = imageops::resize(&tile.image, half_w, half_h, FilterType::Triangle);
            imageops::replace(&mut out, &small, x, y);
        };

        place(tl, 0, 0);
        if let Some(t) = tr {
            place(t, half_w as i64, 0);
        }
        if let Some(t) = bl {
            place(t, 0, half_h as i64);
        }
        if let Some(t) = br {
            place(t, half_w as i64, half_h as i64);
        }

        Tile { image: out }
    }

    /// Write the tile to `path` in the given format.
    pub fn encode(&self, path: &Path, format: TileFormat) -> Result<(), TileError> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        let (w, h) = self.image.dimensions();

        let result = match format {
            TileFormat::Jpeg => JpegEncoder::new_with_quality(writer, JPEG_QUALITY).write_image(
                self.image.as_raw(),
                w,
                h,
                ExtendedColorType::Rgb8,
            ),
            TileFormat::Png => {
                PngEncoder::new(writer).write_image(self.image.as_raw(), w, h, ExtendedColorType::Rgb8)
            }
        };

        result.map_err(|e| TileError::Encode(e.to_string()))
    }

    /// Read a tile from `path`, converting to RGB if needed.
    pub fn decode(path: &Path) -> Result<Tile, TileError> {
        let image = ImageReader::open(path)?
            .decode()
            .map_err(|e| TileError::Decode(e.to_string()))?;
        Ok(Tile {
            image: image.to_rgb8(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn gradient_tile(size: u32) -> Tile {
        let image = RgbImage::from_fn(size, size, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        Tile::from_image(image)
    }

    #[test]
    fn test_solid_and_size() {
        let tile = Tile::solid(16, [10, 20, 30]);
        assert_eq!(tile.size(), (16, 16));
        assert!(tile.as_bytes().chunks(3).all(|p| p == [10, 20, 30]));
    }

    #[test]
    fn test_black_is_zeroed() {
        let tile = Tile::black(8);
        assert!(tile.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_from_raw_size_mismatch() {
        assert!(Tile::from_raw(4, 4, vec![0u8; 4 * 4 * 3]).is_some());
        assert!(Tile::from_raw(4, 4, vec![0u8; 7]).is_none());
    }

    #[test]
    fn test_crop_dimensions() {
        let tile = gradient_tile(32);
        let cropped = tile.crop((4, 8, 20, 24));
        assert_eq!(cropped.size(), (16, 16));
    }

    #[test]
    fn test_crop_preserves_pixels() {
        let tile = gradient_tile(32);
        let cropped = tile.crop((4, 8, 20, 24));
        assert_eq!(cropped.as_image().get_pixel(0, 0), tile.as_image().get_pixel(4, 8));
        assert_eq!(
            cropped.as_image().get_pixel(15, 15),
            tile.as_image().get_pixel(19, 23)
        );
    }

    #[test]
    fn test_crop_clamps_out_of_bounds() {
        let tile = gradient_tile(16);
        let cropped = tile.crop((8, 8, 64, 64));
        assert_eq!(cropped.size(), (8, 8));
    }

    #[test]
    fn test_resize_dimensions() {
        let tile = gradient_tile(32);
        assert_eq!(tile.resize(16, 16).size(), (16, 16));
        assert_eq!(tile.resize(64, 8).size(), (64, 8));
    }

    #[test]
    fn test_resize_is_deterministic() {
        let tile = gradient_tile(64);
        let a = tile.resize(32, 32);
        let b = tile.resize(32, 32);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_merge_layout() {
        let size = 16;
        let tl = Tile::solid(size, [255, 0, 0]);
        let tr = Tile::solid(size, [0, 255, 0]);
        let bl = Tile::solid(size, [0, 0, 255]);
        let br = Tile::solid(size, [255, 255, 0]);

        let merged = Tile::merge(&tl, Some(&tr), Some(&bl), Some(&br));
        assert_eq!(merged.size(), (size, size));

        let img = merged.as_image();
        assert_eq!(img.get_pixel(2, 2), &Rgb([255, 0, 0]));
        assert_eq!(img.get_pixel(12, 2), &Rgb([0, 255, 0]));
        assert_eq!(img.get_pixel(2, 12), &Rgb([0, 0, 255]));
        assert_eq!(img.get_pixel(12, 12), &Rgb([255, 255, 0]));
    }

    #[test]
    fn test_merge_missing_quadrants_are_black() {
        let tl = Tile::solid(16, [255, 255, 255]);
        let merged = Tile::merge(&tl, None, None, None);
        let img = merged.as_image();
        assert_eq!(img.get_pixel(2, 2), &Rgb([255, 255, 255]));
        assert_eq!(img.get_pixel(12, 2), &Rgb([0, 0, 0]));
        assert_eq!(img.get_pixel(2, 12), &Rgb([0, 0, 0]));
        assert_eq!(img.get_pixel(12, 12), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_png_round_trip_is_lossless() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tile.png");
        let tile = gradient_tile(32);

        tile.encode(&path, TileFormat::Png).unwrap();
        let decoded = Tile::decode(&path).unwrap();

        assert_eq!(decoded.as_bytes(), tile.as_bytes());
    }

    #[test]
    fn test_jpeg_round_trip_is_close() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tile.jpg");
        let tile = Tile::solid(32, [120, 130, 140]);

        tile.encode(&path, TileFormat::Jpeg).unwrap();
        let decoded = Tile::decode(&path).unwrap();

        assert_eq!(decoded.size(), (32, 32));
        // Lossy, but a flat color must stay within a small error bound.
        for (a, b) in decoded.as_bytes().iter().zip(tile.as_bytes()) {
            assert!((*a as i16 - *b as i16).abs() <= 8);
        }
    }

    #[test]
    fn test_jpeg_encode_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        let tile = gradient_tile(32);

        tile.encode(&a, TileFormat::Jpeg).unwrap();
        tile.encode(&b, TileFormat::Jpeg).unwrap();

        assert_eq!(std::fs::read(a).unwrap(), std::fs::read(b).unwrap());
    }

    #[test]
    fn test_decode_missing_file() {
        let err = Tile::decode(Path::new("/nonexistent/tile.png")).unwrap_err();
        assert!(matches!(err, TileError::Io(_)));
    }

    #[test]
    fn test_decode_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.png");
        std::fs::write(&path, b"not an image").unwrap();

        let err = Tile::decode(&path).unwrap_err();
        assert!(matches!(err, TileError::Decode(_)));
    }

    #[test]
    fn test_clone_copies_pixels() {
        let tile = gradient_tile(8);
        let clone = tile.clone();
        assert_eq!(clone.as_bytes(), tile.as_bytes());
    }
}
