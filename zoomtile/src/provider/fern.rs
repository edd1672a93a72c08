//! Generator for Barnsley's fern iterated function system.

use image::{Rgb, RgbImage};

use super::TileGenerator;
use crate::tile::Tile;

/// Affine transformations of the fern, as `(probability, (a, b, c, d, e, f))`
/// where `x' = a*x + b*y + c` and `y' = d*x + e*y + f`.
const TRANSFORMATIONS: [(f64, (f64, f64, f64, f64, f64, f64)); 4] = [
    // rachis
    (0.01, (0.00, 0.00, 0.00, 0.00, 0.16, 0.00)),
    // left hand first pinna
    (0.07, (0.20, -0.26, 0.00, 0.23, 0.22, 1.60)),
    // right hand first pinna
    (0.07, (-0.15, 0.28, 0.00, 0.26, 0.24, 0.44)),
    // body of fern
    (0.85, (0.85, 0.04, 0.00, -0.04, 0.85, 1.60)),
];

const MAX_ITERATIONS: usize = 50_000;
const MAX_POINTS: usize = 10_000;
const COLOR: [u8; 3] = [100, 170, 0];

/// Fixed PRNG seed: every generation walks the same point sequence, so a
/// tile's pixels depend only on its coordinates.
const SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Minimal xorshift generator; deterministic across platforms.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_unit(&mut self) -> f64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Renders tiles of Barnsley's fern.
///
/// The fern lives in the square `x in [-5, 5]`, `y in [0, 10]`; each tile
/// renders the points of that attractor falling inside its own sub-square.
pub struct FernGenerator {
    tilesize: u32,
}

impl FernGenerator {
    /// A generator producing 256-pixel tiles.
    pub fn new() -> Self {
        Self { tilesize: 256 }
    }

    /// Override the tile edge length.
    pub fn with_tilesize(mut self, tilesize: u32) -> Self {
        self.tilesize = tilesize.max(1);
        self
    }

    fn choose_transformation(rng: &mut XorShift64) -> (f64, f64, f64, f64, f64, f64) {
        let mut n = rng.next_unit();
        for (probability, transformation) in TRANSFORMATIONS {
            if n <= probability {
                return transformation;
            }
            n -= probability;
        }
        TRANSFORMATIONS[3].1
    }

    fn draw_point(&self, image: &mut RgbImage, x: f64, y: f64, units: f64) {
        let size = self.tilesize as f64;
        let px = ((x * size / units) as i64).clamp(0, self.tilesize as i64 - 1) as u32;
        let py = ((size - y * size / units) as i64).clamp(0, self.tilesize as i64 - 1) as u32;
        image.put_pixel(px, py, Rgb(COLOR));
    }
}

impl Default for FernGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TileGenerator for FernGenerator {
    fn key(&self) -> &str {
        "fern"
    }

    fn tilesize(&self) -> u32 {
        self.tilesize
    }

    fn generate(&self, level: i32, row: i32, col: i32) -> Option<Tile> {
        // Side length of this tile in fern units.
        let units = 10.0 * 2.0f64.powi(-level);
        let x1 = f64::from(col) * units - 5.0;
        let y2 = 10.0 - f64::from(row) * units;
        let x2 = x1 + units;
        let y1 = y2 - units;

        let mut image = RgbImage::new(self.tilesize, self.tilesize);
        let mut rng = XorShift64::new(SEED);
        let mut drawn = 0usize;
        let (mut x, mut y) = (0.0f64, 0.0f64);

        for _ in 0..MAX_ITERATIONS {
            if x1 <= x && x <= x2 && y1 <= y && y <= y2 {
                self.draw_point(&mut image, x - x1, y - y1, units);
                drawn += 1;
                if drawn > MAX_POINTS {
                    break;
                }
            }
            let (a, b, c, d, e, f) = Self::choose_transformation(&mut rng);
            let x_new = a * x + b * y + c;
            let y_new = d * x + e * y + f;
            x = x_new;
            y = y_new;
        }

        Some(Tile::from_image(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_deterministic() {
        let generator = FernGenerator::new().with_tilesize(64);
        let a = generator.generate(1, 0, 1).unwrap();
        let b = generator.generate(1, 0, 1).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_overview_contains_fern_points() {
        let generator = FernGenerator::new().with_tilesize(64);
        let tile = generator.generate(0, 0, 0).unwrap();
        let green = tile
            .as_bytes()
            .chunks(3)
            .filter(|p| *p == COLOR)
            .count();
        assert!(green > 100, "overview should show the attractor, got {} points", green);
    }

    #[test]
    fn test_tiles_differ_by_coordinates() {
        let generator = FernGenerator::new().with_tilesize(64);
        let a = generator.generate(1, 0, 0).unwrap();
        let b = generator.generate(1, 0, 1).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_declared_properties() {
        let generator = FernGenerator::new();
        assert_eq!(generator.key(), "fern");
        assert_eq!(generator.tilesize(), 256);
        assert_eq!(generator.aspect_ratio(), 1.0);
        assert_eq!(generator.max_level(), None);
    }
}
