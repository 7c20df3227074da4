//! Average-hash codec: a 64-bit luminance fingerprint compared by Hamming
//! distance. Rendered as 16 lowercase hex characters everywhere (DB, JSON,
//! CLI), matching the fingerprints the catalog was seeded with.

use std::fmt;
use std::str::FromStr;

use image::imageops::FilterType;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CatalogError;

/// Side length of the luminance grid; the hash carries GRID*GRID bits.
const GRID: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AverageHash(u64);

impl AverageHash {
    /// Fingerprints raw image bytes.
    ///
    /// The image is decoded, reduced to 8-bit luminance, resized to the 8x8
    /// grid and thresholded against the grid mean: bit i (row-major,
    /// MSB-first) is set iff cell i is strictly brighter than the mean.
    /// Deterministic for identical pixel data.
    pub fn from_image_bytes(bytes: &[u8]) -> Result<Self, image::ImageError> {
        let gray = image::load_from_memory(bytes)?
            .resize_exact(GRID, GRID, FilterType::Lanczos3)
            .to_luma8();

        let sum: u32 = gray.pixels().map(|p| p.0[0] as u32).sum();
        let mean = sum / (GRID * GRID);

        let mut bits: u64 = 0;
        for pixel in gray.pixels() {
            bits <<= 1;
            if pixel.0[0] as u32 > mean {
                bits |= 1;
            }
        }
        Ok(AverageHash(bits))
    }

    /// Hamming distance: the count of differing bits. Lower is more
    /// similar, 0 means the fingerprints are identical.
    pub fn distance(self, other: AverageHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl FromStr for AverageHash {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 {
            return Err(CatalogError::InvalidHashFormat(s.to_string()));
        }
        let bytes = hex::decode(s).map_err(|_| CatalogError::InvalidHashFormat(s.to_string()))?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes);
        Ok(AverageHash(u64::from_be_bytes(buf)))
    }
}

impl fmt::Display for AverageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0.to_be_bytes()))
    }
}

// Stored as the hex rendering so the table stays greppable with plain
// sqlite3. A corrupt stored value fails the read instead of ranking as
// garbage.
impl ToSql for AverageHash {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for AverageHash {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse().map_err(|e: CatalogError| FromSqlError::Other(Box::new(e)))
    }
}

impl Serialize for AverageHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AverageHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use std::io::Cursor;

    fn png_bytes(img: RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn parses_and_renders_hex() {
        let hash: AverageHash = "ef87831b81019bfb".parse().unwrap();
        assert_eq!(hash.to_string(), "ef87831b81019bfb");
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!(matches!(
            "ef87".parse::<AverageHash>(),
            Err(CatalogError::InvalidHashFormat(_))
        ));
        assert!(matches!(
            "zz87831b81019bfb".parse::<AverageHash>(),
            Err(CatalogError::InvalidHashFormat(_))
        ));
        assert!(matches!(
            "ef87831b81019bfb00".parse::<AverageHash>(),
            Err(CatalogError::InvalidHashFormat(_))
        ));
    }

    #[test]
    fn distance_counts_differing_bits() {
        let a: AverageHash = "ef87831b81019bfb".parse().unwrap();
        let b: AverageHash = "ef87831b81019bfa".parse().unwrap();
        assert_eq!(a.distance(a), 0);
        assert_eq!(a.distance(b), 1);
        assert_eq!(b.distance(a), 1);

        let zero: AverageHash = "0000000000000000".parse().unwrap();
        let ones: AverageHash = "ffffffffffffffff".parse().unwrap();
        assert_eq!(zero.distance(ones), 64);
    }

    #[test]
    fn half_bright_image_sets_bright_columns() {
        // Left half black, right half white: the four bright columns of
        // each row survive any resampling of the clean halves.
        let img = RgbImage::from_fn(64, 64, |x, _| {
            if x < 32 {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([255, 255, 255])
            }
        });
        let hash = AverageHash::from_image_bytes(&png_bytes(img)).unwrap();
        assert_eq!(hash.to_string(), "0f0f0f0f0f0f0f0f");
    }

    #[test]
    fn uniform_image_hashes_to_zero() {
        // No cell is strictly brighter than the mean.
        let img = RgbImage::from_pixel(32, 32, image::Rgb([128, 128, 128]));
        let hash = AverageHash::from_image_bytes(&png_bytes(img)).unwrap();
        assert_eq!(hash.to_string(), "0000000000000000");
    }

    #[test]
    fn hashing_is_deterministic() {
        let img = RgbImage::from_fn(48, 48, |x, y| image::Rgb([(x * 5) as u8, (y * 5) as u8, 0]));
        let bytes = png_bytes(img);
        let first = AverageHash::from_image_bytes(&bytes).unwrap();
        let second = AverageHash::from_image_bytes(&bytes).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_undecodable_bytes() {
        assert!(AverageHash::from_image_bytes(b"not an image").is_err());
    }
}
