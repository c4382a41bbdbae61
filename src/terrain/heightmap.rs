//! Heightmap images

use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat};

use crate::core::error::Error;
use crate::core::Result;

/// 8-bit heightmap with 1 to 4 channels.
///
/// One channel: height = value. Two or more: height = c0 + c1 / 256.
/// Row 0 is the far (+z) edge of the terrain.
#[derive(Clone, Debug, PartialEq)]
pub struct HeightMap {
    width: u32,
    height: u32,
    components: u32,
    data: Arc<[u8]>,
}

impl HeightMap {
    /// Wrap raw interleaved pixel data
    pub fn from_raw(width: u32, height: u32, components: u32, data: Vec<u8>) -> Result<Self> {
        if !(1..=4).contains(&components) {
            return Err(Error::HeightMap(format!(
                "heightmap must have 1 to 4 channels, got {}",
                components
            )));
        }
        let expected = width as usize * height as usize * components as usize;
        if data.len() != expected {
            return Err(Error::HeightMap(format!(
                "heightmap data is {} bytes, expected {} for {}x{}x{}",
                data.len(),
                expected,
                width,
                height,
                components
            )));
        }
        Ok(Self { width, height, components, data: data.into() })
    }

    /// Single channel heightmap from 8-bit values
    pub fn from_luma8(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::from_raw(width, height, 1, data)
    }

    /// Convert a decoded image. 16-bit grey is split into (high, low) byte channels.
    pub fn from_image(image: DynamicImage) -> Result<Self> {
        let (width, height) = (image.width(), image.height());
        match image {
            DynamicImage::ImageLuma8(img) => Self::from_raw(width, height, 1, img.into_raw()),
            DynamicImage::ImageLumaA8(img) => Self::from_raw(width, height, 2, img.into_raw()),
            DynamicImage::ImageRgb8(img) => Self::from_raw(width, height, 3, img.into_raw()),
            DynamicImage::ImageRgba8(img) => Self::from_raw(width, height, 4, img.into_raw()),
            DynamicImage::ImageLuma16(img) => {
                let data = img.into_raw().iter().flat_map(|v| v.to_be_bytes()).collect();
                Self::from_raw(width, height, 2, data)
            }
            DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => Err(Error::HeightMap(
                "floating point heightmaps are not supported".into(),
            )),
            other => {
                // Remaining 16-bit layouts: use the first channel at full precision
                let luma = other.to_luma16();
                let data = luma.into_raw().iter().flat_map(|v| v.to_be_bytes()).collect();
                Self::from_raw(width, height, 2, data)
            }
        }
    }

    /// Decode an encoded image (PNG, TGA, BMP, ...)
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match image::guess_format(bytes) {
            Ok(ImageFormat::Dds) => {
                return Err(Error::HeightMap(
                    "compressed (DDS) heightmaps are not supported".into(),
                ));
            }
            Ok(_) => {}
            Err(e) => return Err(Error::HeightMap(format!("unrecognized heightmap format: {}", e))),
        }
        Self::from_image(image::load_from_memory(bytes)?)
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self> {
        log::debug!("Loading heightmap {}", path.display());
        let bytes = std::fs::read(path)?;
        Self::decode(&bytes)
            .map_err(|e| Error::HeightMap(format!("{}: {}", path.display(), e)))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn components(&self) -> u32 {
        self.components
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Unscaled height at pixel `(x, row)`; out-of-range pixels are clamped
    pub fn sample(&self, x: u32, row: u32) -> f32 {
        let x = x.min(self.width.saturating_sub(1)) as usize;
        let row = row.min(self.height.saturating_sub(1)) as usize;
        let i = (row * self.width as usize + x) * self.components as usize;
        match self.data.get(i..i + self.components as usize) {
            Some([v]) => *v as f32,
            Some([high, low, ..]) => *high as f32 + *low as f32 / 256.0,
            _ => 0.0,
        }
    }
}

/// Read and decode a heightmap without blocking the async runtime
pub async fn load_height_map_async(path: impl AsRef<Path>) -> Result<HeightMap> {
    let path = path.as_ref().to_path_buf();
    let bytes = tokio::fs::read(&path).await?;
    tokio::task::spawn_blocking(move || {
        HeightMap::decode(&bytes).map_err(|e| Error::HeightMap(format!("{}: {}", path.display(), e)))
    })
    .await
    .map_err(|e| Error::HeightMap(format!("heightmap decode task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma};

    #[test]
    fn test_single_channel_sample() {
        let map = HeightMap::from_luma8(2, 2, vec![0, 10, 20, 255]).unwrap();
        assert_eq!(map.sample(1, 0), 10.0);
        assert_eq!(map.sample(1, 1), 255.0);
        // Clamped
        assert_eq!(map.sample(5, 9), 255.0);
    }

    #[test]
    fn test_two_channel_precision() {
        let map = HeightMap::from_raw(1, 1, 2, vec![3, 128]).unwrap();
        assert_eq!(map.sample(0, 0), 3.5);
        let rgba = HeightMap::from_raw(1, 1, 4, vec![3, 64, 200, 255]).unwrap();
        assert_eq!(rgba.sample(0, 0), 3.25);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(HeightMap::from_raw(2, 2, 5, vec![0; 20]).is_err());
        assert!(HeightMap::from_raw(2, 2, 1, vec![0; 3]).is_err());
        let float = DynamicImage::ImageRgb32F(ImageBuffer::new(2, 2));
        assert!(matches!(HeightMap::from_image(float), Err(Error::HeightMap(_))));
        assert!(matches!(HeightMap::decode(b"DDS |garbage"), Err(Error::HeightMap(_))));
    }

    #[test]
    fn test_luma16_split() {
        let img: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_raw(1, 1, vec![0x0380]).unwrap();
        let map = HeightMap::from_image(DynamicImage::ImageLuma16(img)).unwrap();
        assert_eq!(map.components(), 2);
        assert_eq!(map.sample(0, 0), 3.5);
    }

    #[test]
    fn test_load_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("height.png");
        GrayImage::from_raw(3, 1, vec![1, 2, 3]).unwrap().save(&path).unwrap();
        let map = HeightMap::load(&path).unwrap();
        assert_eq!((map.width(), map.height(), map.components()), (3, 1, 1));
        assert_eq!(map.sample(2, 0), 3.0);
    }

    #[tokio::test]
    async fn test_load_async() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("height.png");
        GrayImage::from_raw(2, 2, vec![9, 8, 7, 6]).unwrap().save(&path).unwrap();
        let map = load_height_map_async(&path).await.unwrap();
        assert_eq!(map.sample(0, 1), 7.0);

        let missing = load_height_map_async(dir.path().join("missing.png")).await;
        assert!(matches!(missing, Err(Error::Io(_))));
    }
}
