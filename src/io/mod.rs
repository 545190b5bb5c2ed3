pub mod config;
pub mod input;
pub mod output;

use anyhow::{bail, Context};
use input::{AxisReading, PixelGrid, ProjectionImage};
use std::path::Path;

/// Loads a grayscale image file (PNG, TIFF, ...) as a projection image.
///
/// Plain raster formats carry no geometry, so spacing and SID come from the
/// caller and the axes start at 0; set `use_filenames` in the config to read
/// them from the file name.
pub fn load_projection_image<P: AsRef<Path>>(
    path: P,
    pixel_spacing_mm: f64,
    sid_mm: f64,
) -> anyhow::Result<ProjectionImage> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let decoded = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let luma = decoded.to_luma16();
    if luma.width() == 0 || luma.height() == 0 {
        bail!("{} contains no pixels", path.display());
    }
    let image = ProjectionImage::new(
        name,
        PixelGrid::from(&luma),
        pixel_spacing_mm,
        sid_mm,
        AxisReading::default(),
    );
    image
        .validate()
        .with_context(|| format!("unusable image {}", path.display()))?;
    Ok(image)
}

/// Loads every file in `paths` with the same geometry.
pub fn load_projection_images<P: AsRef<Path>>(
    paths: &[P],
    pixel_spacing_mm: f64,
    sid_mm: f64,
) -> anyhow::Result<Vec<ProjectionImage>> {
    paths
        .iter()
        .map(|p| load_projection_image(p, pixel_spacing_mm, sid_mm))
        .collect()
}

#[cfg(test)]
mod io_tests {
    use super::*;
    use image::{ImageBuffer, Luma};

    #[test]
    fn test_load_png_round_trip() {
        let dir = std::env::temp_dir().join("wlcore_io_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gantry90_coll0_couch0.png");
        let img: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(6, 4, |x, y| Luma([(x * 100 + y) as u16]));
        img.save(&path).unwrap();

        let loaded = load_projection_image(&path, 0.4, 1500.0).unwrap();
        assert_eq!(loaded.name, "gantry90_coll0_couch0.png");
        assert_eq!((loaded.pixels.width(), loaded.pixels.height()), (6, 4));
        assert_eq!(loaded.pixels.get(5, 3), 503.0);
        let axes = AxisReading::from_filename(&loaded.name).unwrap();
        assert_eq!(axes.gantry, 90.0);
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = load_projection_image("/definitely/not/here.png", 0.4, 1000.0).unwrap_err();
        assert!(err.to_string().contains("here.png"));
    }

    #[test]
    fn test_bad_spacing_rejected() {
        let dir = std::env::temp_dir().join("wlcore_io_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("flat.png");
        let img: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_pixel(3, 3, Luma([7]));
        img.save(&path).unwrap();
        assert!(load_projection_image(&path, 0.0, 1000.0).is_err());
    }
}
