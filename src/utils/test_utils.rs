use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::io::input::{AxisReading, PixelGrid, ProjectionImage};
use crate::processing::geometry::project_marker;

/// Parameters of a synthetic square-field phantom image.
#[derive(Debug, Clone)]
pub struct SyntheticImage {
    pub name: String,
    pub size_px: usize,
    /// Pixels per mm at isocenter (pixel spacing 1/dpmm, SID = SAD).
    pub dpmm: f64,
    pub field_size_mm: f64,
    /// Field center offset (columns, rows) in mm from the image center.
    pub field_offset_mm: (f64, f64),
    pub bb_diameter_mm: f64,
    /// BB center offset (columns, rows) in mm from the image center.
    pub bb_offset_mm: (f64, f64),
    pub background: f64,
    pub field_signal: f64,
    /// BB intensity as a fraction of the field signal; above 1 for a
    /// low-density marker.
    pub bb_signal: f64,
    pub axes: AxisReading,
}

impl Default for SyntheticImage {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            size_px: 161,
            dpmm: 4.0,
            field_size_mm: 30.0,
            field_offset_mm: (0.0, 0.0),
            bb_diameter_mm: 8.0,
            bb_offset_mm: (0.0, 0.0),
            background: 100.0,
            field_signal: 1000.0,
            bb_signal: 0.8,
            axes: AxisReading::default(),
        }
    }
}

pub fn synthetic_image(spec: &SyntheticImage) -> ProjectionImage {
    let center = (spec.size_px as f64 - 1.0) / 2.0;
    let field_col = center + spec.field_offset_mm.0 * spec.dpmm;
    let field_row = center + spec.field_offset_mm.1 * spec.dpmm;
    let half_px = spec.field_size_mm / 2.0 * spec.dpmm;
    let bb_col = center + spec.bb_offset_mm.0 * spec.dpmm;
    let bb_row = center + spec.bb_offset_mm.1 * spec.dpmm;
    let r_px = spec.bb_diameter_mm / 2.0 * spec.dpmm;

    let pixels = PixelGrid::from_fn(spec.size_px, spec.size_px, |col, row| {
        let (c, r) = (col as f64, row as f64);
        let in_field = (c - field_col).abs() < half_px && (r - field_row).abs() < half_px;
        let in_bb = (c - bb_col).powi(2) + (r - bb_row).powi(2) <= r_px * r_px;
        match (in_field, in_bb) {
            (true, true) => spec.field_signal * spec.bb_signal,
            (true, false) => spec.field_signal,
            (false, true) => spec.background * spec.bb_signal,
            (false, false) => spec.background,
        }
    });
    ProjectionImage::new(spec.name.clone(), pixels, 1.0 / spec.dpmm, 1000.0, spec.axes)
}

/// Sets a seeded random `fraction` of pixels to the image minimum or maximum.
pub fn add_salt_and_pepper(image: &mut ProjectionImage, fraction: f64, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let (min, max) = image.pixels.min_max();
    let data: Vec<f64> = image
        .pixels
        .data()
        .iter()
        .map(|&v| {
            if rng.random_range(0.0..1.0) < fraction {
                if rng.random_range(0.0..1.0) < 0.5 {
                    min
                } else {
                    max
                }
            } else {
                v
            }
        })
        .collect();
    image.pixels = PixelGrid::new(image.pixels.width(), image.pixels.height(), data)
        .expect("noise keeps the grid shape");
}

/// One image per reading of a marker sitting at `marker_mm` (couch frame)
/// under a perfect beam. File names encode the axes.
pub fn marker_set(marker_mm: Vector3<f64>, readings: &[AxisReading]) -> Vec<ProjectionImage> {
    readings
        .iter()
        .map(|reading| {
            let offset = project_marker(&marker_mm, reading);
            synthetic_image(&SyntheticImage {
                name: format!(
                    "gantry{}_coll{}_couch{}",
                    reading.gantry, reading.collimator, reading.couch
                ),
                bb_offset_mm: (offset.x, offset.y),
                axes: *reading,
                ..SyntheticImage::default()
            })
        })
        .collect()
}

/// The four cardinal gantry angles with collimator and couch at 0.
pub fn cardinal_gantry() -> Vec<AxisReading> {
    [0.0, 90.0, 180.0, 270.0]
        .iter()
        .map(|&g| AxisReading::new(g, 0.0, 0.0))
        .collect()
}

#[cfg(test)]
mod test_utils_tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_phantom_layout() {
        let img = synthetic_image(&SyntheticImage::default());
        assert_eq!(img.pixels.width(), 161);
        assert_relative_eq!(img.dpmm(1000.0), 4.0);
        assert_relative_eq!(img.pixels.get(80, 80), 800.0);
        assert_relative_eq!(img.pixels.get(80, 100), 1000.0);
        assert_relative_eq!(img.pixels.get(0, 0), 100.0);
    }

    #[test]
    fn test_noise_is_reproducible() {
        let mut a = synthetic_image(&SyntheticImage::default());
        let mut b = a.clone();
        add_salt_and_pepper(&mut a, 0.05, 3);
        add_salt_and_pepper(&mut b, 0.05, 3);
        assert_eq!(a.pixels, b.pixels);
    }
}
