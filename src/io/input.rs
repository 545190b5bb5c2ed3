use image::{GrayImage, ImageBuffer, Luma};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{WlError, WlResult};

/// Row-major grid of calibrated pixel intensities. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelGrid {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

impl PixelGrid {
    pub fn new(width: usize, height: usize, data: Vec<f64>) -> WlResult<Self> {
        let invalid = |reason: String| WlError::InvalidImage {
            name: "pixel grid".to_string(),
            reason,
        };
        if width == 0 || height == 0 {
            return Err(invalid(format!("empty grid ({}x{})", width, height)));
        }
        if data.len() != width * height {
            return Err(invalid(format!(
                "expected {} values for a {}x{} grid, got {}",
                width * height,
                width,
                height,
                data.len()
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(invalid("grid contains non-finite values".to_string()));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Builds a grid by evaluating `f(col, row)` for every pixel.
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for row in 0..height {
            for col in 0..width {
                data.push(f(col, row));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn get(&self, col: usize, row: usize) -> f64 {
        self.data[row * self.width + col]
    }

    pub fn min_max(&self) -> (f64, f64) {
        self.data
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }

    /// Geometric center in pixel coordinates (col, row).
    pub fn center(&self) -> Point2<f64> {
        Point2::new(
            (self.width as f64 - 1.0) / 2.0,
            (self.height as f64 - 1.0) / 2.0,
        )
    }

    /// Copies the rectangle `[col0, col1) x [row0, row1)`, clipped to the grid.
    /// Returns the sub-grid and the (col, row) of its origin, or `None` if the
    /// clipped rectangle is empty.
    pub fn window(
        &self,
        col0: isize,
        row0: isize,
        col1: isize,
        row1: isize,
    ) -> Option<(PixelGrid, (usize, usize))> {
        let c0 = col0.max(0) as usize;
        let r0 = row0.max(0) as usize;
        let c1 = (col1.max(0) as usize).min(self.width);
        let r1 = (row1.max(0) as usize).min(self.height);
        if c1 <= c0 || r1 <= r0 {
            return None;
        }
        let sub = PixelGrid::from_fn(c1 - c0, r1 - r0, |col, row| self.get(c0 + col, r0 + row));
        Some((sub, (c0, r0)))
    }
}

impl From<&GrayImage> for PixelGrid {
    fn from(img: &GrayImage) -> Self {
        Self {
            width: img.width() as usize,
            height: img.height() as usize,
            data: img.pixels().map(|p| p.0[0] as f64).collect(),
        }
    }
}

impl From<&ImageBuffer<Luma<u16>, Vec<u16>>> for PixelGrid {
    fn from(img: &ImageBuffer<Luma<u16>, Vec<u16>>) -> Self {
        Self {
            width: img.width() as usize,
            height: img.height() as usize,
            data: img.pixels().map(|p| p.0[0] as f64).collect(),
        }
    }
}

/// Gantry, collimator and couch angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisReading {
    pub gantry: f64,
    pub collimator: f64,
    pub couch: f64,
}

impl AxisReading {
    pub fn new(gantry: f64, collimator: f64, couch: f64) -> Self {
        Self {
            gantry,
            collimator,
            couch,
        }
    }

    /// Wraps every angle into `[0, 360)` and pegs readings within 1° of
    /// 0 or 360 to exactly 0.
    pub fn normalized(&self) -> Self {
        Self {
            gantry: normalize_angle(self.gantry),
            collimator: normalize_angle(self.collimator),
            couch: normalize_angle(self.couch),
        }
    }

    /// Reads the axes from a file name such as `wl_gantry90_coll0_couch270.dcm`.
    ///
    /// A keyword that is absent means 0; a keyword that is present but not
    /// followed by a number is an error.
    pub fn from_filename(name: &str) -> WlResult<Self> {
        Ok(Self {
            gantry: read_axis_from_name(name, "gantry", &["gantry"])?,
            collimator: read_axis_from_name(name, "collimator", &["collimator", "coll"])?,
            couch: read_axis_from_name(name, "couch", &["couch"])?,
        }
        .normalized())
    }
}

pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped <= 1.0 || wrapped >= 359.0 {
        0.0
    } else {
        wrapped
    }
}

fn read_axis_from_name(name: &str, axis: &str, keywords: &[&str]) -> WlResult<f64> {
    let lower = name.to_lowercase();
    let Some((keyword, pos)) = keywords
        .iter()
        .find_map(|kw| lower.find(kw).map(|pos| (*kw, pos)))
    else {
        return Ok(0.0);
    };

    let parse_error = |reason: &str| WlError::AxisParse {
        name: name.to_string(),
        axis: axis.to_string(),
        reason: reason.to_string(),
    };

    let rest = lower[pos + keyword.len()..].trim_start_matches(['_', '=', '-', ' ']);
    let int_len = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if int_len == 0 {
        return Err(parse_error(&format!(
            "'{}' must be followed by a number, e.g. '{}90'",
            keyword, keyword
        )));
    }
    let mut end = int_len;
    if let Some(frac) = rest[int_len..].strip_prefix('.') {
        let frac_len = frac.chars().take_while(|c| c.is_ascii_digit()).count();
        if frac_len > 0 {
            end += 1 + frac_len;
        }
    }
    rest[..end]
        .parse::<f64>()
        .map_err(|e| parse_error(&e.to_string()))
}

/// Explicit name -> axis reading lookup supplied by the caller.
pub type AxisMapping = HashMap<String, AxisReading>;

/// Resolves the axis reading for an image: the file name wins when
/// `use_filenames` is set, then an explicit mapping entry, then the reading
/// carried by the image metadata.
pub fn resolve_axes(
    name: &str,
    metadata: AxisReading,
    mapping: Option<&AxisMapping>,
    use_filenames: bool,
) -> WlResult<AxisReading> {
    if use_filenames {
        return AxisReading::from_filename(name);
    }
    let reading = mapping
        .and_then(|m| m.get(name).copied())
        .unwrap_or(metadata);
    Ok(reading.normalized())
}

/// One projection image as handed over by the image source.
#[derive(Debug, Clone)]
pub struct ProjectionImage {
    pub name: String,
    pub pixels: PixelGrid,
    /// Detector pixel spacing in mm/pixel.
    pub pixel_spacing_mm: f64,
    /// Source-to-detector distance in mm.
    pub sid_mm: f64,
    pub axes: AxisReading,
    /// Imager shift (x, y) in mm at the detector plane, if known.
    pub receptor_translation_mm: Option<(f64, f64)>,
}

impl ProjectionImage {
    pub fn new(
        name: impl Into<String>,
        pixels: PixelGrid,
        pixel_spacing_mm: f64,
        sid_mm: f64,
        axes: AxisReading,
    ) -> Self {
        Self {
            name: name.into(),
            pixels,
            pixel_spacing_mm,
            sid_mm,
            axes,
            receptor_translation_mm: None,
        }
    }

    pub fn with_receptor_translation(mut self, x_mm: f64, y_mm: f64) -> Self {
        self.receptor_translation_mm = Some((x_mm, y_mm));
        self
    }

    pub fn validate(&self) -> WlResult<()> {
        let invalid = |reason: String| WlError::InvalidImage {
            name: self.name.clone(),
            reason,
        };
        if !(self.pixel_spacing_mm.is_finite() && self.pixel_spacing_mm > 0.0) {
            return Err(invalid(format!(
                "pixel spacing must be positive, got {}",
                self.pixel_spacing_mm
            )));
        }
        if !(self.sid_mm.is_finite() && self.sid_mm > 0.0) {
            return Err(invalid(format!("SID must be positive, got {}", self.sid_mm)));
        }
        Ok(())
    }

    /// Pixels per mm at the isocenter plane.
    pub fn dpmm(&self, sad_mm: f64) -> f64 {
        (1.0 / self.pixel_spacing_mm) * self.sid_mm / sad_mm
    }

    /// Where the beam axis hits the imager, in pixel coordinates.
    pub fn epid_center(&self) -> Point2<f64> {
        let center = self.pixels.center();
        match self.receptor_translation_mm {
            Some((tx, ty)) => Point2::new(
                center.x - tx / self.pixel_spacing_mm,
                center.y - ty / self.pixel_spacing_mm,
            ),
            None => center,
        }
    }
}

#[cfg(test)]
mod input_tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pixel_grid_rejects_wrong_length() {
        let err = PixelGrid::new(3, 3, vec![0.0; 8]).unwrap_err();
        assert!(matches!(err, WlError::InvalidImage { .. }));
    }

    #[test]
    fn test_pixel_grid_rejects_nan() {
        let mut data = vec![1.0; 4];
        data[2] = f64::NAN;
        assert!(PixelGrid::new(2, 2, data).is_err());
    }

    #[test]
    fn test_window_is_clipped() {
        let grid = PixelGrid::from_fn(10, 8, |c, r| (r * 10 + c) as f64);
        let (sub, origin) = grid.window(-3, 6, 4, 20).unwrap();
        assert_eq!(origin, (0, 6));
        assert_eq!(sub.width(), 4);
        assert_eq!(sub.height(), 2);
        assert_relative_eq!(sub.get(1, 1), 71.0);
        assert!(grid.window(12, 0, 20, 5).is_none());
    }

    #[test]
    fn test_gray_image_conversion() {
        let img = GrayImage::from_fn(4, 3, |x, y| Luma([(x + 10 * y) as u8]));
        let grid = PixelGrid::from(&img);
        assert_eq!((grid.width(), grid.height()), (4, 3));
        assert_relative_eq!(grid.get(3, 2), 23.0);
    }

    #[test]
    fn test_normalize_pegs_near_zero() {
        let reading = AxisReading::new(359.5, -90.0, 0.7).normalized();
        assert_relative_eq!(reading.gantry, 0.0);
        assert_relative_eq!(reading.collimator, 270.0);
        assert_relative_eq!(reading.couch, 0.0);
    }

    #[test]
    fn test_axes_from_filename() {
        let reading = AxisReading::from_filename("wl_gantry78_collimator88_couch11.dcm").unwrap();
        assert_relative_eq!(reading.gantry, 78.0);
        assert_relative_eq!(reading.collimator, 88.0);
        assert_relative_eq!(reading.couch, 11.0);

        let reading = AxisReading::from_filename("Gantry_90.5-Coll=45.dcm").unwrap();
        assert_relative_eq!(reading.gantry, 90.5);
        assert_relative_eq!(reading.collimator, 45.0);
        assert_relative_eq!(reading.couch, 0.0);
    }

    #[test]
    fn test_missing_number_in_filename_fails() {
        let err = AxisReading::from_filename("gantry_couch10.dcm").unwrap_err();
        assert!(matches!(err, WlError::AxisParse { ref axis, .. } if axis == "gantry"));
    }

    #[test]
    fn test_filenames_override_mapping() {
        let mut mapping = AxisMapping::new();
        mapping.insert("g13_couch88.dcm".to_string(), AxisReading::new(21.0, 22.0, 23.0));
        let meta = AxisReading::default();

        let from_map = resolve_axes("g13_couch88.dcm", meta, Some(&mapping), false).unwrap();
        assert_relative_eq!(from_map.collimator, 22.0);

        let from_name = resolve_axes("g13_couch88.dcm", meta, Some(&mapping), true).unwrap();
        assert_relative_eq!(from_name.couch, 88.0);
        assert_relative_eq!(from_name.gantry, 0.0);
    }

    #[test]
    fn test_dpmm_scaled_to_isocenter() {
        let grid = PixelGrid::from_fn(4, 4, |_, _| 0.0);
        let img = ProjectionImage::new("a", grid, 0.392, 1500.0, AxisReading::default());
        assert_relative_eq!(img.dpmm(1000.0), 1.5 / 0.392, epsilon = 1e-12);
    }

    #[test]
    fn test_epid_center_follows_receptor_translation() {
        let grid = PixelGrid::from_fn(11, 11, |_, _| 0.0);
        let img = ProjectionImage::new("a", grid, 0.5, 1000.0, AxisReading::default())
            .with_receptor_translation(1.0, -2.0);
        let c = img.epid_center();
        assert_relative_eq!(c.x, 3.0);
        assert_relative_eq!(c.y, 9.0);
    }
}
