//! Multi-target mode: several BBs at known offsets from isocenter, each
//! with its own small field.

use anyhow::Context;
use nalgebra::{Point2, Vector2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{WlError, WlResult};
use crate::io::config::AnalysisConfig;
use crate::io::input::{resolve_axes, AxisMapping, AxisReading, ProjectionImage};
use crate::processing::analysis::Metric;
use crate::processing::field::{find_field_centroid, open_field};
use crate::processing::geometry::{bb_projection_gantry_plane, bb_projection_long};
use crate::processing::marker::find_marker;

/// Position and size of one BB relative to isocenter, in mm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BbConfig {
    pub offset_left_mm: f64,
    pub offset_up_mm: f64,
    pub offset_in_mm: f64,
    pub bb_size_mm: f64,
}

impl BbConfig {
    fn validate(&self, name: &str) -> WlResult<()> {
        let offsets = [self.offset_left_mm, self.offset_up_mm, self.offset_in_mm];
        if offsets.iter().any(|v| !v.is_finite()) {
            return Err(WlError::InvalidArrangement(format!(
                "BB '{}' has a non-finite offset",
                name
            )));
        }
        if !(self.bb_size_mm.is_finite() && self.bb_size_mm > 0.0) {
            return Err(WlError::InvalidArrangement(format!(
                "BB '{}' must have a positive size, got {}",
                name, self.bb_size_mm
            )));
        }
        Ok(())
    }
}

/// Validated set of named BBs. Construction is the only place entries are checked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BbArrangement {
    bbs: BTreeMap<String, BbConfig>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawArrangement {
    bbs: BTreeMap<String, BbConfig>,
}

impl BbArrangement {
    /// Fails on an empty list, a blank or repeated name, or an invalid entry.
    pub fn new<I, S>(entries: I) -> WlResult<Self>
    where
        I: IntoIterator<Item = (S, BbConfig)>,
        S: Into<String>,
    {
        let mut bbs = BTreeMap::new();
        for (name, bb) in entries {
            let name: String = name.into();
            if name.trim().is_empty() {
                return Err(WlError::InvalidArrangement("BB names must not be blank".to_string()));
            }
            bb.validate(&name)?;
            if bbs.insert(name.clone(), bb).is_some() {
                return Err(WlError::InvalidArrangement(format!(
                    "BB '{}' is listed twice",
                    name
                )));
            }
        }
        if bbs.is_empty() {
            return Err(WlError::InvalidArrangement(
                "an arrangement needs at least one BB".to_string(),
            ));
        }
        Ok(Self { bbs })
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let raw: RawArrangement = toml::from_str(text).context("failed to parse BB arrangement")?;
        Ok(Self::new(raw.bbs)?)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read arrangement {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("invalid arrangement {}", path.display()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BbConfig)> {
        self.bbs.iter()
    }

    pub fn len(&self) -> usize {
        self.bbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bbs.is_empty()
    }
}

/// Field and BB found for one BB in one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BbDetection {
    pub image: String,
    pub bb: String,
    pub gantry: f64,
    pub collimator: f64,
    pub nominal_px: [f64; 2],
    pub field_center_px: [f64; 2],
    pub bb_center_px: [f64; 2],
    pub cax_to_bb_mm: [f64; 2],
    pub distance_mm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiTargetResult {
    pub detections: Vec<BbDetection>,
    /// Images left out because the couch was rotated.
    pub excluded_images: Vec<String>,
    /// (image, BB) pairs where no BB was found.
    pub missing: Vec<(String, String)>,
    pub max_distance_mm: f64,
    pub median_distance_mm: f64,
    pub mean_distance_mm: f64,
}

/// Image offset (mm at isocenter, columns and rows) where `bb` should appear.
pub fn nominal_offset(bb: &BbConfig, gantry_deg: f64, sad_mm: f64) -> Vector2<f64> {
    Vector2::new(
        bb_projection_gantry_plane(bb.offset_left_mm, bb.offset_up_mm, sad_mm, gantry_deg),
        bb_projection_long(
            bb.offset_in_mm,
            bb.offset_up_mm,
            bb.offset_left_mm,
            sad_mm,
            gantry_deg,
        ),
    )
}

fn detect_bb(
    image: &ProjectionImage,
    axes: &AxisReading,
    name: &str,
    bb: &BbConfig,
    config: &AnalysisConfig,
) -> Option<BbDetection> {
    let dpmm = image.dpmm(config.sad_mm);
    let nominal = image.epid_center() + nominal_offset(bb, axes.gantry, config.sad_mm) * dpmm;
    let half = config.bb_window_mm * dpmm;
    let (window, (col0, row0)) = image.pixels.window(
        (nominal.x - half).floor() as isize,
        (nominal.y - half).floor() as isize,
        (nominal.x + half).ceil() as isize + 1,
        (nominal.y + half).ceil() as isize + 1,
    )?;
    let origin = Vector2::new(col0 as f64, row0 as f64);
    let local_nominal = nominal - origin;

    let field = if config.open_field {
        open_field(&window)
    } else {
        find_field_centroid(&window)?
    };
    let search = config.marker_search(bb.bb_size_mm, dpmm);
    let marker = find_marker(&window, &field, local_nominal, &search)?;

    let field_center: Point2<f64> = field.center + origin;
    let bb_center: Point2<f64> = marker.center + origin;
    let offset = (bb_center - field_center) / dpmm;
    debug!(
        "'{}' in '{}': {:.3} mm from its field center",
        name,
        image.name,
        offset.norm()
    );
    Some(BbDetection {
        image: image.name.clone(),
        bb: name.to_string(),
        gantry: axes.gantry,
        collimator: axes.collimator,
        nominal_px: [nominal.x, nominal.y],
        field_center_px: [field_center.x, field_center.y],
        bb_center_px: [bb_center.x, bb_center.y],
        cax_to_bb_mm: [offset.x, offset.y],
        distance_mm: offset.norm(),
    })
}

/// Runs the field and BB detectors around every BB of `arrangement` in every
/// couch-0 image.
pub fn analyze_multi_target(
    images: &[ProjectionImage],
    arrangement: &BbArrangement,
    config: &AnalysisConfig,
    mapping: Option<&AxisMapping>,
) -> WlResult<MultiTargetResult> {
    config.validate()?;
    let scale = config.machine_scale;
    let mut usable = Vec::new();
    let mut excluded_images = Vec::new();
    for img in images {
        img.validate()?;
        let axes = scale
            .to_canonical(resolve_axes(&img.name, img.axes, mapping, config.use_filenames)?)
            .normalized();
        if axes.couch != 0.0 {
            warn!("'{}' has couch {:.1}; excluded from multi-target analysis", img.name, axes.couch);
            excluded_images.push(img.name.clone());
        } else {
            usable.push((img, axes));
        }
    }

    let per_image: Vec<Vec<(String, Option<BbDetection>)>> = usable
        .par_iter()
        .map(|(img, axes)| {
            arrangement
                .iter()
                .map(|(name, bb)| (name.clone(), detect_bb(img, axes, name, bb, config)))
                .collect()
        })
        .collect();

    let mut detections = Vec::new();
    let mut missing = Vec::new();
    for ((img, _), results) in usable.iter().zip(per_image) {
        for (name, detection) in results {
            match detection {
                Some(d) => detections.push(d),
                None => {
                    warn!("BB '{}' not found in '{}'", name, img.name);
                    missing.push((img.name.clone(), name));
                }
            }
        }
    }
    if detections.is_empty() {
        return Err(WlError::MarkerNeverFound {
            images: usable.len(),
        });
    }

    let distances: Vec<f64> = detections.iter().map(|d| d.distance_mm).collect();
    info!(
        "{} BB detections over {} images, {} missing",
        detections.len(),
        usable.len(),
        missing.len()
    );
    Ok(MultiTargetResult {
        max_distance_mm: Metric::Max.apply(&distances),
        median_distance_mm: Metric::Median.apply(&distances),
        mean_distance_mm: Metric::Mean.apply(&distances),
        detections,
        excluded_images,
        missing,
    })
}

#[cfg(test)]
mod arrangement_tests {
    use super::*;
    use crate::io::input::PixelGrid;
    use approx::assert_relative_eq;

    fn bb(left: f64, up: f64, inward: f64) -> BbConfig {
        BbConfig {
            offset_left_mm: left,
            offset_up_mm: up,
            offset_in_mm: inward,
            bb_size_mm: 5.0,
        }
    }

    fn two_bb_arrangement() -> BbArrangement {
        BbArrangement::new([("iso", bb(0.0, 0.0, 0.0)), ("corner", bb(-15.0, 0.0, 15.0))]).unwrap()
    }

    /// 10 mm fields at (80, 80) and (140, 140) px; the corner BB sits 0.5 mm
    /// right of its field center.
    fn two_bb_image(name: &str, axes: AxisReading) -> ProjectionImage {
        let fields = [(80.0, 80.0), (140.0, 140.0)];
        let bbs = [(80.0, 80.0), (142.0, 140.0)];
        let pixels = PixelGrid::from_fn(161, 161, |col, row| {
            let (c, r) = (col as f64, row as f64);
            let in_bb = bbs
                .iter()
                .any(|(bc, br)| (c - bc).powi(2) + (r - br).powi(2) <= 100.0);
            let in_field = fields
                .iter()
                .any(|(fc, fr)| (c - fc).abs() < 20.0 && (r - fr).abs() < 20.0);
            match (in_field, in_bb) {
                (true, true) => 800.0,
                (true, false) => 1000.0,
                _ => 100.0,
            }
        });
        ProjectionImage::new(name, pixels, 0.25, 1000.0, axes)
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            bb_window_mm: 8.0,
            ..AnalysisConfig::default()
        }
    }

    #[test]
    fn test_nominal_offset_follows_projection() {
        let corner = bb(-15.0, 0.0, 15.0);
        let at_zero = nominal_offset(&corner, 0.0, 1000.0);
        assert_relative_eq!(at_zero.x, 15.0, epsilon = 1e-12);
        assert_relative_eq!(at_zero.y, 15.0, epsilon = 1e-12);
        let at_90 = nominal_offset(&corner, 90.0, 1000.0);
        assert_relative_eq!(at_90.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(at_90.y, 15.225, epsilon = 1e-9);
    }

    #[test]
    fn test_two_bbs_found() {
        let images = vec![
            two_bb_image("g0", AxisReading::default()),
            two_bb_image("couch", AxisReading::new(0.0, 0.0, 30.0)),
        ];
        let result = analyze_multi_target(&images, &two_bb_arrangement(), &config(), None).unwrap();
        assert_eq!(result.excluded_images, vec!["couch".to_string()]);
        assert_eq!(result.detections.len(), 2);
        assert!(result.missing.is_empty());

        let corner = result.detections.iter().find(|d| d.bb == "corner").unwrap();
        assert_relative_eq!(corner.field_center_px[0], 140.0, epsilon = 1e-9);
        assert_relative_eq!(corner.cax_to_bb_mm[0], 0.5, epsilon = 1e-9);
        assert_relative_eq!(result.max_distance_mm, 0.5, epsilon = 1e-9);
        assert_relative_eq!(result.mean_distance_mm, 0.25, epsilon = 1e-9);
    }

    #[test]
    fn test_missing_bb_recorded() {
        let arrangement = BbArrangement::new([
            ("iso", bb(0.0, 0.0, 0.0)),
            ("nowhere", bb(10.0, 0.0, -15.0)),
        ])
        .unwrap();
        let images = vec![two_bb_image("g0", AxisReading::default())];
        let result = analyze_multi_target(&images, &arrangement, &config(), None).unwrap();
        assert_eq!(result.detections.len(), 1);
        assert_eq!(result.missing, vec![("g0".to_string(), "nowhere".to_string())]);
    }

    #[test]
    fn test_arrangement_validation() {
        let empty: [(&str, BbConfig); 0] = [];
        assert!(BbArrangement::new(empty).is_err());
        assert!(BbArrangement::new([("a", bb(0.0, 0.0, 0.0)), ("a", bb(1.0, 0.0, 0.0))]).is_err());
        assert!(BbArrangement::new([(" ", bb(0.0, 0.0, 0.0))]).is_err());
        let mut tiny = bb(0.0, 0.0, 0.0);
        tiny.bb_size_mm = 0.0;
        assert!(matches!(
            BbArrangement::new([("a", tiny)]),
            Err(WlError::InvalidArrangement(_))
        ));
        let mut nan = bb(0.0, 0.0, 0.0);
        nan.offset_up_mm = f64::NAN;
        assert!(BbArrangement::new([("a", nan)]).is_err());
    }

    #[test]
    fn test_arrangement_from_toml() {
        let text = r#"
[bbs.iso]
offset_left_mm = 0.0
offset_up_mm = 0.0
offset_in_mm = 0.0
bb_size_mm = 5.0

[bbs.sup]
offset_left_mm = 20.0
offset_up_mm = -10.0
offset_in_mm = 30.0
bb_size_mm = 3.0
"#;
        let arrangement = BbArrangement::from_toml_str(text).unwrap();
        assert_eq!(arrangement.len(), 2);
        let (name, sup) = arrangement.iter().nth(1).unwrap();
        assert_eq!(name, "sup");
        assert_relative_eq!(sup.offset_in_mm, 30.0);

        let bad = text.replace("bb_size_mm = 3.0", "bb_size_mm = -3.0");
        assert!(BbArrangement::from_toml_str(&bad).is_err());
        let typo = text.replace("offset_in_mm = 30.0", "offset_inn_mm = 30.0");
        assert!(BbArrangement::from_toml_str(&typo).is_err());
    }
}
