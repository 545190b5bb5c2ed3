//! Per-image extraction and the aggregate Winston-Lutz analysis.

use nalgebra::{Point2, Vector2, Vector3};
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::{WlError, WlResult};
use crate::io::config::AnalysisConfig;
use crate::io::input::{resolve_axes, AxisMapping, AxisReading, ProjectionImage};
use crate::processing::classify::{classify_reading, AxisGroup, ImageClass};
use crate::processing::field::{find_field_centroid, open_field};
use crate::processing::isocenter::{group_isocenter, IsocenterResult, MinimaxSolver};
use crate::processing::marker::find_marker;
use crate::processing::scale::MachineScale;
use crate::processing::shift::{bb_shift_vector, CouchCoordinates, ShiftInstruction};

/// Measurements of one image. Axes are canonical.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAnalysis {
    pub name: String,
    pub axes: AxisReading,
    pub class: ImageClass,
    pub field_center_px: [f64; 2],
    pub bb_center_px: [f64; 2],
    pub epid_center_px: [f64; 2],
    /// Pixels per mm at isocenter.
    pub dpmm: f64,
    /// BB minus field center, mm at isocenter, (columns, rows).
    pub cax_to_bb_mm: Vector2<f64>,
    /// EPID center minus field center, mm at isocenter.
    pub cax_to_epid_mm: Vector2<f64>,
}

impl ImageAnalysis {
    pub fn cax_to_bb_distance(&self) -> f64 {
        self.cax_to_bb_mm.norm()
    }

    pub fn cax_to_epid_distance(&self) -> f64 {
        self.cax_to_epid_mm.norm()
    }
}

/// Locates field and BB in one image whose axes have already been resolved
/// to the canonical scale.
pub fn analyze_image(
    image: &ProjectionImage,
    axes: AxisReading,
    config: &AnalysisConfig,
) -> WlResult<ImageAnalysis> {
    image.validate()?;
    let dpmm = image.dpmm(config.sad_mm);
    let not_found = || WlError::MarkerNotFound {
        image: image.name.clone(),
    };

    let field = if config.open_field {
        open_field(&image.pixels)
    } else {
        find_field_centroid(&image.pixels).ok_or_else(not_found)?
    };
    let search = config.marker_search(config.bb_size_mm, dpmm);
    let marker =
        find_marker(&image.pixels, &field, field.center, &search).ok_or_else(not_found)?;
    let epid = image.epid_center();

    Ok(ImageAnalysis {
        name: image.name.clone(),
        axes,
        class: classify_reading(&axes),
        field_center_px: [field.center.x, field.center.y],
        bb_center_px: [marker.center.x, marker.center.y],
        epid_center_px: [epid.x, epid.y],
        dpmm,
        cax_to_bb_mm: offset_mm(&field.center, &marker.center, dpmm),
        cax_to_epid_mm: offset_mm(&field.center, &epid, dpmm),
    })
}

fn offset_mm(from: &Point2<f64>, to: &Point2<f64>, dpmm: f64) -> Vector2<f64> {
    (to - from) / dpmm
}

/// Summary statistic over per-image distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Metric {
    Max,
    Median,
    Mean,
}

impl Metric {
    pub fn apply(self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            Metric::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Metric::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Metric::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
        }
    }
}

impl FromStr for Metric {
    type Err = WlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "max" => Ok(Metric::Max),
            "median" => Ok(Metric::Median),
            "mean" => Ok(Metric::Mean),
            other => Err(WlError::InvalidConfig(format!(
                "unknown metric '{}' (expected max, median or mean)",
                other
            ))),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Max => write!(f, "max"),
            Metric::Median => write!(f, "median"),
            Metric::Mean => write!(f, "mean"),
        }
    }
}

/// A completed analysis over an image set. Every metric is derived on demand
/// from the immutable per-image measurements.
#[derive(Debug, Clone)]
pub struct WinstonLutz {
    config: AnalysisConfig,
    images: Vec<ImageAnalysis>,
    skipped: Vec<String>,
    solver: MinimaxSolver,
}

impl WinstonLutz {
    /// Resolves axes, extracts every image in parallel and keeps the images
    /// where a BB was found.
    pub fn analyze(
        images: &[ProjectionImage],
        config: &AnalysisConfig,
        mapping: Option<&AxisMapping>,
    ) -> WlResult<Self> {
        config.validate()?;
        if images.len() < 2 {
            return Err(WlError::TooFewImages {
                found: images.len(),
            });
        }
        let scale = config.machine_scale;
        let readings = images
            .iter()
            .map(|img| {
                resolve_axes(&img.name, img.axes, mapping, config.use_filenames)
                    .map(|r| scale.to_canonical(r).normalized())
            })
            .collect::<WlResult<Vec<AxisReading>>>()?;

        let extracted: Vec<WlResult<ImageAnalysis>> = images
            .par_iter()
            .zip(readings.par_iter())
            .map(|(img, &axes)| analyze_image(img, axes, config))
            .collect();

        let mut found = Vec::with_capacity(extracted.len());
        let mut skipped = Vec::new();
        for result in extracted {
            match result {
                Ok(analysis) => found.push(analysis),
                Err(WlError::MarkerNotFound { image }) => {
                    warn!("BB not found in '{}'; image excluded", image);
                    skipped.push(image);
                }
                Err(e) => return Err(e),
            }
        }
        if found.is_empty() {
            return Err(WlError::MarkerNeverFound {
                images: images.len(),
            });
        }
        info!(
            "analyzed {} of {} images ({} scale)",
            found.len(),
            images.len(),
            scale
        );
        Ok(Self {
            config: config.clone(),
            images: found,
            skipped,
            solver: MinimaxSolver::default(),
        })
    }

    pub fn images(&self) -> &[ImageAnalysis] {
        &self.images
    }

    /// Names of the images where no BB was found.
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn isocenter(&self, group: AxisGroup) -> IsocenterResult {
        group_isocenter(group, &self.images, &self.solver)
    }

    pub fn gantry_iso_size(&self) -> f64 {
        self.isocenter(AxisGroup::Gantry).diameter_mm
    }

    pub fn gantry_coll_iso_size(&self) -> f64 {
        self.isocenter(AxisGroup::GantryCollimator).diameter_mm
    }

    pub fn collimator_iso_size(&self) -> f64 {
        self.isocenter(AxisGroup::Collimator).diameter_mm
    }

    pub fn couch_iso_size(&self) -> f64 {
        self.isocenter(AxisGroup::Couch).diameter_mm
    }

    pub fn axis_rms_deviation(&self, group: AxisGroup) -> Vec<f64> {
        self.isocenter(group).deviations_mm
    }

    pub fn cax2bb_distance(&self, metric: Metric) -> f64 {
        let distances: Vec<f64> = self.images.iter().map(|i| i.cax_to_bb_distance()).collect();
        metric.apply(&distances)
    }

    pub fn cax2epid_distance(&self, metric: Metric) -> f64 {
        let distances: Vec<f64> = self
            .images
            .iter()
            .map(|i| i.cax_to_epid_distance())
            .collect();
        metric.apply(&distances)
    }

    /// Couch shift in mm, in the configured machine scale.
    pub fn bb_shift_vector(&self) -> Vector3<f64> {
        bb_shift_vector(&self.images, self.config.machine_scale)
    }

    pub fn bb_shift_instruction(&self, baseline: Option<CouchCoordinates>) -> ShiftInstruction {
        ShiftInstruction::new(self.bb_shift_vector(), baseline)
    }

    pub fn results_data(&self) -> WinstonLutzResult {
        self.results_data_with_couch(None)
    }

    /// Like [`results_data`](Self::results_data); with a baseline couch
    /// position the shift text and `new_couch_cm` carry the shifted couch.
    pub fn results_data_with_couch(&self, baseline: Option<CouchCoordinates>) -> WinstonLutzResult {
        let scale = self.config.machine_scale;
        let gantry = self.isocenter(AxisGroup::Gantry);
        let gantry_coll = self.isocenter(AxisGroup::GantryCollimator);
        let coll = self.isocenter(AxisGroup::Collimator);
        let couch = self.isocenter(AxisGroup::Couch);
        let epid = self.isocenter(AxisGroup::Epid);
        let shift = self.bb_shift_instruction(baseline);

        WinstonLutzResult {
            machine_scale: scale,
            num_total_images: self.images.len() + self.skipped.len(),
            num_skipped_images: self.skipped.len(),
            num_gantry_images: gantry.images_considered,
            num_gantry_coll_images: gantry_coll.images_considered,
            num_coll_images: coll.images_considered,
            num_couch_images: couch.images_considered,
            max_2d_cax_to_bb_mm: self.cax2bb_distance(Metric::Max),
            median_2d_cax_to_bb_mm: self.cax2bb_distance(Metric::Median),
            mean_2d_cax_to_bb_mm: self.cax2bb_distance(Metric::Mean),
            max_2d_cax_to_epid_mm: self.cax2epid_distance(Metric::Max),
            median_2d_cax_to_epid_mm: self.cax2epid_distance(Metric::Median),
            mean_2d_cax_to_epid_mm: self.cax2epid_distance(Metric::Mean),
            gantry_3d_iso_diameter_mm: gantry.diameter_mm,
            gantry_coll_3d_iso_diameter_mm: gantry_coll.diameter_mm,
            coll_2d_iso_diameter_mm: coll.diameter_mm,
            couch_2d_iso_diameter_mm: couch.diameter_mm,
            max_gantry_rms_deviation_mm: gantry.max_deviation_mm,
            max_gantry_coll_rms_deviation_mm: gantry_coll.max_deviation_mm,
            max_coll_rms_deviation_mm: coll.max_deviation_mm,
            max_couch_rms_deviation_mm: couch.max_deviation_mm,
            max_epid_rms_deviation_mm: epid.max_deviation_mm,
            bb_shift_vector_mm: shift.shift_mm,
            bb_shift_instruction: shift.text,
            new_couch_cm: shift.new_couch_cm,
            isocenters: vec![gantry, gantry_coll, coll, couch, epid],
            image_details: self
                .images
                .iter()
                .map(|img| ImageDetail::new(img, scale))
                .collect(),
            skipped_images: self.skipped.clone(),
        }
    }
}

/// One row of the per-image report. Axes are in the configured scale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageDetail {
    pub name: String,
    pub gantry: f64,
    pub collimator: f64,
    pub couch: f64,
    pub class: String,
    pub field_center_col: f64,
    pub field_center_row: f64,
    pub bb_center_col: f64,
    pub bb_center_row: f64,
    pub cax_to_bb_u_mm: f64,
    pub cax_to_bb_v_mm: f64,
    pub cax_to_bb_mm: f64,
    pub cax_to_epid_mm: f64,
}

impl ImageDetail {
    pub fn new(img: &ImageAnalysis, scale: MachineScale) -> Self {
        let axes = scale.from_canonical(img.axes);
        Self {
            name: img.name.clone(),
            gantry: axes.gantry,
            collimator: axes.collimator,
            couch: axes.couch,
            class: img.class.to_string(),
            field_center_col: img.field_center_px[0],
            field_center_row: img.field_center_px[1],
            bb_center_col: img.bb_center_px[0],
            bb_center_row: img.bb_center_px[1],
            cax_to_bb_u_mm: img.cax_to_bb_mm.x,
            cax_to_bb_v_mm: img.cax_to_bb_mm.y,
            cax_to_bb_mm: img.cax_to_bb_distance(),
            cax_to_epid_mm: img.cax_to_epid_distance(),
        }
    }
}

/// Flat summary of an analysis, ready for JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WinstonLutzResult {
    pub machine_scale: MachineScale,
    pub num_total_images: usize,
    pub num_skipped_images: usize,
    pub num_gantry_images: usize,
    pub num_gantry_coll_images: usize,
    pub num_coll_images: usize,
    pub num_couch_images: usize,
    pub max_2d_cax_to_bb_mm: f64,
    pub median_2d_cax_to_bb_mm: f64,
    pub mean_2d_cax_to_bb_mm: f64,
    pub max_2d_cax_to_epid_mm: f64,
    pub median_2d_cax_to_epid_mm: f64,
    pub mean_2d_cax_to_epid_mm: f64,
    pub gantry_3d_iso_diameter_mm: f64,
    pub gantry_coll_3d_iso_diameter_mm: f64,
    pub coll_2d_iso_diameter_mm: f64,
    pub couch_2d_iso_diameter_mm: f64,
    pub max_gantry_rms_deviation_mm: f64,
    pub max_gantry_coll_rms_deviation_mm: f64,
    pub max_coll_rms_deviation_mm: f64,
    pub max_couch_rms_deviation_mm: f64,
    pub max_epid_rms_deviation_mm: f64,
    pub bb_shift_vector_mm: [f64; 3],
    pub bb_shift_instruction: String,
    /// Couch position after the shift, when a baseline was supplied.
    pub new_couch_cm: Option<CouchCoordinates>,
    pub isocenters: Vec<IsocenterResult>,
    pub image_details: Vec<ImageDetail>,
    pub skipped_images: Vec<String>,
}
