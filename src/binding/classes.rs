use pyo3::prelude::*;

use crate::io::input::{AxisReading, PixelGrid, ProjectionImage};
use crate::processing::analysis::{ImageDetail, WinstonLutzResult};
use crate::processing::arrangement::{BbDetection, MultiTargetResult};
use crate::processing::isocenter::IsocenterResult;

/// Python representation of a single projection image
///
/// Attributes:
///     name (str): Image name, also used to read axes from when
///         ``use_filenames`` is set
///     width (int): Number of columns
///     height (int): Number of rows
///     pixels (list[float]): Row-major pixel values, ``width * height`` long
///     pixel_spacing_mm (float): Pixel spacing at the detector in mm
///     sid_mm (float): Source to image distance in mm
///     gantry (float): Gantry angle in degrees
///     collimator (float): Collimator angle in degrees
///     couch (float): Couch angle in degrees
///
/// Example:
///     >>> img = PyProjectionImage(
///     ...     name="gantry90_coll0_couch0",
///     ...     width=3, height=2, pixels=[0.0] * 6,
///     ...     pixel_spacing_mm=0.392, sid_mm=1500.0,
///     ...     gantry=90.0
///     ... )
#[pyclass]
#[derive(Debug, Clone)]
pub struct PyProjectionImage {
    #[pyo3(get, set)]
    pub name: String,
    #[pyo3(get, set)]
    pub width: usize,
    #[pyo3(get, set)]
    pub height: usize,
    #[pyo3(get, set)]
    pub pixels: Vec<f64>,
    #[pyo3(get, set)]
    pub pixel_spacing_mm: f64,
    #[pyo3(get, set)]
    pub sid_mm: f64,
    #[pyo3(get, set)]
    pub gantry: f64,
    #[pyo3(get, set)]
    pub collimator: f64,
    #[pyo3(get, set)]
    pub couch: f64,
}

#[pymethods]
impl PyProjectionImage {
    #[new]
    #[pyo3(signature = (
        name,
        width,
        height,
        pixels,
        pixel_spacing_mm,
        sid_mm = 1000.0f64,
        gantry = 0.0f64,
        collimator = 0.0f64,
        couch = 0.0f64
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        name: String,
        width: usize,
        height: usize,
        pixels: Vec<f64>,
        pixel_spacing_mm: f64,
        sid_mm: f64,
        gantry: f64,
        collimator: f64,
        couch: f64,
    ) -> Self {
        Self {
            name,
            width,
            height,
            pixels,
            pixel_spacing_mm,
            sid_mm,
            gantry,
            collimator,
            couch,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "ProjectionImage(name='{}', {}x{}, gantry={:.1}, coll={:.1}, couch={:.1})",
            self.name, self.width, self.height, self.gantry, self.collimator, self.couch
        )
    }
}

impl PyProjectionImage {
    pub fn to_rust(&self) -> anyhow::Result<ProjectionImage> {
        let grid = PixelGrid::new(self.width, self.height, self.pixels.clone())?;
        Ok(ProjectionImage::new(
            self.name.clone(),
            grid,
            self.pixel_spacing_mm,
            self.sid_mm,
            AxisReading::new(self.gantry, self.collimator, self.couch),
        ))
    }
}

/// Per-image outcome of an analysis
///
/// Attributes:
///     name (str): Image name
///     gantry, collimator, couch (float): Axes in the configured machine scale
///     image_class (str): Axis class, e.g. ``"Gantry"`` or ``"Reference"``
///     field_center (tuple[float, float]): Field centroid (col, row) in pixels
///     bb_center (tuple[float, float]): BB centroid (col, row) in pixels
///     cax_to_bb_mm (float): Field center to BB distance at isocenter
///     cax_to_epid_mm (float): Field center to imager center distance
#[pyclass]
#[derive(Debug, Clone)]
pub struct PyImageResult {
    #[pyo3(get)]
    pub name: String,
    #[pyo3(get)]
    pub gantry: f64,
    #[pyo3(get)]
    pub collimator: f64,
    #[pyo3(get)]
    pub couch: f64,
    #[pyo3(get)]
    pub image_class: String,
    #[pyo3(get)]
    pub field_center: (f64, f64),
    #[pyo3(get)]
    pub bb_center: (f64, f64),
    #[pyo3(get)]
    pub cax_to_bb_mm: f64,
    #[pyo3(get)]
    pub cax_to_epid_mm: f64,
}

#[pymethods]
impl PyImageResult {
    fn __repr__(&self) -> String {
        format!(
            "ImageResult(name='{}', class={}, cax_to_bb={:.2} mm)",
            self.name, self.image_class, self.cax_to_bb_mm
        )
    }
}

impl From<&ImageDetail> for PyImageResult {
    fn from(d: &ImageDetail) -> Self {
        Self {
            name: d.name.clone(),
            gantry: d.gantry,
            collimator: d.collimator,
            couch: d.couch,
            image_class: d.class.clone(),
            field_center: (d.field_center_col, d.field_center_row),
            bb_center: (d.bb_center_col, d.bb_center_row),
            cax_to_bb_mm: d.cax_to_bb_mm,
            cax_to_epid_mm: d.cax_to_epid_mm,
        }
    }
}

/// Isocenter size of one axis group
#[pyclass]
#[derive(Debug, Clone)]
pub struct PyIsocenter {
    #[pyo3(get)]
    pub group: String,
    #[pyo3(get)]
    pub diameter_mm: f64,
    #[pyo3(get)]
    pub images_considered: usize,
    #[pyo3(get)]
    pub deviations_mm: Vec<f64>,
    #[pyo3(get)]
    pub max_deviation_mm: f64,
}

#[pymethods]
impl PyIsocenter {
    fn __repr__(&self) -> String {
        format!(
            "Isocenter(group={}, diameter={:.2} mm, images={})",
            self.group, self.diameter_mm, self.images_considered
        )
    }
}

impl From<&IsocenterResult> for PyIsocenter {
    fn from(r: &IsocenterResult) -> Self {
        Self {
            group: r.group.to_string(),
            diameter_mm: r.diameter_mm,
            images_considered: r.images_considered,
            deviations_mm: r.deviations_mm.clone(),
            max_deviation_mm: r.max_deviation_mm,
        }
    }
}

/// Aggregate result of a Winston-Lutz analysis
///
/// Attributes:
///     machine_scale (str): Convention the axes are reported in
///     num_total_images (int): Images handed in
///     num_skipped_images (int): Images where no BB was found
///     max_2d_cax_to_bb_mm, median_2d_cax_to_bb_mm, mean_2d_cax_to_bb_mm (float)
///     gantry_3d_iso_diameter_mm (float): Smallest sphere diameter touching
///         every gantry-group beam axis
///     gantry_coll_3d_iso_diameter_mm (float)
///     coll_2d_iso_diameter_mm, couch_2d_iso_diameter_mm (float)
///     bb_shift_vector (tuple[float, float, float]): Shift in mm that moves
///         the BB onto the isocenter
///     bb_shift_instruction (str): Human readable shift
///     new_couch_cm (tuple[float, float, float] | None): Vertical,
///         longitudinal and lateral couch position after the shift
///     isocenters (list[PyIsocenter]): One entry per axis group
///     images (list[PyImageResult]): Per-image details
///     skipped_images (list[str]): Names of images without a BB
///     json (str): Whole result serialized as JSON
#[pyclass]
#[derive(Debug, Clone)]
pub struct PyWinstonLutzResult {
    #[pyo3(get)]
    pub machine_scale: String,
    #[pyo3(get)]
    pub num_total_images: usize,
    #[pyo3(get)]
    pub num_skipped_images: usize,
    #[pyo3(get)]
    pub max_2d_cax_to_bb_mm: f64,
    #[pyo3(get)]
    pub median_2d_cax_to_bb_mm: f64,
    #[pyo3(get)]
    pub mean_2d_cax_to_bb_mm: f64,
    #[pyo3(get)]
    pub max_2d_cax_to_epid_mm: f64,
    #[pyo3(get)]
    pub gantry_3d_iso_diameter_mm: f64,
    #[pyo3(get)]
    pub gantry_coll_3d_iso_diameter_mm: f64,
    #[pyo3(get)]
    pub coll_2d_iso_diameter_mm: f64,
    #[pyo3(get)]
    pub couch_2d_iso_diameter_mm: f64,
    #[pyo3(get)]
    pub bb_shift_vector: (f64, f64, f64),
    #[pyo3(get)]
    pub bb_shift_instruction: String,
    #[pyo3(get)]
    pub new_couch_cm: Option<(f64, f64, f64)>,
    #[pyo3(get)]
    pub isocenters: Vec<PyIsocenter>,
    #[pyo3(get)]
    pub images: Vec<PyImageResult>,
    #[pyo3(get)]
    pub skipped_images: Vec<String>,
    #[pyo3(get)]
    pub json: String,
}

#[pymethods]
impl PyWinstonLutzResult {
    fn __repr__(&self) -> String {
        format!(
            "WinstonLutzResult(images={}, gantry_iso={:.2} mm, max_cax_to_bb={:.2} mm)",
            self.num_total_images, self.gantry_3d_iso_diameter_mm, self.max_2d_cax_to_bb_mm
        )
    }

    fn __str__(&self) -> String {
        format!(
            "{}\nShift: {}",
            self.__repr__(),
            self.bb_shift_instruction
        )
    }
}

impl From<WinstonLutzResult> for PyWinstonLutzResult {
    fn from(r: WinstonLutzResult) -> Self {
        let json = serde_json::to_string(&r).unwrap_or_default();
        Self {
            machine_scale: r.machine_scale.to_string(),
            num_total_images: r.num_total_images,
            num_skipped_images: r.num_skipped_images,
            max_2d_cax_to_bb_mm: r.max_2d_cax_to_bb_mm,
            median_2d_cax_to_bb_mm: r.median_2d_cax_to_bb_mm,
            mean_2d_cax_to_bb_mm: r.mean_2d_cax_to_bb_mm,
            max_2d_cax_to_epid_mm: r.max_2d_cax_to_epid_mm,
            gantry_3d_iso_diameter_mm: r.gantry_3d_iso_diameter_mm,
            gantry_coll_3d_iso_diameter_mm: r.gantry_coll_3d_iso_diameter_mm,
            coll_2d_iso_diameter_mm: r.coll_2d_iso_diameter_mm,
            couch_2d_iso_diameter_mm: r.couch_2d_iso_diameter_mm,
            bb_shift_vector: (
                r.bb_shift_vector_mm[0],
                r.bb_shift_vector_mm[1],
                r.bb_shift_vector_mm[2],
            ),
            bb_shift_instruction: r.bb_shift_instruction.clone(),
            new_couch_cm: r
                .new_couch_cm
                .map(|c| (c.vertical_cm, c.longitudinal_cm, c.lateral_cm)),
            isocenters: r.isocenters.iter().map(PyIsocenter::from).collect(),
            images: r.image_details.iter().map(PyImageResult::from).collect(),
            skipped_images: r.skipped_images.clone(),
            json,
        }
    }
}

/// One BB found in one image of a multi-target run
#[pyclass]
#[derive(Debug, Clone)]
pub struct PyBbDetection {
    #[pyo3(get)]
    pub image: String,
    #[pyo3(get)]
    pub bb: String,
    #[pyo3(get)]
    pub gantry: f64,
    #[pyo3(get)]
    pub collimator: f64,
    #[pyo3(get)]
    pub bb_center: (f64, f64),
    #[pyo3(get)]
    pub cax_to_bb_mm: (f64, f64),
    #[pyo3(get)]
    pub distance_mm: f64,
}

#[pymethods]
impl PyBbDetection {
    fn __repr__(&self) -> String {
        format!(
            "BbDetection(image='{}', bb='{}', distance={:.2} mm)",
            self.image, self.bb, self.distance_mm
        )
    }
}

impl From<&BbDetection> for PyBbDetection {
    fn from(d: &BbDetection) -> Self {
        Self {
            image: d.image.clone(),
            bb: d.bb.clone(),
            gantry: d.gantry,
            collimator: d.collimator,
            bb_center: (d.bb_center_px[0], d.bb_center_px[1]),
            cax_to_bb_mm: (d.cax_to_bb_mm[0], d.cax_to_bb_mm[1]),
            distance_mm: d.distance_mm,
        }
    }
}

/// Result of a multi-target analysis
///
/// Attributes:
///     detections (list[PyBbDetection]): Every BB found
///     excluded_images (list[str]): Images left out because the couch was rotated
///     missing (list[tuple[str, str]]): (image, bb) pairs where the BB was not found
///     max_distance_mm, median_distance_mm, mean_distance_mm (float)
#[pyclass]
#[derive(Debug, Clone)]
pub struct PyMultiTargetResult {
    #[pyo3(get)]
    pub detections: Vec<PyBbDetection>,
    #[pyo3(get)]
    pub excluded_images: Vec<String>,
    #[pyo3(get)]
    pub missing: Vec<(String, String)>,
    #[pyo3(get)]
    pub max_distance_mm: f64,
    #[pyo3(get)]
    pub median_distance_mm: f64,
    #[pyo3(get)]
    pub mean_distance_mm: f64,
}

#[pymethods]
impl PyMultiTargetResult {
    fn __repr__(&self) -> String {
        format!(
            "MultiTargetResult(detections={}, missing={}, max={:.2} mm)",
            self.detections.len(),
            self.missing.len(),
            self.max_distance_mm
        )
    }
}

impl From<MultiTargetResult> for PyMultiTargetResult {
    fn from(r: MultiTargetResult) -> Self {
        Self {
            detections: r.detections.iter().map(PyBbDetection::from).collect(),
            excluded_images: r.excluded_images,
            missing: r.missing,
            max_distance_mm: r.max_distance_mm,
            median_distance_mm: r.median_distance_mm,
            mean_distance_mm: r.mean_distance_mm,
        }
    }
}
