pub mod classes;

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use std::path::PathBuf;

use crate::entry::{run_analysis, run_analysis_from_files, run_multi_target_from_files};
use crate::io::config::AnalysisConfig;
use crate::io::output::write_results;
use crate::processing::shift::CouchCoordinates;
use classes::{PyMultiTargetResult, PyProjectionImage, PyWinstonLutzResult};

#[allow(clippy::too_many_arguments)]
fn build_config(
    bb_size_mm: f64,
    low_density_bb: bool,
    open_field: bool,
    machine_scale: &str,
    search_radius_mm: f64,
    sad_mm: f64,
    use_filenames: bool,
) -> PyResult<AnalysisConfig> {
    let config = AnalysisConfig {
        bb_size_mm,
        low_density_bb,
        open_field,
        machine_scale: machine_scale
            .parse()
            .map_err(|e: crate::error::WlError| PyValueError::new_err(e.to_string()))?,
        search_radius_mm,
        sad_mm,
        use_filenames,
        ..AnalysisConfig::default()
    };
    config
        .validate()
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    Ok(config)
}

/// Runs a Winston-Lutz analysis on in-memory images.
///
/// Args:
///     images (list[PyProjectionImage]): At least two images
///     bb_size_mm (float): Nominal BB diameter
///     low_density_bb (bool): The BB attenuates less than its surroundings
///     open_field (bool): Use the image center instead of a detected field
///     machine_scale (str): ``"iec61217"`` or ``"varian_iec"``
///     search_radius_mm (float): Max distance of the BB from the field center
///     sad_mm (float): Source to axis distance
///     use_filenames (bool): Read axes from the image names
///     couch_vertical_cm, couch_longitudinal_cm, couch_lateral_cm (float | None):
///         Current couch position; when all three are given the shift
///         instruction also lists the new couch coordinates
///     output_dir (str | None): Writes ``results.json`` and ``images.csv`` here
///
/// Returns:
///     PyWinstonLutzResult
///
/// Example:
///     >>> import wlcore
///     >>> result = wlcore.analyze(images, bb_size_mm=8.0)
///     >>> result.gantry_3d_iso_diameter_mm
#[pyfunction]
#[pyo3(signature = (
    images,
    bb_size_mm = 5.0f64,
    low_density_bb = false,
    open_field = false,
    machine_scale = "iec61217",
    search_radius_mm = 5.0f64,
    sad_mm = 1000.0f64,
    use_filenames = false,
    couch_vertical_cm = None,
    couch_longitudinal_cm = None,
    couch_lateral_cm = None,
    output_dir = None
))]
#[allow(clippy::too_many_arguments)]
pub fn analyze(
    images: Vec<PyProjectionImage>,
    bb_size_mm: f64,
    low_density_bb: bool,
    open_field: bool,
    machine_scale: &str,
    search_radius_mm: f64,
    sad_mm: f64,
    use_filenames: bool,
    couch_vertical_cm: Option<f64>,
    couch_longitudinal_cm: Option<f64>,
    couch_lateral_cm: Option<f64>,
    output_dir: Option<PathBuf>,
) -> PyResult<PyWinstonLutzResult> {
    let config = build_config(
        bb_size_mm,
        low_density_bb,
        open_field,
        machine_scale,
        search_radius_mm,
        sad_mm,
        use_filenames,
    )?;
    let rust_images = images
        .iter()
        .map(PyProjectionImage::to_rust)
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    let baseline = match (couch_vertical_cm, couch_longitudinal_cm, couch_lateral_cm) {
        (Some(v), Some(l), Some(lat)) => Some(CouchCoordinates::new(v, l, lat)),
        _ => None,
    };

    let result = run_analysis(&rust_images, &config, None, baseline)
        .map_err(|e| PyRuntimeError::new_err(format!("{:#}", e)))?;
    if let Some(dir) = output_dir {
        write_results(&dir, &result).map_err(|e| PyRuntimeError::new_err(format!("{:#}", e)))?;
    }
    Ok(result.into())
}

/// Runs a Winston-Lutz analysis on image files (PNG, TIFF, ...).
///
/// Without ``config_path`` the axes are read from the file names, e.g.
/// ``gantry90_coll0_couch0.png``.
///
/// Args:
///     paths (list[str]): Image files
///     pixel_spacing_mm (float): Detector pixel spacing
///     sid_mm (float): Source to image distance
///     config_path (str | None): TOML analysis config
///     output_dir (str | None): Writes ``results.json`` and ``images.csv`` here
///
/// Returns:
///     PyWinstonLutzResult
#[pyfunction]
#[pyo3(signature = (
    paths,
    pixel_spacing_mm,
    sid_mm = 1000.0f64,
    config_path = None,
    output_dir = None
))]
pub fn analyze_files(
    paths: Vec<PathBuf>,
    pixel_spacing_mm: f64,
    sid_mm: f64,
    config_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
) -> PyResult<PyWinstonLutzResult> {
    let result = run_analysis_from_files(
        &paths,
        pixel_spacing_mm,
        sid_mm,
        config_path.as_deref(),
        output_dir.as_deref(),
    )
    .map_err(|e| PyRuntimeError::new_err(format!("{:#}", e)))?;
    Ok(result.into())
}

/// Finds every BB of a multi-target phantom in each image.
///
/// Args:
///     paths (list[str]): Image files, axes encoded in the file names
///     arrangement_path (str): TOML file with one ``[bbs.<name>]`` table per BB
///     pixel_spacing_mm (float): Detector pixel spacing
///     sid_mm (float): Source to image distance
///     config_path (str | None): TOML analysis config
///     output_dir (str | None): Writes ``detections.csv`` here
///
/// Returns:
///     PyMultiTargetResult
#[pyfunction]
#[pyo3(signature = (
    paths,
    arrangement_path,
    pixel_spacing_mm,
    sid_mm = 1000.0f64,
    config_path = None,
    output_dir = None
))]
pub fn analyze_multi_target_files(
    paths: Vec<PathBuf>,
    arrangement_path: PathBuf,
    pixel_spacing_mm: f64,
    sid_mm: f64,
    config_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
) -> PyResult<PyMultiTargetResult> {
    let result = run_multi_target_from_files(
        &paths,
        pixel_spacing_mm,
        sid_mm,
        &arrangement_path,
        config_path.as_deref(),
        output_dir.as_deref(),
    )
    .map_err(|e| PyRuntimeError::new_err(format!("{:#}", e)))?;
    Ok(result.into())
}
