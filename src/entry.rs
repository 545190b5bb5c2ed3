use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::io::config::AnalysisConfig;
use crate::io::input::{AxisMapping, ProjectionImage};
use crate::io::output::{write_detections_csv, write_results};
use crate::io::load_projection_images;
use crate::processing::analysis::{WinstonLutz, WinstonLutzResult};
use crate::processing::arrangement::{analyze_multi_target, BbArrangement, MultiTargetResult};
use crate::processing::shift::CouchCoordinates;

/// Analyzes in-memory images and returns the flat result record.
pub fn run_analysis(
    images: &[ProjectionImage],
    config: &AnalysisConfig,
    mapping: Option<&AxisMapping>,
    couch_baseline: Option<CouchCoordinates>,
) -> Result<WinstonLutzResult> {
    let wl = WinstonLutz::analyze(images, config, mapping).context("Winston-Lutz analysis failed")?;
    Ok(wl.results_data_with_couch(couch_baseline))
}

/// Raster files carry no axis metadata, so without a config file the axes
/// are read from the file names.
fn load_config(config_path: Option<&Path>) -> Result<AnalysisConfig> {
    match config_path {
        Some(path) => AnalysisConfig::from_toml_file(path),
        None => Ok(AnalysisConfig {
            use_filenames: true,
            ..AnalysisConfig::default()
        }),
    }
}

/// Loads image files, analyzes them and optionally writes `results.json` and
/// `images.csv` to `output_dir`.
pub fn run_analysis_from_files<P: AsRef<Path>>(
    paths: &[P],
    pixel_spacing_mm: f64,
    sid_mm: f64,
    config_path: Option<&Path>,
    output_dir: Option<&Path>,
) -> Result<WinstonLutzResult> {
    let config = load_config(config_path)?;
    let images = load_projection_images(paths, pixel_spacing_mm, sid_mm)?;
    info!("loaded {} images", images.len());
    let result = run_analysis(&images, &config, None, None)?;
    if let Some(dir) = output_dir {
        write_results(dir, &result)
            .with_context(|| format!("writing results to {} failed", dir.display()))?;
    }
    Ok(result)
}

/// Multi-target counterpart of [`run_analysis_from_files`]; writes
/// `detections.csv` when `output_dir` is given.
pub fn run_multi_target_from_files<P: AsRef<Path>>(
    paths: &[P],
    pixel_spacing_mm: f64,
    sid_mm: f64,
    arrangement_path: &Path,
    config_path: Option<&Path>,
    output_dir: Option<&Path>,
) -> Result<MultiTargetResult> {
    let config = load_config(config_path)?;
    let arrangement = BbArrangement::from_toml_file(arrangement_path)?;
    let images = load_projection_images(paths, pixel_spacing_mm, sid_mm)?;
    let result = analyze_multi_target(&images, &arrangement, &config, None)
        .context("multi-target analysis failed")?;
    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        let file = std::fs::File::create(dir.join("detections.csv"))
            .with_context(|| format!("failed to create detections.csv in {}", dir.display()))?;
        write_detections_csv(std::io::BufWriter::new(file), &result)?;
    }
    Ok(result)
}
