use anyhow::Context;
use csv::Writer;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::processing::analysis::{ImageDetail, WinstonLutzResult};
use crate::processing::arrangement::MultiTargetResult;

/// Writes one CSV row per analyzed image, with a header.
pub fn write_image_details_csv<W: Write>(writer: W, details: &[ImageDetail]) -> anyhow::Result<()> {
    let mut wtr = Writer::from_writer(writer);
    for detail in details {
        wtr.serialize(detail)
            .with_context(|| format!("failed to write row for '{}'", detail.name))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes one CSV row per BB detection.
pub fn write_detections_csv<W: Write>(writer: W, result: &MultiTargetResult) -> anyhow::Result<()> {
    let mut wtr = Writer::from_writer(writer);
    wtr.write_record([
        "image",
        "bb",
        "gantry",
        "collimator",
        "field_center_col",
        "field_center_row",
        "bb_center_col",
        "bb_center_row",
        "cax_to_bb_u_mm",
        "cax_to_bb_v_mm",
        "distance_mm",
    ])?;
    for d in &result.detections {
        wtr.write_record(&[
            d.image.clone(),
            d.bb.clone(),
            d.gantry.to_string(),
            d.collimator.to_string(),
            d.field_center_px[0].to_string(),
            d.field_center_px[1].to_string(),
            d.bb_center_px[0].to_string(),
            d.bb_center_px[1].to_string(),
            d.cax_to_bb_mm[0].to_string(),
            d.cax_to_bb_mm[1].to_string(),
            d.distance_mm.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn result_to_json(result: &WinstonLutzResult) -> anyhow::Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize analysis result")
}

/// Writes `results.json` and `images.csv` into `output_dir`, creating it if needed.
pub fn write_results<P: AsRef<Path>>(output_dir: P, result: &WinstonLutzResult) -> anyhow::Result<()> {
    let dir = output_dir.as_ref();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;

    let json_path = dir.join("results.json");
    let mut json = BufWriter::new(
        File::create(&json_path)
            .with_context(|| format!("failed to create {}", json_path.display()))?,
    );
    json.write_all(result_to_json(result)?.as_bytes())?;
    json.flush()?;

    let csv_path = dir.join("images.csv");
    let csv_file = File::create(&csv_path)
        .with_context(|| format!("failed to create {}", csv_path.display()))?;
    write_image_details_csv(BufWriter::new(csv_file), &result.image_details)?;
    Ok(())
}
