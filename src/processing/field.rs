use nalgebra::Point2;
use tracing::debug;

use crate::io::input::PixelGrid;
use crate::processing::regions::{fill_holes, label_regions, largest_region, region_props};

/// The radiation field found in one image.
#[derive(Debug, Clone)]
pub struct FieldDetection {
    /// Field center in pixel coordinates (col, row).
    pub center: Point2<f64>,
    /// `min + (max - min) / 2` over the grid.
    pub threshold: f64,
    /// Field pixels with interior holes filled. Row-major, same size as the grid.
    pub mask: Vec<bool>,
}

/// Binarizes at the half-way intensity, keeps the largest connected region,
/// fills its holes (a dense BB can dip below the threshold) and returns the
/// centroid of the result. `None` for a flat grid.
pub fn find_field_centroid(grid: &PixelGrid) -> Option<FieldDetection> {
    let (min, max) = grid.min_max();
    if max <= min {
        debug!("flat image, no field to locate");
        return None;
    }
    let threshold = min + (max - min) / 2.0;
    let (w, h) = (grid.width(), grid.height());
    let binary: Vec<bool> = grid.data().iter().map(|&v| v >= threshold).collect();

    let (labels, n) = label_regions(&binary, w, h);
    let ones = vec![1.0; binary.len()];
    let props = region_props(&labels, n, &ones, w);
    let field_label = largest_region(&props)?.label;
    let largest: Vec<bool> = labels.iter().map(|&l| l == field_label).collect();
    let mask = fill_holes(&largest, w, h);

    let (mut count, mut sum_col, mut sum_row) = (0usize, 0.0, 0.0);
    for (idx, _) in mask.iter().enumerate().filter(|(_, m)| **m) {
        count += 1;
        sum_col += (idx % w) as f64;
        sum_row += (idx / w) as f64;
    }
    let center = Point2::new(sum_col / count as f64, sum_row / count as f64);
    debug!(
        "field center at ({:.2}, {:.2}) px, threshold {:.2}, {} px",
        center.x, center.y, threshold, count
    );
    Some(FieldDetection {
        center,
        threshold,
        mask,
    })
}

/// Open-field mode: the geometric image center stands in for the field center
/// and the whole image is searched for the BB.
pub fn open_field(grid: &PixelGrid) -> FieldDetection {
    let (min, max) = grid.min_max();
    FieldDetection {
        center: grid.center(),
        threshold: min + (max - min) / 2.0,
        mask: vec![true; grid.data().len()],
    }
}
