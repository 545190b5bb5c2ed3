//! Couch shift that moves the marker onto the radiation isocenter.

use nalgebra::{DMatrix, DVector, Vector3};
use serde::Serialize;
use tracing::debug;

use crate::processing::analysis::ImageAnalysis;
use crate::processing::geometry::{couch_rotation, image_u_axis, image_v_axis};
use crate::processing::scale::MachineScale;

/// Marker displacement from isocenter (couch frame, mm) that best explains
/// the measured offsets. Each image contributes
/// `[e_u(g)ᵀ R_z(φ); e_vᵀ R_z(φ)] b = (u, v)`; the system is solved in the
/// least-squares sense with the SVD so that a single image yields its
/// minimum-norm solution. `None` without images.
pub fn marker_displacement(images: &[ImageAnalysis]) -> Option<Vector3<f64>> {
    if images.is_empty() {
        return None;
    }
    let n = images.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 3);
    let mut y = DVector::<f64>::zeros(2 * n);
    for (i, img) in images.iter().enumerate() {
        let rot = couch_rotation(img.axes.couch);
        let u_row = rot.transpose() * image_u_axis(img.axes.gantry);
        let v_row = rot.transpose() * image_v_axis();
        for k in 0..3 {
            a[(2 * i, k)] = u_row[k];
            a[(2 * i + 1, k)] = v_row[k];
        }
        y[2 * i] = img.cax_to_bb_mm.x;
        y[2 * i + 1] = img.cax_to_bb_mm.y;
    }
    let solution = a.svd(true, true).solve(&y, 1e-9).ok()?;
    Some(Vector3::new(solution[0], solution[1], solution[2]))
}

/// Shift to apply to the couch, in the requested scale.
pub fn bb_shift_vector(images: &[ImageAnalysis], scale: MachineScale) -> Vector3<f64> {
    let shift = marker_displacement(images).map_or_else(Vector3::zeros, |b| -b);
    debug!(
        "BB shift from {} images: ({:.3}, {:.3}, {:.3}) mm",
        images.len(),
        shift.x,
        shift.y,
        shift.z
    );
    scale.vector_from_canonical(shift)
}

/// Absolute couch position after the shift, in cm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CouchCoordinates {
    pub vertical_cm: f64,
    pub longitudinal_cm: f64,
    pub lateral_cm: f64,
}

impl CouchCoordinates {
    pub fn new(vertical_cm: f64, longitudinal_cm: f64, lateral_cm: f64) -> Self {
        Self {
            vertical_cm,
            longitudinal_cm,
            lateral_cm,
        }
    }

    pub fn shifted_by(&self, shift_mm: &Vector3<f64>) -> Self {
        Self {
            vertical_cm: self.vertical_cm + shift_mm.z / 10.0,
            longitudinal_cm: self.longitudinal_cm + shift_mm.y / 10.0,
            lateral_cm: self.lateral_cm + shift_mm.x / 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShiftInstruction {
    /// (lateral, longitudinal, vertical) in mm.
    pub shift_mm: [f64; 3],
    pub text: String,
    pub new_couch_cm: Option<CouchCoordinates>,
}

impl ShiftInstruction {
    pub fn new(shift_mm: Vector3<f64>, baseline: Option<CouchCoordinates>) -> Self {
        let lateral = if shift_mm.x > 0.0 { "RIGHT" } else { "LEFT" };
        let longitudinal = if shift_mm.y > 0.0 { "IN" } else { "OUT" };
        let vertical = if shift_mm.z > 0.0 { "UP" } else { "DOWN" };
        let mut text = format!(
            "{} {:.2} mm; {} {:.2} mm; {} {:.2} mm",
            lateral,
            shift_mm.x.abs(),
            longitudinal,
            shift_mm.y.abs(),
            vertical,
            shift_mm.z.abs()
        );
        let new_couch_cm = baseline.map(|b| b.shifted_by(&shift_mm));
        if let Some(c) = &new_couch_cm {
            text.push_str(&format!(
                "\nNew couch coordinates (cm): VRT: {:.2}; LNG: {:.2}; LAT: {:.2}",
                c.vertical_cm, c.longitudinal_cm, c.lateral_cm
            ));
        }
        Self {
            shift_mm: [shift_mm.x, shift_mm.y, shift_mm.z],
            text,
            new_couch_cm,
        }
    }
}

#[cfg(test)]
mod shift_tests {
    use super::*;
    use crate::io::input::AxisReading;
    use crate::processing::classify::classify_reading;
    use crate::processing::geometry::project_marker;
    use approx::assert_relative_eq;
    use nalgebra::Vector2;

    fn measured(marker: Vector3<f64>, readings: &[AxisReading]) -> Vec<ImageAnalysis> {
        readings
            .iter()
            .map(|r| {
                let p = project_marker(&marker, r);
                ImageAnalysis {
                    name: String::new(),
                    axes: *r,
                    class: classify_reading(r),
                    field_center_px: [0.0, 0.0],
                    bb_center_px: [0.0, 0.0],
                    epid_center_px: [0.0, 0.0],
                    dpmm: 1.0,
                    cax_to_bb_mm: Vector2::new(p.x, p.y),
                    cax_to_epid_mm: Vector2::zeros(),
                }
            })
            .collect()
    }

    fn readings(list: &[(f64, f64, f64)]) -> Vec<AxisReading> {
        list.iter().map(|&(g, c, p)| AxisReading::new(g, c, p)).collect()
    }

    #[test]
    fn test_recovers_marker_from_mixed_set() {
        let marker = Vector3::new(0.4, -0.7, 0.3);
        let set = measured(
            marker,
            &readings(&[
                (0.0, 0.0, 0.0),
                (90.0, 0.0, 0.0),
                (180.0, 0.0, 0.0),
                (270.0, 0.0, 0.0),
                (0.0, 0.0, 45.0),
                (0.0, 0.0, 315.0),
            ]),
        );
        let b = marker_displacement(&set).unwrap();
        assert_relative_eq!(b, marker, epsilon = 1e-9);
        let shift = bb_shift_vector(&set, MachineScale::Iec61217);
        assert_relative_eq!(shift, -marker, epsilon = 1e-9);
    }

    #[test]
    fn test_reference_only_is_minimum_norm() {
        let set = measured(Vector3::new(1.0, 2.0, 5.0), &readings(&[(0.0, 0.0, 0.0)]));
        // the vertical component is invisible at gantry 0
        let b = marker_displacement(&set).unwrap();
        assert_relative_eq!(b, Vector3::new(1.0, 2.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_no_images_no_shift() {
        assert!(marker_displacement(&[]).is_none());
        assert_eq!(bb_shift_vector(&[], MachineScale::VarianIec), Vector3::zeros());
    }

    #[test]
    fn test_instruction_text() {
        let move_it = ShiftInstruction::new(Vector3::new(0.36, -0.21, -0.04), None);
        assert_eq!(move_it.text, "RIGHT 0.36 mm; OUT 0.21 mm; DOWN 0.04 mm");
        assert!(move_it.new_couch_cm.is_none());

        let baseline = CouchCoordinates::new(-2.0, 100.0, 1.0);
        let with_couch = ShiftInstruction::new(Vector3::new(-1.0, 2.0, 3.0), Some(baseline));
        assert!(with_couch.text.starts_with("LEFT 1.00 mm; IN 2.00 mm; UP 3.00 mm"));
        assert!(with_couch.text.contains("VRT: -1.70"));
        let c = with_couch.new_couch_cm.unwrap();
        assert_relative_eq!(c.longitudinal_cm, 100.2, epsilon = 1e-12);
        assert_relative_eq!(c.lateral_cm, 0.9, epsilon = 1e-12);
    }
}
