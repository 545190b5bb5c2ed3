//! Room-frame geometry in the IEC 61217 fixed system.
//!
//! x points right (facing the gantry), y toward the gantry, z up. An image
//! offset `(u, v)` runs along the image columns and rows respectively.

use nalgebra::{Rotation3, Vector2, Vector3};

use crate::io::input::AxisReading;

/// Direction of increasing image column, in room coordinates.
pub fn image_u_axis(gantry_deg: f64) -> Vector3<f64> {
    let g = gantry_deg.to_radians();
    Vector3::new(g.cos(), 0.0, -g.sin())
}

/// Direction of increasing image row. Independent of the gantry angle.
pub fn image_v_axis() -> Vector3<f64> {
    Vector3::new(0.0, 1.0, 0.0)
}

/// Unit vector from isocenter toward the source.
pub fn source_direction(gantry_deg: f64) -> Vector3<f64> {
    let g = gantry_deg.to_radians();
    Vector3::new(g.sin(), 0.0, g.cos())
}

/// Couch rotation about the vertical axis through isocenter.
pub fn couch_rotation(couch_deg: f64) -> Rotation3<f64> {
    Rotation3::from_axis_angle(&Vector3::z_axis(), couch_deg.to_radians())
}

/// Unmagnified image offset of a marker sitting at `marker` (couch frame)
/// for the given canonical reading.
pub fn project_marker(marker: &Vector3<f64>, reading: &AxisReading) -> Vector2<f64> {
    let p = couch_rotation(reading.couch) * marker;
    Vector2::new(p.dot(&image_u_axis(reading.gantry)), p.dot(&image_v_axis()))
}

/// Distance of a marker toward the source, used for magnification.
fn toward_source(offset_left: f64, offset_up: f64, gantry_deg: f64) -> f64 {
    let g = gantry_deg.to_radians();
    offset_up * g.cos() - offset_left * g.sin()
}

/// Longitudinal (row) position of a marker projected onto the isocenter
/// plane, including magnification.
pub fn bb_projection_long(
    offset_in: f64,
    offset_up: f64,
    offset_left: f64,
    sad: f64,
    gantry_deg: f64,
) -> f64 {
    let d = toward_source(offset_left, offset_up, gantry_deg);
    offset_in + offset_in * d / sad
}

/// In-plane (column) position of a marker projected onto the isocenter
/// plane, including magnification.
pub fn bb_projection_gantry_plane(
    offset_left: f64,
    offset_up: f64,
    sad: f64,
    gantry_deg: f64,
) -> f64 {
    let g = gantry_deg.to_radians();
    let base = -offset_left * g.cos() - offset_up * g.sin();
    let d = toward_source(offset_left, offset_up, gantry_deg);
    base + base * d / sad
}

/// An infinite line in room coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line3 {
    pub point: Vector3<f64>,
    /// Unit direction.
    pub direction: Vector3<f64>,
}

impl Line3 {
    pub fn new(point: Vector3<f64>, direction: Vector3<f64>) -> Self {
        Self {
            point,
            direction: direction.normalize(),
        }
    }

    /// Beam axis of one image expressed relative to the marker: the field
    /// center sits at `-(u, v)` from the marker in the image plane and the
    /// axis runs toward the source.
    pub fn beam_axis(offset: &Vector2<f64>, gantry_deg: f64) -> Self {
        let point = -(image_u_axis(gantry_deg) * offset.x + image_v_axis() * offset.y);
        Self::new(point, source_direction(gantry_deg))
    }

    /// Perpendicular component of `p - point`.
    pub fn rejection(&self, p: &Vector3<f64>) -> Vector3<f64> {
        let r = p - self.point;
        r - self.direction * self.direction.dot(&r)
    }

    pub fn distance_to(&self, p: &Vector3<f64>) -> f64 {
        self.rejection(p).norm()
    }
}
