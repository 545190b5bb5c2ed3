//! Isocenter size per axis group.
//!
//! Gantry groups backproject every image into a beam-axis line and search for
//! the point with the smallest worst-case distance to all lines. Collimator,
//! couch and EPID groups reduce to planar spreads.

use nalgebra::{Matrix3, Vector2, Vector3};
use serde::Serialize;
use tracing::{debug, warn};

use crate::processing::analysis::ImageAnalysis;
use crate::processing::classify::AxisGroup;
use crate::processing::geometry::Line3;

/// Minimizes `max_i dist(r, line_i)` by Newton steps on a log-sum-exp
/// smoothing of the squared distances, tightening the smoothing until it is
/// negligible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinimaxSolver {
    /// Cap on Newton steps across all smoothing levels.
    pub max_iterations: usize,
    /// Newton decrement, relative to the smoothing width, at which a level is done.
    pub tolerance: f64,
}

impl Default for MinimaxSolver {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MinimaxFit {
    pub point: Vector3<f64>,
    /// Largest point-to-line distance at `point`.
    pub max_distance: f64,
    pub iterations: usize,
    /// All lines (nearly) parallel; the point is unconstrained along them.
    pub degenerate: bool,
}

impl MinimaxSolver {
    pub fn solve(&self, lines: &[Line3]) -> Option<MinimaxFit> {
        if lines.is_empty() {
            return None;
        }
        let degenerate = lines_are_parallel(lines);
        if degenerate {
            warn!(
                "{} backprojection lines are (nearly) parallel; isocenter is a best effort",
                lines.len()
            );
        }

        let mut r = least_squares_point(lines);
        let mut best = (r, worst_squared(lines, &r));
        let mut mu = best.1.max(1e-6);
        let mu_floor = 1e-12 * best.1.max(1.0);
        let mut iterations = 0;

        while iterations < self.max_iterations {
            let (value, grad, hess) = smoothed(lines, &r, mu);
            let step = newton_direction(&grad, &hess);
            let decrement = -grad.dot(&step);
            if decrement <= self.tolerance * mu {
                if mu <= mu_floor {
                    break;
                }
                mu = (mu * 0.1).max(mu_floor);
                continue;
            }

            iterations += 1;
            let mut t = 1.0;
            let mut moved = false;
            while t > 1e-12 {
                let candidate = r + step * t;
                if smoothed_value(lines, &candidate, mu) <= value - 1e-4 * t * decrement {
                    r = candidate;
                    moved = true;
                    break;
                }
                t *= 0.5;
            }
            let worst = worst_squared(lines, &r);
            if worst < best.1 {
                best = (r, worst);
            }
            if !moved {
                if mu <= mu_floor {
                    break;
                }
                mu = (mu * 0.1).max(mu_floor);
            }
        }

        debug!(
            "minimax over {} lines: {:.4} mm after {} steps",
            lines.len(),
            best.1.sqrt(),
            iterations
        );
        Some(MinimaxFit {
            point: best.0,
            max_distance: best.1.sqrt(),
            iterations,
            degenerate,
        })
    }
}

fn squared_distances(lines: &[Line3], r: &Vector3<f64>) -> Vec<f64> {
    lines.iter().map(|l| l.rejection(r).norm_squared()).collect()
}

fn worst_squared(lines: &[Line3], r: &Vector3<f64>) -> f64 {
    squared_distances(lines, r)
        .into_iter()
        .fold(0.0, f64::max)
}

fn smoothed_value(lines: &[Line3], r: &Vector3<f64>, mu: f64) -> f64 {
    let q = squared_distances(lines, r);
    let m = q.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    m + mu * q.iter().map(|qi| ((qi - m) / mu).exp()).sum::<f64>().ln()
}

/// Value, gradient and Hessian of `mu * ln(sum exp(q_i / mu))`.
fn smoothed(lines: &[Line3], r: &Vector3<f64>, mu: f64) -> (f64, Vector3<f64>, Matrix3<f64>) {
    let q = squared_distances(lines, r);
    let m = q.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = q.iter().map(|qi| ((qi - m) / mu).exp()).collect();
    let total: f64 = exps.iter().sum();
    let value = m + mu * total.ln();

    let mut grad = Vector3::zeros();
    let mut curvature = Matrix3::zeros();
    let mut outer = Matrix3::zeros();
    for (line, e) in lines.iter().zip(&exps) {
        let w = e / total;
        let g = line.rejection(r) * 2.0;
        let projector = Matrix3::identity() - line.direction * line.direction.transpose();
        grad += g * w;
        curvature += projector * (2.0 * w);
        outer += g * g.transpose() * w;
    }
    let hess = curvature + (outer - grad * grad.transpose()) / mu;
    (value, grad, hess)
}

fn newton_direction(grad: &Vector3<f64>, hess: &Matrix3<f64>) -> Vector3<f64> {
    let mut lambda = 1e-9 * (hess.trace() / 3.0).max(1.0);
    for _ in 0..10 {
        let damped = hess + Matrix3::identity() * lambda;
        if let Some(chol) = damped.cholesky() {
            return -chol.solve(grad);
        }
        lambda *= 100.0;
    }
    -grad
}

fn least_squares_point(lines: &[Line3]) -> Vector3<f64> {
    let mut a = Matrix3::zeros();
    let mut b = Vector3::zeros();
    for line in lines {
        let projector = Matrix3::identity() - line.direction * line.direction.transpose();
        a += projector;
        b += projector * line.point;
    }
    a.svd(true, true)
        .solve(&b, 1e-9)
        .unwrap_or_else(|_| Vector3::zeros())
}

fn lines_are_parallel(lines: &[Line3]) -> bool {
    let mut spread = Matrix3::zeros();
    for line in lines {
        spread += Matrix3::identity() - line.direction * line.direction.transpose();
    }
    (spread / lines.len() as f64).symmetric_eigenvalues().min() < 1e-6
}

/// Isocenter size of one axis group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IsocenterResult {
    pub group: AxisGroup,
    /// 0 when fewer than two images qualify.
    pub diameter_mm: f64,
    pub images_considered: usize,
    pub images_total: usize,
    /// Per-image distance to the group's center; `[0]` when fewer than two
    /// images qualify.
    pub deviations_mm: Vec<f64>,
    pub max_deviation_mm: f64,
    /// Solved isocenter relative to the marker, gantry groups only.
    pub center_mm: Option<[f64; 3]>,
}

impl IsocenterResult {
    fn fallback(group: AxisGroup, considered: usize, total: usize) -> Self {
        Self {
            group,
            diameter_mm: 0.0,
            images_considered: considered,
            images_total: total,
            deviations_mm: vec![0.0],
            max_deviation_mm: 0.0,
            center_mm: None,
        }
    }

    fn from_deviations(
        group: AxisGroup,
        diameter_mm: f64,
        considered: usize,
        total: usize,
        deviations_mm: Vec<f64>,
    ) -> Self {
        let max_deviation_mm = deviations_mm.iter().copied().fold(0.0, f64::max);
        Self {
            group,
            diameter_mm,
            images_considered: considered,
            images_total: total,
            deviations_mm,
            max_deviation_mm,
            center_mm: None,
        }
    }
}

/// Computes the isocenter metrics of `group` over the analyzed images.
pub fn group_isocenter(
    group: AxisGroup,
    images: &[ImageAnalysis],
    solver: &MinimaxSolver,
) -> IsocenterResult {
    let members: Vec<&ImageAnalysis> = images
        .iter()
        .filter(|img| group.contains(img.class))
        .collect();
    let total = images.len();
    if members.len() < 2 {
        debug!("{} group has {} image(s); size is 0", group, members.len());
        return IsocenterResult::fallback(group, members.len(), total);
    }

    match group {
        AxisGroup::Gantry | AxisGroup::GantryCollimator => {
            let lines: Vec<Line3> = members
                .iter()
                .map(|img| Line3::beam_axis(&img.cax_to_bb_mm, img.axes.gantry))
                .collect();
            let Some(fit) = solver.solve(&lines) else {
                return IsocenterResult::fallback(group, members.len(), total);
            };
            let deviations = lines.iter().map(|l| l.distance_to(&fit.point)).collect();
            let mut result = IsocenterResult::from_deviations(
                group,
                2.0 * fit.max_distance,
                members.len(),
                total,
                deviations,
            );
            result.center_mm = Some([fit.point.x, fit.point.y, fit.point.z]);
            result
        }
        AxisGroup::Collimator => {
            // field center relative to the marker; the marker is fixed
            let points: Vec<Vector2<f64>> = members.iter().map(|img| -img.cax_to_bb_mm).collect();
            planar_result(group, &points, total)
        }
        AxisGroup::Couch => {
            let points: Vec<Vector2<f64>> = members.iter().map(|img| img.cax_to_bb_mm).collect();
            planar_result(group, &points, total)
        }
        AxisGroup::Epid => {
            let points: Vec<Vector2<f64>> =
                members.iter().map(|img| img.cax_to_epid_mm).collect();
            let deviations = points.iter().map(|p| p.norm()).collect();
            IsocenterResult::from_deviations(
                group,
                max_pairwise_distance(&points),
                points.len(),
                total,
                deviations,
            )
        }
    }
}

fn planar_result(group: AxisGroup, points: &[Vector2<f64>], total: usize) -> IsocenterResult {
    let centroid = points.iter().sum::<Vector2<f64>>() / points.len() as f64;
    let deviations = points.iter().map(|p| (p - centroid).norm()).collect();
    IsocenterResult::from_deviations(
        group,
        max_pairwise_distance(points),
        points.len(),
        total,
        deviations,
    )
}

pub fn max_pairwise_distance(points: &[Vector2<f64>]) -> f64 {
    let mut best: f64 = 0.0;
    for (i, a) in points.iter().enumerate() {
        for b in &points[i + 1..] {
            best = best.max((a - b).norm());
        }
    }
    best
}
