//! BB search by a descending upper-threshold sweep.

use nalgebra::Point2;
use std::f64::consts::PI;
use tracing::{debug, trace};

use crate::io::input::PixelGrid;
use crate::processing::field::FieldDetection;
use crate::processing::regions::{label_regions, region_props, RegionProps};

/// Parameters of one BB search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerSearch {
    pub bb_size_mm: f64,
    /// Pixels per mm at the isocenter plane.
    pub dpmm: f64,
    pub low_density: bool,
    pub search_radius_mm: f64,
    /// Threshold decrement as a fraction of the in-field signal range.
    pub threshold_step_fraction: f64,
    pub max_iterations: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerDetection {
    /// Weighted BB centroid in pixel coordinates (col, row).
    pub center: Point2<f64>,
    pub upper_threshold: f64,
    pub iteration: usize,
    pub area_px: usize,
}

enum SearchState {
    Searching,
    Found(MarkerDetection),
}

/// Lowers the upper threshold from the in-field signal maximum in fixed steps
/// until a region inside the field is round, BB-sized and within the search
/// radius of `nominal`. Among several such regions in one step the one
/// closest to `nominal` wins. The last threshold is clamped to the in-field
/// minimum. `None` once the sweep is exhausted.
pub fn find_marker(
    grid: &PixelGrid,
    field: &FieldDetection,
    nominal: Point2<f64>,
    search: &MarkerSearch,
) -> Option<MarkerDetection> {
    let (min, max) = grid.min_max();
    if max <= min {
        return None;
    }
    // low-density BBs are brighter than the field: flip them so the sweep
    // always isolates the darkest structure first
    let signal: Vec<f64> = if search.low_density {
        grid.data().iter().map(|&v| max + min - v).collect()
    } else {
        grid.data().to_vec()
    };
    let weights: Vec<f64> = signal.iter().map(|&s| max + min - s).collect();

    let (lo, hi) = signal
        .iter()
        .zip(&field.mask)
        .filter(|(_, in_field)| **in_field)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (&s, _)| {
            (lo.min(s), hi.max(s))
        });
    let range = hi - lo;
    if !range.is_finite() || range <= 0.0 {
        debug!("flat signal inside the field, no BB to isolate");
        return None;
    }
    let step = range * search.threshold_step_fraction;

    let outcome = (0..search.max_iterations)
        .take_while(|&i| step * (i as f64) < range + 0.5 * step)
        .map(|i| (i, (hi - step * i as f64).max(lo)))
        .fold(SearchState::Searching, |state, (iteration, upper)| match state {
            SearchState::Found(_) => state,
            SearchState::Searching => {
                match best_candidate(grid, field, &signal, &weights, upper, nominal, search) {
                    Some(region) => SearchState::Found(MarkerDetection {
                        center: region.weighted_centroid,
                        upper_threshold: upper,
                        iteration,
                        area_px: region.area,
                    }),
                    None => SearchState::Searching,
                }
            }
        });

    match outcome {
        SearchState::Found(detection) => {
            debug!(
                "BB at ({:.2}, {:.2}) px after {} threshold steps",
                detection.center.x, detection.center.y, detection.iteration
            );
            Some(detection)
        }
        SearchState::Searching => None,
    }
}

fn best_candidate(
    grid: &PixelGrid,
    field: &FieldDetection,
    signal: &[f64],
    weights: &[f64],
    upper: f64,
    nominal: Point2<f64>,
    search: &MarkerSearch,
) -> Option<RegionProps> {
    let (w, h) = (grid.width(), grid.height());
    let band: Vec<bool> = signal
        .iter()
        .zip(&field.mask)
        .map(|(&s, &in_field)| in_field && s <= upper)
        .collect();
    let (labels, n) = label_regions(&band, w, h);
    let max_dist_px = search.search_radius_mm * search.dpmm;

    let mut accepted: Vec<(f64, RegionProps)> = region_props(&labels, n, weights, w)
        .into_iter()
        .filter(|r| is_round(r))
        .filter(|r| is_right_size(r, search.dpmm, search.bb_size_mm))
        .map(|r| ((r.weighted_centroid - nominal).norm(), r))
        .filter(|(dist, _)| *dist <= max_dist_px)
        .collect();
    trace!("upper {:.2}: {} of {} regions accepted", upper, accepted.len(), n);
    accepted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    accepted.into_iter().next().map(|(_, r)| r)
}

/// Filled area over bounding-box area within 20 % of a disc's π/4.
pub fn is_round(region: &RegionProps) -> bool {
    let expected = PI / 4.0;
    let actual = region.fill_ratio();
    actual > expected * 0.8 && actual < expected * 1.2
}

/// Area between a BB 2 mm smaller and 2 mm larger than nominal, with a 1.5x
/// allowance either way.
pub fn is_right_size(region: &RegionProps, dpmm: f64, bb_size_mm: f64) -> bool {
    let area_mm2 = region.filled_area as f64 / (dpmm * dpmm);
    let bb = bb_size_mm.max(2.1);
    let larger = PI * ((bb + 2.0) / 2.0).powi(2);
    let smaller = (PI * ((bb - 2.0) / 2.0).powi(2)).max(2.0);
    area_mm2 > smaller / 1.5 && area_mm2 < larger * 1.5
}

#[cfg(test)]
mod marker_tests {
    use super::*;
    use crate::io::config::AnalysisConfig;
    use crate::processing::field::{find_field_centroid, open_field};
    use crate::utils::test_utils::{add_salt_and_pepper, synthetic_image, SyntheticImage};
    use approx::assert_relative_eq;

    fn search_for(spec: &SyntheticImage) -> MarkerSearch {
        let config = AnalysisConfig {
            low_density_bb: spec.bb_signal > 1.0,
            ..AnalysisConfig::default()
        };
        config.marker_search(spec.bb_diameter_mm, spec.dpmm)
    }

    fn locate(spec: &SyntheticImage) -> Option<MarkerDetection> {
        let img = synthetic_image(spec);
        let field = find_field_centroid(&img.pixels).unwrap();
        find_marker(&img.pixels, &field, field.center, &search_for(spec))
    }

    #[test]
    fn test_centered_bb() {
        let spec = SyntheticImage::default();
        let found = locate(&spec).unwrap();
        assert_relative_eq!(found.center.x, 80.0, epsilon = 1e-9);
        assert_relative_eq!(found.center.y, 80.0, epsilon = 1e-9);
        assert_eq!(found.iteration, 1);
    }

    #[test]
    fn test_offset_bb() {
        let spec = SyntheticImage {
            bb_offset_mm: (1.0, -0.5),
            ..SyntheticImage::default()
        };
        let found = locate(&spec).unwrap();
        assert_relative_eq!(found.center.x, 84.0, epsilon = 1e-9);
        assert_relative_eq!(found.center.y, 78.0, epsilon = 1e-9);
    }

    #[test]
    fn test_low_density_bb_needs_flag() {
        let spec = SyntheticImage {
            bb_signal: 1.2,
            bb_offset_mm: (0.0, 2.0),
            ..SyntheticImage::default()
        };
        let found = locate(&spec).unwrap();
        assert_relative_eq!(found.center.x, 80.0, epsilon = 1e-9);
        assert_relative_eq!(found.center.y, 88.0, epsilon = 1e-9);

        let img = synthetic_image(&spec);
        let field = find_field_centroid(&img.pixels).unwrap();
        let dense = MarkerSearch {
            low_density: false,
            ..search_for(&spec)
        };
        assert!(find_marker(&img.pixels, &field, field.center, &dense).is_none());
    }

    #[test]
    fn test_bb_outside_search_radius_is_rejected() {
        // the only round region in the image, but 6 mm from the field center
        let spec = SyntheticImage {
            bb_offset_mm: (6.0, 0.0),
            ..SyntheticImage::default()
        };
        assert!(locate(&spec).is_none());

        let inside = SyntheticImage {
            bb_offset_mm: (4.75, 0.0),
            ..SyntheticImage::default()
        };
        assert!(locate(&inside).is_some());
    }

    #[test]
    fn test_closest_candidate_wins() {
        let spec = SyntheticImage {
            bb_diameter_mm: 3.0,
            bb_offset_mm: (3.0, 0.0),
            ..SyntheticImage::default()
        };
        let mut img = synthetic_image(&spec);
        // second identical BB on the other side, nearer the nominal point
        let mut data = img.pixels.data().to_vec();
        for row in 0..img.pixels.height() {
            for col in 0..img.pixels.width() {
                let dc = col as f64 - 72.0;
                let dr = row as f64 - 80.0;
                if dc * dc + dr * dr <= 36.0 {
                    data[row * img.pixels.width() + col] = 800.0;
                }
            }
        }
        img.pixels = PixelGrid::new(img.pixels.width(), img.pixels.height(), data).unwrap();
        let field = find_field_centroid(&img.pixels).unwrap();
        let found = find_marker(&img.pixels, &field, field.center, &search_for(&spec)).unwrap();
        assert_relative_eq!(found.center.x, 72.0, epsilon = 1e-9);
    }

    #[test]
    fn test_no_bb_is_not_found() {
        let spec = SyntheticImage {
            bb_signal: 1.0,
            ..SyntheticImage::default()
        };
        assert!(locate(&spec).is_none());
    }

    #[test]
    fn test_noisy_bb_close_to_truth() {
        let spec = SyntheticImage {
            bb_diameter_mm: 5.0,
            ..SyntheticImage::default()
        };
        let mut img = synthetic_image(&spec);
        add_salt_and_pepper(&mut img, 0.01, 11);
        let field = find_field_centroid(&img.pixels).unwrap();
        let found = find_marker(&img.pixels, &field, field.center, &search_for(&spec)).unwrap();
        assert!((found.center.x - 80.0).abs() < 0.5);
        assert!((found.center.y - 80.0).abs() < 0.5);
    }

    #[test]
    fn test_open_field_search() {
        let spec = SyntheticImage {
            field_size_mm: 100.0,
            bb_offset_mm: (-2.0, 0.0),
            ..SyntheticImage::default()
        };
        let img = synthetic_image(&spec);
        let field = open_field(&img.pixels);
        let found = find_marker(&img.pixels, &field, field.center, &search_for(&spec)).unwrap();
        assert_relative_eq!(found.center.x, 72.0, epsilon = 1e-9);
    }

    #[test]
    fn test_low_contrast_dense_bb() {
        for bb_signal in [0.99, 0.97] {
            let spec = SyntheticImage {
                bb_signal,
                bb_offset_mm: (-1.0, 0.5),
                ..SyntheticImage::default()
            };
            let found = locate(&spec).unwrap();
            assert_relative_eq!(found.center.x, 76.0, epsilon = 1e-9);
            assert_relative_eq!(found.center.y, 82.0, epsilon = 1e-9);
            assert_eq!(found.iteration, 1);
        }
    }

    #[test]
    fn test_low_contrast_low_density_bb() {
        for bb_signal in [1.02, 1.03] {
            let spec = SyntheticImage {
                bb_signal,
                bb_offset_mm: (0.0, -1.5),
                ..SyntheticImage::default()
            };
            let found = locate(&spec).unwrap();
            assert_relative_eq!(found.center.x, 80.0, epsilon = 1e-9);
            assert_relative_eq!(found.center.y, 74.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_sweep_ends_at_in_field_minimum() {
        // a 12 mm square just 1 above the BB hides it until the last threshold
        let spec = SyntheticImage::default();
        let mut img = synthetic_image(&spec);
        let width = img.pixels.width();
        let mut data = img.pixels.data().to_vec();
        for row in 0..img.pixels.height() {
            for col in 0..width {
                let idx = row * width + col;
                let in_square = (col as f64 - 80.0).abs() < 24.0 && (row as f64 - 80.0).abs() < 24.0;
                if in_square && data[idx] > 800.0 {
                    data[idx] = 801.0;
                }
            }
        }
        img.pixels = PixelGrid::new(width, img.pixels.height(), data).unwrap();
        let field = find_field_centroid(&img.pixels).unwrap();
        let found = find_marker(&img.pixels, &field, field.center, &search_for(&spec)).unwrap();
        assert_eq!(found.iteration, 50);
        assert_relative_eq!(found.upper_threshold, 800.0, epsilon = 1e-9);
        assert_relative_eq!(found.center.x, 80.0, epsilon = 1e-9);

        let short = MarkerSearch {
            max_iterations: 20,
            ..search_for(&spec)
        };
        assert!(find_marker(&img.pixels, &field, field.center, &short).is_none());
    }

    #[test]
    fn test_size_window() {
        let disc = |r: usize| RegionProps {
            label: 1,
            area: r,
            filled_area: r,
            min_col: 0,
            min_row: 0,
            max_col: 0,
            max_row: 0,
            centroid: Point2::origin(),
            weighted_centroid: Point2::origin(),
        };
        // 5 mm BB at 4 px/mm is roughly 314 px
        assert!(is_right_size(&disc(314), 4.0, 5.0));
        assert!(!is_right_size(&disc(30), 4.0, 5.0));
        assert!(!is_right_size(&disc(5000), 4.0, 5.0));
    }
}
