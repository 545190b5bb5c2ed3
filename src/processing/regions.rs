//! Connected-region bookkeeping on binary masks.

use nalgebra::Point2;
use std::collections::{HashMap, VecDeque};

/// Labels 8-connected regions of `mask` with two-pass union-find.
/// Background is 0; regions are numbered 1..=n in scan order.
pub fn label_regions(mask: &[bool], width: usize, height: usize) -> (Vec<u32>, usize) {
    let mut labels = vec![0u32; mask.len()];
    let mut parent: Vec<u32> = vec![0];

    fn find(parent: &mut [u32], mut x: u32) -> u32 {
        while parent[x as usize] != x {
            parent[x as usize] = parent[parent[x as usize] as usize];
            x = parent[x as usize];
        }
        x
    }

    fn union(parent: &mut [u32], a: u32, b: u32) {
        let ra = find(parent, a);
        let rb = find(parent, b);
        if ra < rb {
            parent[rb as usize] = ra;
        } else if rb < ra {
            parent[ra as usize] = rb;
        }
    }

    for row in 0..height {
        for col in 0..width {
            let idx = row * width + col;
            if !mask[idx] {
                continue;
            }
            let mut neighbors = [0u32; 4];
            let mut n = 0;
            if col > 0 && labels[idx - 1] > 0 {
                neighbors[n] = labels[idx - 1];
                n += 1;
            }
            if row > 0 {
                let up = idx - width;
                if labels[up] > 0 {
                    neighbors[n] = labels[up];
                    n += 1;
                }
                if col > 0 && labels[up - 1] > 0 {
                    neighbors[n] = labels[up - 1];
                    n += 1;
                }
                if col + 1 < width && labels[up + 1] > 0 {
                    neighbors[n] = labels[up + 1];
                    n += 1;
                }
            }
            match neighbors[..n].iter().min() {
                None => {
                    let label = parent.len() as u32;
                    parent.push(label);
                    labels[idx] = label;
                }
                Some(&min_label) => {
                    labels[idx] = min_label;
                    for &other in &neighbors[..n] {
                        union(&mut parent, min_label, other);
                    }
                }
            }
        }
    }

    let mut remap: HashMap<u32, u32> = HashMap::new();
    for label in labels.iter_mut() {
        if *label > 0 {
            let root = find(&mut parent, *label);
            let next = remap.len() as u32 + 1;
            *label = *remap.entry(root).or_insert(next);
        }
    }
    (labels, remap.len())
}

/// Sets every background pixel that cannot reach the border (4-connected) to true.
pub fn fill_holes(mask: &[bool], width: usize, height: usize) -> Vec<bool> {
    let mut outside = vec![false; mask.len()];
    let mut queue = VecDeque::new();
    let seed = |col: usize, row: usize, outside: &mut Vec<bool>, queue: &mut VecDeque<usize>| {
        let idx = row * width + col;
        if !mask[idx] && !outside[idx] {
            outside[idx] = true;
            queue.push_back(idx);
        }
    };
    for col in 0..width {
        seed(col, 0, &mut outside, &mut queue);
        seed(col, height - 1, &mut outside, &mut queue);
    }
    for row in 0..height {
        seed(0, row, &mut outside, &mut queue);
        seed(width - 1, row, &mut outside, &mut queue);
    }
    while let Some(idx) = queue.pop_front() {
        let col = idx % width;
        let row = idx / width;
        if col > 0 {
            seed(col - 1, row, &mut outside, &mut queue);
        }
        if col + 1 < width {
            seed(col + 1, row, &mut outside, &mut queue);
        }
        if row > 0 {
            seed(col, row - 1, &mut outside, &mut queue);
        }
        if row + 1 < height {
            seed(col, row + 1, &mut outside, &mut queue);
        }
    }
    outside.iter().map(|&o| !o).collect()
}

/// Shape and position summary of one labeled region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionProps {
    pub label: u32,
    pub area: usize,
    /// Area with interior holes filled.
    pub filled_area: usize,
    pub min_col: usize,
    pub min_row: usize,
    pub max_col: usize,
    pub max_row: usize,
    pub centroid: Point2<f64>,
    /// Centroid weighted by the supplied per-pixel weights.
    pub weighted_centroid: Point2<f64>,
}

impl RegionProps {
    pub fn bbox_area(&self) -> usize {
        (self.max_col - self.min_col + 1) * (self.max_row - self.min_row + 1)
    }

    /// Filled area over bounding-box area; π/4 for an ideal disc.
    pub fn fill_ratio(&self) -> f64 {
        self.filled_area as f64 / self.bbox_area() as f64
    }
}

/// Computes properties for labels `1..=n_labels`. `weights` must be
/// non-negative; a region whose weights sum to 0 falls back to its plain centroid.
pub fn region_props(
    labels: &[u32],
    n_labels: usize,
    weights: &[f64],
    width: usize,
) -> Vec<RegionProps> {
    struct Accum {
        area: usize,
        sum_col: f64,
        sum_row: f64,
        w_sum: f64,
        w_col: f64,
        w_row: f64,
        min_col: usize,
        min_row: usize,
        max_col: usize,
        max_row: usize,
    }

    let mut acc: Vec<Accum> = (0..n_labels)
        .map(|_| Accum {
            area: 0,
            sum_col: 0.0,
            sum_row: 0.0,
            w_sum: 0.0,
            w_col: 0.0,
            w_row: 0.0,
            min_col: usize::MAX,
            min_row: usize::MAX,
            max_col: 0,
            max_row: 0,
        })
        .collect();

    for (idx, &label) in labels.iter().enumerate() {
        if label == 0 {
            continue;
        }
        let col = idx % width;
        let row = idx / width;
        let a = &mut acc[label as usize - 1];
        let w = weights[idx];
        a.area += 1;
        a.sum_col += col as f64;
        a.sum_row += row as f64;
        a.w_sum += w;
        a.w_col += w * col as f64;
        a.w_row += w * row as f64;
        a.min_col = a.min_col.min(col);
        a.min_row = a.min_row.min(row);
        a.max_col = a.max_col.max(col);
        a.max_row = a.max_row.max(row);
    }

    acc.into_iter()
        .enumerate()
        .filter(|(_, a)| a.area > 0)
        .map(|(i, a)| {
            let label = i as u32 + 1;
            let centroid = Point2::new(a.sum_col / a.area as f64, a.sum_row / a.area as f64);
            let weighted_centroid = if a.w_sum > 0.0 {
                Point2::new(a.w_col / a.w_sum, a.w_row / a.w_sum)
            } else {
                centroid
            };
            let filled_area = filled_area_in_bbox(
                labels, width, label, a.min_col, a.min_row, a.max_col, a.max_row,
            );
            RegionProps {
                label,
                area: a.area,
                filled_area,
                min_col: a.min_col,
                min_row: a.min_row,
                max_col: a.max_col,
                max_row: a.max_row,
                centroid,
                weighted_centroid,
            }
        })
        .collect()
}

fn filled_area_in_bbox(
    labels: &[u32],
    width: usize,
    label: u32,
    min_col: usize,
    min_row: usize,
    max_col: usize,
    max_row: usize,
) -> usize {
    // pad by one so the flood fill can run around the region
    let w = max_col - min_col + 3;
    let h = max_row - min_row + 3;
    let mut local = vec![false; w * h];
    for row in min_row..=max_row {
        for col in min_col..=max_col {
            if labels[row * width + col] == label {
                local[(row - min_row + 1) * w + (col - min_col + 1)] = true;
            }
        }
    }
    fill_holes(&local, w, h).iter().filter(|&&v| v).count()
}

/// The region with the most pixels, if any.
pub fn largest_region(props: &[RegionProps]) -> Option<&RegionProps> {
    props.iter().max_by_key(|p| p.area)
}
