//! Raster-to-vector conversion of the cleaned probability surface.
//!
//! Connected components are traced along pixel edges, so every polygon
//! covers exactly the pixels of its region.

use std::collections::{HashMap, VecDeque};

use geo::{Coord, LineString, Polygon};
use ndarray::Array2;
use serde::Serialize;

use crate::core::fusion::threshold_mask;
use crate::core::params::Connectivity;
use crate::types::{GeoTransform, Mask, Raster};

/// One connected above-threshold blob in map coordinates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawFootprint {
    #[serde(skip)]
    pub polygon: Polygon<f64>,
    /// Pixel count times pixel area, rounded to 0.1 m^2
    pub area_m2: f64,
    pub prob_mean: f64,
    pub prob_max: f64,
    pub pixel_count: usize,
}

/// Round half away from zero to `decimals` places
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Label connected regions of `mask`.
///
/// Labels start at 1 and follow raster order of each region's first pixel;
/// 0 is background. Returns the label raster and the region count.
pub fn label_components(mask: &Mask, connectivity: Connectivity) -> (Array2<u32>, usize) {
    let (rows, cols) = mask.dim();
    let mut labels = Array2::<u32>::zeros((rows, cols));
    let mut count = 0u32;
    let mut queue = VecDeque::new();

    let offsets: &[(isize, isize)] = match connectivity {
        Connectivity::Four => &[(-1, 0), (1, 0), (0, -1), (0, 1)],
        Connectivity::Eight => &[
            (-1, -1),
            (-1, 0),
            (-1, 1),
            (0, -1),
            (0, 1),
            (1, -1),
            (1, 0),
            (1, 1),
        ],
    };

    for i in 0..rows {
        for j in 0..cols {
            if !mask[[i, j]] || labels[[i, j]] != 0 {
                continue;
            }
            count += 1;
            labels[[i, j]] = count;
            queue.push_back((i, j));

            while let Some((ci, cj)) = queue.pop_front() {
                for &(di, dj) in offsets {
                    let ni = ci as isize + di;
                    let nj = cj as isize + dj;
                    if ni < 0 || nj < 0 || ni >= rows as isize || nj >= cols as isize {
                        continue;
                    }
                    let (ni, nj) = (ni as usize, nj as usize);
                    if mask[[ni, nj]] && labels[[ni, nj]] == 0 {
                        labels[[ni, nj]] = count;
                        queue.push_back((ni, nj));
                    }
                }
            }
        }
    }

    (labels, count as usize)
}

type Vertex = (i64, i64);

/// Directed boundary edge between two pixel corners (col, row)
#[derive(Debug, Clone, Copy)]
struct Edge {
    from: Vertex,
    to: Vertex,
}

impl Edge {
    fn direction(&self) -> Vertex {
        (self.to.0 - self.from.0, self.to.1 - self.from.1)
    }
}

/// Rank of turning from `incoming` onto `outgoing`; lower is preferred.
///
/// Corners are in raster order (y down), so a right turn maps (dx, dy) to
/// (-dy, dx). Four-connected regions prefer right turns, which keeps
/// diagonally touching pixels apart; eight-connected regions prefer left
/// turns, which joins them.
fn turn_rank(incoming: Vertex, outgoing: Vertex, connectivity: Connectivity) -> u8 {
    let right = (-incoming.1, incoming.0);
    let left = (incoming.1, -incoming.0);
    let (first, last) = match connectivity {
        Connectivity::Four => (right, left),
        Connectivity::Eight => (left, right),
    };
    if outgoing == first {
        0
    } else if outgoing == incoming {
        1
    } else if outgoing == last {
        2
    } else {
        3
    }
}

/// Boundary edges of the pixels where `labels == label`, oriented so the
/// region lies on the right-hand side (clockwise on screen).
fn boundary_edges(labels: &Array2<u32>, label: u32) -> Vec<Edge> {
    let (rows, cols) = labels.dim();
    let inside = |i: isize, j: isize| {
        i >= 0 && j >= 0 && i < rows as isize && j < cols as isize && labels[[i as usize, j as usize]] == label
    };

    let mut edges = Vec::new();
    for ((i, j), &l) in labels.indexed_iter() {
        if l != label {
            continue;
        }
        let (r, c) = (i as i64, j as i64);
        let (ii, jj) = (i as isize, j as isize);
        if !inside(ii - 1, jj) {
            edges.push(Edge { from: (c, r), to: (c + 1, r) });
        }
        if !inside(ii, jj + 1) {
            edges.push(Edge { from: (c + 1, r), to: (c + 1, r + 1) });
        }
        if !inside(ii + 1, jj) {
            edges.push(Edge { from: (c + 1, r + 1), to: (c, r + 1) });
        }
        if !inside(ii, jj - 1) {
            edges.push(Edge { from: (c, r + 1), to: (c, r) });
        }
    }
    edges
}

/// Chain directed edges into closed rings of corner vertices
fn trace_rings(edges: &[Edge], connectivity: Connectivity) -> Vec<Vec<Vertex>> {
    let mut outgoing: HashMap<Vertex, Vec<usize>> = HashMap::new();
    for (idx, edge) in edges.iter().enumerate() {
        outgoing.entry(edge.from).or_default().push(idx);
    }

    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();

    for start in 0..edges.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let origin = edges[start].from;
        let mut ring = vec![origin];
        let mut current = start;

        loop {
            let vertex = edges[current].to;
            let incoming = edges[current].direction();

            let best_open = outgoing
                .get(&vertex)
                .into_iter()
                .flatten()
                .copied()
                .filter(|&idx| !used[idx])
                .min_by_key(|&idx| turn_rank(incoming, edges[idx].direction(), connectivity));

            if vertex == origin {
                let close_rank = turn_rank(incoming, edges[start].direction(), connectivity);
                let keep_going = best_open
                    .map(|idx| turn_rank(incoming, edges[idx].direction(), connectivity) < close_rank)
                    .unwrap_or(false);
                if !keep_going {
                    break;
                }
            }

            match best_open {
                Some(next) => {
                    used[next] = true;
                    ring.push(vertex);
                    current = next;
                }
                None => break,
            }
        }

        rings.push(ring);
    }

    rings
}

/// Drop vertices where the boundary runs straight through
fn remove_collinear(ring: &[Vertex]) -> Vec<Vertex> {
    let n = ring.len();
    if n < 4 {
        return ring.to_vec();
    }
    (0..n)
        .filter(|&k| {
            let prev = ring[(k + n - 1) % n];
            let here = ring[k];
            let next = ring[(k + 1) % n];
            let d_in = (here.0 - prev.0, here.1 - prev.1);
            let d_out = (next.0 - here.0, next.1 - here.1);
            d_in.0 * d_out.1 - d_in.1 * d_out.0 != 0 || (d_in.0 * d_out.0 + d_in.1 * d_out.1) < 0
        })
        .map(|k| ring[k])
        .collect()
}

/// Twice the signed area in corner units (positive for outer rings)
fn signed_area2(ring: &[Vertex]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|k| {
            let (x0, y0) = ring[k];
            let (x1, y1) = ring[(k + 1) % n];
            x0 * y1 - x1 * y0
        })
        .sum()
}

/// Trace the outline of one labelled region as a polygon in map coordinates.
///
/// The largest ring becomes the exterior, the remaining rings are holes.
/// Returns `None` when the label has no pixels.
pub fn polygonize_region(
    labels: &Array2<u32>,
    label: u32,
    transform: &GeoTransform,
    connectivity: Connectivity,
) -> Option<Polygon<f64>> {
    let edges = boundary_edges(labels, label);
    if edges.is_empty() {
        return None;
    }

    let mut rings: Vec<Vec<Vertex>> = trace_rings(&edges, connectivity)
        .iter()
        .map(|ring| remove_collinear(ring))
        .filter(|ring| ring.len() >= 3)
        .collect();
    rings.sort_by_key(|ring| std::cmp::Reverse(signed_area2(ring).abs()));

    let to_map = |ring: &Vec<Vertex>| -> LineString<f64> {
        ring.iter()
            .map(|&(c, r)| {
                let (x, y) = transform.pixel_to_map(c as f64, r as f64);
                Coord { x, y }
            })
            .collect::<Vec<_>>()
            .into()
    };

    let mut iter = rings.iter();
    let exterior = to_map(iter.next()?);
    let interiors = iter.map(to_map).collect();
    Some(Polygon::new(exterior, interiors))
}

/// Vectorize connected blobs of `clean_prob >= threshold`.
///
/// Regions whose pixel area does not exceed `min_area` are dropped. An empty
/// surface yields an empty vector.
pub fn extract_footprints(
    clean_prob: &Raster,
    transform: &GeoTransform,
    threshold: f64,
    min_area: f64,
    connectivity: Connectivity,
) -> Vec<RawFootprint> {
    let binary = threshold_mask(clean_prob, threshold);
    let (labels, n_regions) = label_components(&binary, connectivity);
    if n_regions == 0 {
        log::debug!("No connected regions above {:.2}", threshold);
        return Vec::new();
    }

    let mut pixel_values: Vec<Vec<f64>> = vec![Vec::new(); n_regions];
    for ((i, j), &label) in labels.indexed_iter() {
        if label > 0 {
            pixel_values[label as usize - 1].push(clean_prob[[i, j]] as f64);
        }
    }

    let pixel_area = transform.pixel_area();
    let mut footprints = Vec::new();
    for (idx, values) in pixel_values.iter().enumerate() {
        let area_m2 = values.len() as f64 * pixel_area;
        if area_m2 <= min_area {
            continue;
        }
        let Some(polygon) = polygonize_region(&labels, idx as u32 + 1, transform, connectivity) else {
            continue;
        };

        let prob_mean = values.iter().sum::<f64>() / values.len() as f64;
        let prob_max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        footprints.push(RawFootprint {
            polygon,
            area_m2: round_to(area_m2, 1),
            prob_mean: round_to(prob_mean, 4),
            prob_max: round_to(prob_max, 4),
            pixel_count: values.len(),
        });
    }

    log::debug!(
        "{} of {} regions exceed {} m^2",
        footprints.len(),
        n_regions,
        min_area
    );
    footprints
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::Area;

    fn unit_transform() -> GeoTransform {
        GeoTransform::from_origin(0.0, 100.0, 10.0, 10.0)
    }

    fn mask_from(rows: &[&str]) -> Mask {
        let height = rows.len();
        let width = rows[0].len();
        Mask::from_shape_fn((height, width), |(i, j)| rows[i].as_bytes()[j] == b'#')
    }

    #[test]
    fn test_diagonal_pixels_split_under_four_connectivity() {
        let mask = mask_from(&["#..", ".#.", "..#"]);
        let (_, four) = label_components(&mask, Connectivity::Four);
        let (_, eight) = label_components(&mask, Connectivity::Eight);
        assert_eq!(four, 3);
        assert_eq!(eight, 1);
    }

    #[test]
    fn test_square_region_becomes_four_corner_polygon() {
        let mask = mask_from(&[".....", ".###.", ".###.", ".###.", "....."]);
        let (labels, n) = label_components(&mask, Connectivity::Four);
        assert_eq!(n, 1);
        let polygon = polygonize_region(&labels, 1, &unit_transform(), Connectivity::Four).unwrap();
        assert_eq!(polygon.exterior().0.len(), 5);
        assert_relative_eq!(polygon.unsigned_area(), 900.0, epsilon = 1e-9);
        let xs: Vec<f64> = polygon.exterior().coords().map(|c| c.x).collect();
        assert!(xs.iter().all(|x| *x == 10.0 || *x == 40.0));
    }

    #[test]
    fn test_l_shape_area_matches_pixels() {
        let mask = mask_from(&["#...", "#...", "#...", "####"]);
        let (labels, _) = label_components(&mask, Connectivity::Four);
        let polygon = polygonize_region(&labels, 1, &unit_transform(), Connectivity::Four).unwrap();
        assert_eq!(polygon.exterior().0.len(), 7);
        assert_relative_eq!(polygon.unsigned_area(), 700.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ring_region_keeps_hole() {
        let mask = mask_from(&["#####", "#...#", "#...#", "#...#", "#####"]);
        let (labels, _) = label_components(&mask, Connectivity::Four);
        let polygon = polygonize_region(&labels, 1, &unit_transform(), Connectivity::Four).unwrap();
        assert_eq!(polygon.interiors().len(), 1);
        assert_relative_eq!(polygon.unsigned_area(), 1600.0, epsilon = 1e-9);
    }

    #[test]
    fn test_diagonal_pinch_keeps_area_under_eight_connectivity() {
        let mask = mask_from(&["##..", "##..", "..##", "..##"]);
        let (labels, n) = label_components(&mask, Connectivity::Eight);
        assert_eq!(n, 1);
        let polygon = polygonize_region(&labels, 1, &unit_transform(), Connectivity::Eight).unwrap();
        assert_relative_eq!(polygon.unsigned_area(), 800.0, epsilon = 1e-9);
    }

    #[test]
    fn test_area_filter_boundary() {
        // 10 m pixels, min area 300 m^2: three pixels dropped, four kept
        let mut prob = Raster::from_elem((6, 12), f32::NAN);
        for j in 1..4 {
            prob[[1, j]] = 0.7;
        }
        for j in 6..10 {
            prob[[4, j]] = 0.9;
        }
        let footprints = extract_footprints(&prob, &unit_transform(), 0.45, 300.0, Connectivity::Four);
        assert_eq!(footprints.len(), 1);
        assert_eq!(footprints[0].pixel_count, 4);
        assert_relative_eq!(footprints[0].area_m2, 400.0);
        assert_relative_eq!(footprints[0].prob_max, 0.9, epsilon = 1e-6);
    }

    #[test]
    fn test_empty_surface_yields_no_footprints() {
        let prob = Raster::from_elem((8, 8), f32::NAN);
        let footprints = extract_footprints(&prob, &unit_transform(), 0.45, 80.0, Connectivity::Four);
        assert!(footprints.is_empty());
    }

    #[test]
    fn test_probability_statistics() {
        let mut prob = Raster::from_elem((5, 5), 0.1);
        prob[[1, 1]] = 0.5;
        prob[[1, 2]] = 0.7;
        let footprints = extract_footprints(&prob, &unit_transform(), 0.45, 80.0, Connectivity::Four);
        assert_eq!(footprints.len(), 1);
        assert_relative_eq!(footprints[0].prob_mean, 0.6, epsilon = 1e-4);
        assert_relative_eq!(footprints[0].prob_max, 0.7, epsilon = 1e-4);
    }
}
