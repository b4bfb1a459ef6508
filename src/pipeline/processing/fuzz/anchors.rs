use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::constants::METERS_PER_DEGREE_LAT;
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::validate::BoundingBox;
use crate::pipeline::utils::haversine_meters;

/// Reference point a fuzzed coordinate is moved toward
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Anchor {
    #[serde(rename = "anchor_id")]
    pub id: String,
    pub lat: f64,
    pub lon: f64,
}

impl Anchor {
    pub fn point(&self) -> (f64, f64) {
        (self.lat, self.lon)
    }
}

/// An anchor together with its distance from the query point
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub anchor: Anchor,
    pub distance_m: f64,
}

/// Spatial index over anchor points
pub trait AnchorSource: Send + Sync {
    /// Anchors within `radius_m` of `point`, nearest first
    fn candidates_within(&self, point: (f64, f64), radius_m: f64) -> Vec<Candidate>;

    fn describe(&self) -> String;
}

fn degrees_lon_per_meter(lat: f64) -> f64 {
    1.0 / (METERS_PER_DEGREE_LAT * lat.to_radians().cos().max(1e-6))
}

fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        a.distance_m
            .total_cmp(&b.distance_m)
            .then_with(|| a.anchor.id.cmp(&b.anchor.id))
    });
}

/// Implicit regular grid of anchors over the service area. Nodes are never
/// materialized; a query only visits the nodes around the point.
#[derive(Debug, Clone)]
pub struct LatticeAnchors {
    bounds: BoundingBox,
    spacing_m: f64,
    lat_step: f64,
    lon_step: f64,
}

impl LatticeAnchors {
    pub fn new(bounds: BoundingBox, spacing_m: f64) -> Result<Self> {
        if !(spacing_m > 0.0) {
            return Err(PipelineError::Config(format!(
                "lattice spacing must be positive, got {}",
                spacing_m
            )));
        }
        let center_lat = (bounds.min_lat + bounds.max_lat) / 2.0;
        Ok(Self {
            bounds,
            spacing_m,
            lat_step: spacing_m / METERS_PER_DEGREE_LAT,
            lon_step: spacing_m * degrees_lon_per_meter(center_lat),
        })
    }

    fn node(&self, i: i64, j: i64) -> Anchor {
        Anchor {
            id: format!("grid-{}-{}", i, j),
            lat: self.bounds.min_lat + i as f64 * self.lat_step,
            lon: self.bounds.min_lon + j as f64 * self.lon_step,
        }
    }

    /// The last row and column sit on or past the max bounds, so points near
    /// the edge have a node on both sides
    fn max_index(&self) -> (i64, i64) {
        (
            ((self.bounds.max_lat - self.bounds.min_lat) / self.lat_step).ceil() as i64,
            ((self.bounds.max_lon - self.bounds.min_lon) / self.lon_step).ceil() as i64,
        )
    }
}

impl AnchorSource for LatticeAnchors {
    fn candidates_within(&self, point: (f64, f64), radius_m: f64) -> Vec<Candidate> {
        if !self.bounds.contains(point) {
            return Vec::new();
        }
        let (lat, lon) = point;
        let lat_reach = radius_m / METERS_PER_DEGREE_LAT;
        let lon_reach = radius_m * degrees_lon_per_meter(lat);
        let (max_i, max_j) = self.max_index();

        let i_lo = (((lat - lat_reach - self.bounds.min_lat) / self.lat_step).floor() as i64).max(0);
        let i_hi = (((lat + lat_reach - self.bounds.min_lat) / self.lat_step).ceil() as i64).min(max_i);
        let j_lo = (((lon - lon_reach - self.bounds.min_lon) / self.lon_step).floor() as i64).max(0);
        let j_hi = (((lon + lon_reach - self.bounds.min_lon) / self.lon_step).ceil() as i64).min(max_j);

        let mut candidates = Vec::new();
        for i in i_lo..=i_hi {
            for j in j_lo..=j_hi {
                let anchor = self.node(i, j);
                let distance_m = haversine_meters(point, anchor.point());
                if distance_m <= radius_m {
                    candidates.push(Candidate { anchor, distance_m });
                }
            }
        }
        sort_candidates(&mut candidates);
        candidates
    }

    fn describe(&self) -> String {
        format!("lattice every {}m", self.spacing_m)
    }
}

/// Explicit anchor points bucketed into a hash grid
#[derive(Debug, Clone)]
pub struct PointAnchorIndex {
    anchors: Vec<Anchor>,
    cells: HashMap<(i64, i64), Vec<usize>>,
    /// Cell edge in degrees, on both axes
    cell_deg: f64,
}

impl PointAnchorIndex {
    pub fn new(anchors: Vec<Anchor>, cell_m: f64) -> Result<Self> {
        if !(cell_m > 0.0) {
            return Err(PipelineError::Config(format!("anchor cell size must be positive, got {}", cell_m)));
        }
        let cell_deg = cell_m / METERS_PER_DEGREE_LAT;
        let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (index, anchor) in anchors.iter().enumerate() {
            cells
                .entry(Self::cell_of(cell_deg, anchor.lat, anchor.lon))
                .or_default()
                .push(index);
        }
        Ok(Self {
            anchors,
            cells,
            cell_deg,
        })
    }

    /// Reads `anchor_id,lat,lon` rows
    pub fn from_csv_path(path: &Path, cell_m: f64) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let anchors = reader.deserialize().collect::<std::result::Result<Vec<Anchor>, _>>()?;
        if anchors.is_empty() {
            return Err(PipelineError::Config(format!(
                "anchor file {} has no anchors",
                path.display()
            )));
        }
        Self::new(anchors, cell_m)
    }

    fn cell_of(cell_deg: f64, lat: f64, lon: f64) -> (i64, i64) {
        ((lat / cell_deg).floor() as i64, (lon / cell_deg).floor() as i64)
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

impl AnchorSource for PointAnchorIndex {
    fn candidates_within(&self, point: (f64, f64), radius_m: f64) -> Vec<Candidate> {
        let (lat, lon) = point;
        let lat_reach = radius_m / METERS_PER_DEGREE_LAT;
        let lon_reach = radius_m * degrees_lon_per_meter(lat);
        let (i_lo, j_lo) = Self::cell_of(self.cell_deg, lat - lat_reach, lon - lon_reach);
        let (i_hi, j_hi) = Self::cell_of(self.cell_deg, lat + lat_reach, lon + lon_reach);

        let mut candidates = Vec::new();
        for i in i_lo..=i_hi {
            for j in j_lo..=j_hi {
                let Some(members) = self.cells.get(&(i, j)) else {
                    continue;
                };
                for &index in members {
                    let anchor = &self.anchors[index];
                    let distance_m = haversine_meters(point, anchor.point());
                    if distance_m <= radius_m {
                        candidates.push(Candidate {
                            anchor: anchor.clone(),
                            distance_m,
                        });
                    }
                }
            }
        }
        sort_candidates(&mut candidates);
        candidates
    }

    fn describe(&self) -> String {
        format!("{} anchor points", self.anchors.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CITY_HALL: (f64, f64) = (39.9526, -75.1652);

    #[test]
    fn test_lattice_always_has_a_nearby_node() {
        let lattice = LatticeAnchors::new(BoundingBox::default(), 150.0).unwrap();
        for point in [CITY_HALL, (40.0379, -75.0302), (39.5001, -75.9999)] {
            let candidates = lattice.candidates_within(point, 400.0);
            assert!(!candidates.is_empty(), "no anchor near {:?}", point);
            assert!(candidates.iter().all(|c| c.distance_m <= 400.0));
            assert!(candidates.windows(2).all(|w| w[0].distance_m <= w[1].distance_m));
        }
    }

    #[test]
    fn test_lattice_covers_max_edges() {
        let bounds = BoundingBox::default();
        let lattice = LatticeAnchors::new(bounds, 280.0).unwrap();
        let top = (0..100).map(|n| (bounds.max_lat, bounds.min_lon + n as f64 * 0.015));
        let right = (0..100).map(|n| (bounds.min_lat + n as f64 * 0.01, bounds.max_lon));
        let corner = std::iter::once((bounds.max_lat - 0.0001, bounds.max_lon - 0.0001));
        for point in top.chain(right).chain(corner) {
            assert!(!lattice.candidates_within(point, 400.0).is_empty(), "no anchor near {:?}", point);
        }
    }

    #[test]
    fn test_lattice_has_nothing_outside_bounds() {
        let lattice = LatticeAnchors::new(BoundingBox::default(), 150.0).unwrap();
        assert!(lattice.candidates_within((41.0, -75.1), 400.0).is_empty());
    }

    #[test]
    fn test_point_index_finds_only_close_anchors() {
        let anchors = vec![
            Anchor { id: "near".into(), lat: 39.9530, lon: -75.1650 },
            Anchor { id: "far".into(), lat: 39.9800, lon: -75.1000 },
        ];
        let index = PointAnchorIndex::new(anchors, 250.0).unwrap();
        let ids: Vec<_> = index
            .candidates_within(CITY_HALL, 400.0)
            .into_iter()
            .map(|c| c.anchor.id)
            .collect();
        assert_eq!(ids, vec!["near".to_string()]);
    }

    #[test]
    fn test_point_index_loads_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "anchor_id,lat,lon").unwrap();
        writeln!(file, "a1,39.9530,-75.1650").unwrap();
        writeln!(file, "a2,39.9520,-75.1660").unwrap();
        file.flush().unwrap();

        let index = PointAnchorIndex::from_csv_path(file.path(), 200.0).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.candidates_within(CITY_HALL, 400.0).len(), 2);
    }
}
