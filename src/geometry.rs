use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::intersects::Intersects;
use geo::{Coord, LineString, MultiPolygon, Polygon, Rect};
use geojson::{GeoJson, Value as GeoJsonValue};
use shapefile::{PolygonRing, Shape};

use crate::config::Settings;
use crate::error::FilterError;

/// A closed planar region answering point containment queries.
/// Points on the boundary count as contained.
#[derive(Debug, Clone)]
pub struct Region {
    shape: MultiPolygon<f64>,
    bbox: Rect<f64>,
}

impl Region {
    pub fn new(shape: MultiPolygon<f64>, origin: &str) -> Result<Region, FilterError> {
        let malformed = |msg: String| FilterError::Boundary {
            origin: origin.to_string(),
            msg,
        };
        if shape.0.is_empty() {
            return Err(malformed("no polygon found".to_string()));
        }
        for polygon in &shape.0 {
            let ring = polygon.exterior();
            // closed ring: at least 3 distinct points plus the closing one
            if ring.0.len() < 4 {
                return Err(malformed(format!(
                    "exterior ring has {} points, at least 3 distinct points are required",
                    ring.0.len().saturating_sub(1)
                )));
            }
            let rings = std::iter::once(ring).chain(polygon.interiors());
            for ring in rings {
                if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
                    return Err(malformed("ring has a non-finite coordinate".to_string()));
                }
            }
        }
        let bbox = shape
            .bounding_rect()
            .ok_or_else(|| malformed("boundary has no extent".to_string()))?;
        Ok(Region { shape, bbox })
    }

    /// Builds a single simple polygon from an ordered point sequence. The
    /// sequence is closed if its last point differs from its first.
    pub fn from_points(points: &[(f64, f64)], origin: &str) -> Result<Region, FilterError> {
        let mut coords: Vec<Coord<f64>> = points.iter().map(|&(x, y)| Coord { x, y }).collect();
        ensure_closed(&mut coords);
        let polygon = Polygon::new(LineString::new(coords), vec![]);
        Region::new(MultiPolygon(vec![polygon]), origin)
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        if !x.is_finite() || !y.is_finite() {
            return false;
        }
        // quick rejection test
        let (min, max) = (self.bbox.min(), self.bbox.max());
        if x < min.x || x > max.x || y < min.y || y > max.y {
            return false;
        }
        let coord = Coord { x, y };
        self.shape.0.iter().any(|polygon| polygon.intersects(&coord))
    }

    /// One flag per input point.
    pub fn contains(&self, points: &[(f64, f64)]) -> Vec<bool> {
        points
            .iter()
            .map(|&(x, y)| self.contains_point(x, y))
            .collect()
    }

    pub fn bounding_rect(&self) -> Rect<f64> {
        self.bbox
    }
}

/// The two regions a ride must start and end in.
#[derive(Debug, Clone)]
pub struct RegionIndex {
    pub urban: Region,
    pub airport: Region,
}

impl RegionIndex {
    pub fn load(settings: &Settings) -> Result<RegionIndex, FilterError> {
        let airport = load_region(&settings.paths.path_cd, settings.boundaries.airport_shape)?;
        let urban = load_region(&settings.paths.path_bb, settings.boundaries.urban_shape)?;
        Ok(RegionIndex { urban, airport })
    }

    pub fn is_trip_match(&self, pickup: (f64, f64), dropoff: (f64, f64)) -> bool {
        self.urban.contains_point(pickup.0, pickup.1)
            && self.airport.contains_point(dropoff.0, dropoff.1)
    }
}

/// Loads shape `index` of a boundary file, picking the reader from the
/// file extension.
pub fn load_region(path: &Path, index: usize) -> Result<Region, FilterError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("geojson") | Some("json") => load_geojson_region(path, index),
        _ => load_shapefile_region(path, index),
    }
}

pub fn load_shapefile_region(path: &Path, index: usize) -> Result<Region, FilterError> {
    log::info!("Loading shape {} of {}", index, path.display());
    let shapes = shapefile::read_shapes(path).map_err(|e| FilterError::Shapefile {
        path: path.to_path_buf(),
        source: e,
    })?;
    let origin = format!("shape {} of '{}'", index, path.display());
    let shape = shapes.get(index).ok_or_else(|| FilterError::Boundary {
        origin: origin.clone(),
        msg: format!("file holds only {} shapes", shapes.len()),
    })?;
    let multipolygon = match shape {
        Shape::Polygon(p) => rings_to_geo(p.rings(), |pt| Coord { x: pt.x, y: pt.y }),
        Shape::PolygonM(p) => rings_to_geo(p.rings(), |pt| Coord { x: pt.x, y: pt.y }),
        Shape::PolygonZ(p) => rings_to_geo(p.rings(), |pt| Coord { x: pt.x, y: pt.y }),
        other => {
            return Err(FilterError::Boundary {
                origin,
                msg: format!("expected a polygon, found {:?}", other.shapetype()),
            })
        }
    };
    Region::new(multipolygon, &origin)
}

/// Groups shapefile rings into polygons: each outer ring starts a polygon
/// and the inner rings after it are its holes.
fn rings_to_geo<P, F>(rings: &[PolygonRing<P>], to_coord: F) -> MultiPolygon<f64>
where
    F: Fn(&P) -> Coord<f64>,
{
    let mut polygons = Vec::new();
    let mut exterior: Option<LineString<f64>> = None;
    let mut holes: Vec<LineString<f64>> = Vec::new();
    for ring in rings {
        let mut coords: Vec<Coord<f64>> = ring.points().iter().map(&to_coord).collect();
        ensure_closed(&mut coords);
        let line = LineString::new(coords);
        match ring {
            PolygonRing::Outer(_) => {
                if let Some(ext) = exterior.take() {
                    polygons.push(Polygon::new(ext, std::mem::take(&mut holes)));
                }
                exterior = Some(line);
            }
            PolygonRing::Inner(_) => holes.push(line),
        }
    }
    if let Some(ext) = exterior {
        polygons.push(Polygon::new(ext, holes));
    }
    MultiPolygon(polygons)
}

pub fn load_geojson_region(path: &Path, index: usize) -> Result<Region, FilterError> {
    log::info!("Loading feature {} of {}", index, path.display());
    let file = File::open(path).map_err(|e| FilterError::file_access(path, e))?;
    let reader = BufReader::new(file);
    let geojson = GeoJson::from_reader(reader).map_err(|e| FilterError::GeoJson {
        path: path.to_path_buf(),
        source: geojson::Error::MalformedJson(e),
    })?;
    let origin = format!("feature {} of '{}'", index, path.display());
    let malformed = |msg: &str| FilterError::Boundary {
        origin: origin.clone(),
        msg: msg.to_string(),
    };

    let GeoJson::FeatureCollection(fc) = geojson else {
        return Err(malformed("expected a FeatureCollection"));
    };
    let feature = fc
        .features
        .into_iter()
        .nth(index)
        .ok_or_else(|| malformed("feature index out of range"))?;
    let geometry = feature
        .geometry
        .ok_or_else(|| malformed("feature has no geometry"))?;
    let polygons = match geometry.value {
        GeoJsonValue::Polygon(rings) => vec![polygon_from_rings(&rings)],
        GeoJsonValue::MultiPolygon(parts) => parts.iter().map(|r| polygon_from_rings(r)).collect(),
        _ => return Err(malformed("expected a Polygon or MultiPolygon")),
    };
    Region::new(MultiPolygon(polygons), &origin)
}

fn polygon_from_rings(rings: &[Vec<Vec<f64>>]) -> Polygon<f64> {
    let to_line = |ring: &Vec<Vec<f64>>| {
        let mut coords: Vec<Coord<f64>> = ring
            .iter()
            .filter(|pos| pos.len() >= 2)
            .map(|pos| Coord {
                x: pos[0],
                y: pos[1],
            })
            .collect();
        ensure_closed(&mut coords);
        LineString::new(coords)
    };
    let exterior = rings.first().map(to_line).unwrap_or_else(|| LineString::new(vec![]));
    let holes = rings.iter().skip(1).map(to_line).collect();
    Polygon::new(exterior, holes)
}

fn ensure_closed(coords: &mut Vec<Coord<f64>>) {
    if let (Some(&first), Some(&last)) = (coords.first(), coords.last()) {
        if first != last {
            coords.push(first);
        }
    }
}
