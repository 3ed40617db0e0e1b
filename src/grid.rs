use crate::models::BoundingBox;
use geo::{BoundingRect, Coord, HaversineDistance, Intersects, LineString, Point, Polygon, Rect};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Upper bound on columns x rows before any cell is built
pub const MAX_CELLS: usize = 1_000_000;

/// GeoJSON geometry accepted as a search area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SearchArea {
    Polygon { coordinates: Vec<Vec<[f64; 2]>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<[f64; 2]>>> },
}

impl SearchArea {
    /// Outer ring of the (first) polygon; holes and further parts are ignored
    pub fn outer_polygon(&self) -> Option<Polygon<f64>> {
        let ring = match self {
            SearchArea::Polygon { coordinates } => coordinates.first()?,
            SearchArea::MultiPolygon { coordinates } => coordinates.first()?.first()?,
        };
        let coords: Vec<Coord<f64>> = ring
            .iter()
            .filter(|[x, y]| x.is_finite() && y.is_finite())
            .map(|&[x, y]| Coord { x, y })
            .collect();
        if coords.len() < 3 {
            return None;
        }
        Some(Polygon::new(LineString::new(coords), vec![]))
    }
}

/// Covers the area with square cells of `cell_side_km`, keeping cells that
/// touch the polygon. The union of the result contains every polygon point.
pub fn generate_grid(area: &SearchArea, cell_side_km: f64) -> Vec<BoundingBox> {
    if !(cell_side_km.is_finite() && cell_side_km > 0.0) {
        warn!(cell_side_km, "Non-positive cell size, no grid generated");
        return Vec::new();
    }
    let Some(polygon) = area.outer_polygon() else {
        return Vec::new();
    };
    let Some(bounds) = polygon.bounding_rect() else {
        return Vec::new();
    };

    let (min, max) = (bounds.min(), bounds.max());
    let width_km = Point::new(min.x, min.y).haversine_distance(&Point::new(max.x, min.y)) / 1000.0;
    let height_km = Point::new(min.x, min.y).haversine_distance(&Point::new(min.x, max.y)) / 1000.0;

    let columns = cell_count(width_km, cell_side_km);
    let rows = cell_count(height_km, cell_side_km);
    if columns.saturating_mul(rows) > MAX_CELLS {
        warn!(columns, rows, cell_side_km, "Grid too fine for the area, no grid generated");
        return Vec::new();
    }
    let cell_width = step(max.x - min.x, columns, width_km, cell_side_km);
    let cell_height = step(max.y - min.y, rows, height_km, cell_side_km);

    let mut cells = Vec::new();
    for column in 0..columns {
        let min_lng = min.x + column as f64 * cell_width;
        let max_lng = if column + 1 == columns {
            (min_lng + cell_width).max(max.x)
        } else {
            min_lng + cell_width
        };
        for row in 0..rows {
            let min_lat = min.y + row as f64 * cell_height;
            let max_lat = if row + 1 == rows {
                (min_lat + cell_height).max(max.y)
            } else {
                min_lat + cell_height
            };

            let cell = Rect::new(
                Coord { x: min_lng, y: min_lat },
                Coord { x: max_lng, y: max_lat },
            );
            if cell.intersects(&polygon) {
                cells.push(BoundingBox {
                    min_lat,
                    max_lat,
                    min_lng,
                    max_lng,
                });
            }
        }
    }

    debug!(columns, rows, kept = cells.len(), "Generated grid over polygon");
    cells
}

fn cell_count(extent_km: f64, cell_side_km: f64) -> usize {
    ((extent_km / cell_side_km).ceil() as usize).max(1)
}

/// Cell size in degrees along one axis
fn step(extent_deg: f64, count: usize, extent_km: f64, cell_side_km: f64) -> f64 {
    if extent_km > 0.0 {
        extent_deg * cell_side_km / extent_km
    } else {
        extent_deg / count as f64
    }
}
