use serde::{Deserialize, Serialize};

/// Coordinates of a listing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    /// `Some(false)` when sampled inside a district box, `Some(true)` when taken
    /// from the detail page, `None` when the viewport pin was used as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<bool>,
}

/// Core listing record; identity is `token`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct House {
    pub token: String,
    pub location: Location,
    /// Square meters
    pub size: f64,
    /// Price per square meter
    pub price: f64,
}

/// Closed lat/lng rectangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    /// Builds a box, rejecting inverted or non-finite bounds
    pub fn new(min_lat: f64, max_lat: f64, min_lng: f64, max_lng: f64) -> Option<Self> {
        let finite = [min_lat, max_lat, min_lng, max_lng].iter().all(|v| v.is_finite());
        if !finite || min_lat > max_lat || min_lng > max_lng {
            return None;
        }
        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    #[cfg(test)]
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lng >= self.min_lng && lng <= self.max_lng
    }

    /// Splits the box into four quadrants by halving both axes
    pub fn quadrants(&self) -> [BoundingBox; 4] {
        let mid_lat = (self.min_lat + self.max_lat) / 2.0;
        let mid_lng = (self.min_lng + self.max_lng) / 2.0;
        [
            Self { min_lat: self.min_lat, max_lat: mid_lat, min_lng: self.min_lng, max_lng: mid_lng },
            Self { min_lat: self.min_lat, max_lat: mid_lat, min_lng: mid_lng, max_lng: self.max_lng },
            Self { min_lat: mid_lat, max_lat: self.max_lat, min_lng: self.min_lng, max_lng: mid_lng },
            Self { min_lat: mid_lat, max_lat: self.max_lat, min_lng: mid_lng, max_lng: self.max_lng },
        ]
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:.5},{:.5}]x[{:.5},{:.5}]",
            self.min_lat, self.max_lat, self.min_lng, self.max_lng
        )
    }
}

/// Administrative sub-region of a city, as listed by the filter metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct District {
    pub title: String,
    /// Upstream filter key
    pub value: String,
    pub hint: String,
    pub keywords: Vec<String>,
    pub city_id: String,
    /// Camera box of a search constrained to this district; approximate
    pub bounding_box: BoundingBox,
}

/// Typed view of a listing detail page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingDetails {
    pub location: Option<(f64, f64)>,
    pub size: Option<f64>,
    pub rooms: Option<f64>,
    pub total_price: Option<f64>,
    pub unit_price: Option<f64>,
    pub elevator: Option<bool>,
    pub storage: Option<bool>,
    pub parking: Option<bool>,
    pub balcony: Option<bool>,
    pub year_built: Option<f64>,
}

impl ListingDetails {
    /// Exact House for `token`, if the page carried enough to build one
    pub fn to_house(&self, token: &str) -> Option<House> {
        let (lat, lng) = self.location?;
        let size = self.size.filter(|s| s.is_finite() && *s > 0.0)?;
        let price = self
            .unit_price
            .filter(|p| p.is_finite())
            .or_else(|| self.total_price.filter(|p| p.is_finite()).map(|t| t / size))?;

        Some(House {
            token: token.to_string(),
            location: Location {
                lat,
                lng,
                exact: Some(true),
            },
            size,
            price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_rejects_inverted_bounds() {
        assert!(BoundingBox::new(35.1, 35.0, 51.0, 51.1).is_none());
        assert!(BoundingBox::new(35.0, 35.1, 51.0, f64::NAN).is_none());
        assert!(BoundingBox::new(35.0, 35.0, 51.0, 51.0).is_some());
    }

    #[test]
    fn quadrants_tile_the_parent() {
        let parent = BoundingBox::new(0.0, 2.0, 10.0, 14.0).unwrap();
        let quads = parent.quadrants();
        assert_eq!(quads[0], BoundingBox::new(0.0, 1.0, 10.0, 12.0).unwrap());
        assert_eq!(quads[3], BoundingBox::new(1.0, 2.0, 12.0, 14.0).unwrap());
        for (lat, lng) in [(0.0, 10.0), (2.0, 14.0), (1.0, 12.0), (0.3, 13.9)] {
            assert!(quads.iter().any(|q| q.contains(lat, lng)));
        }
    }

    #[test]
    fn details_fall_back_to_total_price() {
        let details = ListingDetails {
            location: Some((35.7, 51.4)),
            size: Some(100.0),
            total_price: Some(5_000_000_000.0),
            ..Default::default()
        };
        let house = details.to_house("abc").unwrap();
        assert_eq!(house.price, 50_000_000.0);
        assert_eq!(house.location.exact, Some(true));
    }

    #[test]
    fn details_without_location_yield_nothing() {
        let details = ListingDetails {
            size: Some(100.0),
            unit_price: Some(1.0),
            ..Default::default()
        };
        assert!(details.to_house("abc").is_none());
    }

    #[test]
    fn serialized_house_omits_unknown_exactness() {
        let house = House {
            token: "t".into(),
            location: Location { lat: 1.0, lng: 2.0, exact: None },
            size: 50.0,
            price: 10.0,
        };
        let json = serde_json::to_value(&house).unwrap();
        assert!(json["location"].get("exact").is_none());
    }
}
