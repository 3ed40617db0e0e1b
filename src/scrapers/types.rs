use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Listing category every query is pinned to
pub const CATEGORY: &str = "apartment-sell";

/// Who posted the listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Advertiser {
    Person,
    Business,
}

impl Advertiser {
    fn upstream_value(self) -> &'static str {
        match self {
            Advertiser::Person => "personal",
            Advertiser::Business => "real-estate-business",
        }
    }
}

impl std::str::FromStr for Advertiser {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "person" => Ok(Advertiser::Person),
            "business" => Ok(Advertiser::Business),
            other => anyhow::bail!("unknown advertiser type '{}' (expected person or business)", other),
        }
    }
}

/// Inclusive numeric range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

/// Search parameters shared by every upstream query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Size in square meters
    pub size: Option<Range>,
    /// Total price
    pub price: Option<Range>,
    pub elevator: Option<bool>,
    pub parking: Option<bool>,
    pub balcony: Option<bool>,
    pub advertiser: Option<Advertiser>,
}

impl SearchFilters {
    /// Upstream `form_data.data` map: category plus every set filter,
    /// each wrapped in its typed envelope
    pub fn form_data(&self) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("category".into(), str_value(CATEGORY));

        if let Some(advertiser) = self.advertiser {
            data.insert("business-type".into(), str_value(advertiser.upstream_value()));
        }
        for (key, flag) in [
            ("elevator", self.elevator),
            ("parking", self.parking),
            ("balcony", self.balcony),
        ] {
            if let Some(flag) = flag {
                data.insert(key.into(), boolean_value(flag));
            }
        }
        for (key, range) in [("size", self.size), ("price", self.price)] {
            if let Some(range) = range {
                data.insert(key.into(), number_range(range));
            }
        }
        data
    }
}

pub fn str_value(value: &str) -> Value {
    json!({ "str": { "value": value } })
}

pub fn boolean_value(value: bool) -> Value {
    json!({ "boolean": { "value": value } })
}

pub fn number_range(range: Range) -> Value {
    json!({ "number_range": { "minimum": range.min, "maximum": range.max } })
}

pub fn repeated_string<S: AsRef<str>>(values: &[S]) -> Value {
    let values: Vec<&str> = values.iter().map(AsRef::as_ref).collect();
    json!({ "repeated_string": { "value": values } })
}
