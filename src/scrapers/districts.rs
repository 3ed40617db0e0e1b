use crate::error::CrawlError;
use crate::models::{BoundingBox, District, House, Location};
use crate::scrapers::fields::{parse_localized_number, to_english_digits};
use crate::scrapers::traits::DivarApi;
use crate::scrapers::types::{repeated_string, SearchFilters};
use anyhow::{Context, Result};
use rand::Rng;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, info};

pub const FILTERS_PATH: &str = "/v8/postlist/w/filters";
pub const SEARCH_PATH: &str = "/v8/postlist/w/search";

/// Area unit in row titles ("meter")
const AREA_UNIT_MARKERS: [&str; 2] = ["متر", "meter"];
/// Currency in row descriptions
const CURRENCY_MARKERS: [&str; 2] = ["تومان", "Toman"];

/// Numeral right before the area unit, e.g. "1,200 square meters" or "۸۵٫۵ متری".
/// `,` and `٬` group thousands; `.` and `٫` mark decimals.
static SIZE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d[\d,٬]*(?:[.٫]\d+)?)\s*(?:square\s+|مربع\s*)?(?:متر|meters?)")
        .expect("size pattern is valid")
});

/// Filter options of one district, before its box is known
#[derive(Debug, Clone, PartialEq)]
pub struct DistrictOption {
    pub title: String,
    pub value: String,
    pub hint: String,
    pub keywords: Vec<String>,
}

/// Lists the named districts of `city_id` from the filter metadata
pub async fn fetch_district_options(api: &dyn DivarApi, city_id: &str) -> Result<Vec<DistrictOption>> {
    let body = json!({
        "city_ids": [city_id],
        "source_view": "FILTER",
        "data": {},
    });
    let response = api
        .post(FILTERS_PATH, &body)
        .await
        .context("Failed to fetch filter metadata")?;

    Ok(parse_district_options(&response))
}

pub fn parse_district_options(response: &Value) -> Vec<DistrictOption> {
    let mut options = Vec::new();
    for widget in array(&response["page"]["widget_list"]) {
        for sub_widget in array(&widget["data"]["widget_list"]) {
            for option in array(&sub_widget["data"]["neighborhoods"]["options"]) {
                let Some(value) = option["value"].as_str() else {
                    debug!("Skipping district option without value");
                    continue;
                };
                options.push(DistrictOption {
                    title: option["title"].as_str().unwrap_or_default().to_string(),
                    value: value.to_string(),
                    hint: option["hint"].as_str().unwrap_or_default().to_string(),
                    keywords: split_keywords(option["search_keywords"].as_str().unwrap_or_default()),
                });
            }
        }
    }
    options
}

fn split_keywords(raw: &str) -> Vec<String> {
    raw.split(['،', ','])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Search body scoped to some districts, with the shared filters applied
fn search_body(city_id: &str, districts: &[&str], filters: &SearchFilters) -> Value {
    let mut data: Map<String, Value> = filters.form_data();
    data.insert("deed_type".into(), repeated_string(&["single_page"]));
    data.insert("districts".into(), repeated_string(districts));

    json!({
        "city_ids": [city_id],
        "source_view": "FILTER",
        "disable_recommendation": false,
        "search_data": { "form_data": { "data": data } },
    })
}

/// Approximates the district's extent with the camera box of a search limited to it
pub async fn fetch_district_bbox(api: &dyn DivarApi, city_id: &str, option: &DistrictOption) -> Result<BoundingBox> {
    let body = search_body(city_id, &[option.value.as_str()], &SearchFilters::default());
    let response = api
        .post(SEARCH_PATH, &body)
        .await
        .with_context(|| format!("Failed to search district {}", option.value))?;

    parse_camera_bbox(&response).ok_or_else(|| {
        CrawlError::MissingDistrictBbox {
            district: option.value.clone(),
        }
        .into()
    })
}

pub fn parse_camera_bbox(response: &Value) -> Option<BoundingBox> {
    let bbox = &response["map_data"]["camera_info"]["bbox"];
    BoundingBox::new(
        bbox["min_latitude"].as_f64()?,
        bbox["max_latitude"].as_f64()?,
        bbox["min_longitude"].as_f64()?,
        bbox["max_longitude"].as_f64()?,
    )
}

/// Full enumeration: metadata first, then one box lookup per district.
/// `on_step(done, total)` is called after every upstream call; `total` is `1 + districts`.
pub async fn enumerate_districts(
    api: &dyn DivarApi,
    city_id: &str,
    mut before_call: impl FnMut() -> Result<()>,
    mut on_step: impl FnMut(usize, usize),
) -> Result<Vec<District>> {
    before_call()?;
    let options = fetch_district_options(api, city_id).await?;
    let total = 1 + options.len();
    info!(city_id, districts = options.len(), "Enumerated districts");
    on_step(1, total);

    let mut districts = Vec::with_capacity(options.len());
    for (index, option) in options.into_iter().enumerate() {
        before_call()?;
        let bounding_box = fetch_district_bbox(api, city_id, &option).await?;
        debug!(district = %option.value, %bounding_box, "Resolved district box");
        districts.push(District {
            title: option.title,
            value: option.value,
            hint: option.hint,
            keywords: option.keywords,
            city_id: city_id.to_string(),
            bounding_box,
        });
        on_step(index + 2, total);
    }

    Ok(districts)
}

/// First search page of one district, with locations sampled inside its box
pub async fn fetch_district(
    api: &dyn DivarApi,
    district: &District,
    filters: &SearchFilters,
    known: &HashSet<String>,
    rng: &mut (impl Rng + Send),
) -> Result<Vec<House>> {
    let body = search_body(&district.city_id, &[district.value.as_str()], filters);
    let response = api
        .post(SEARCH_PATH, &body)
        .await
        .with_context(|| format!("Failed to search district {}", district.value))?;

    Ok(parse_rows(&response, &district.bounding_box, known, rng))
}

pub fn parse_rows(
    response: &Value,
    bbox: &BoundingBox,
    known: &HashSet<String>,
    rng: &mut impl Rng,
) -> Vec<House> {
    let mut seen = HashSet::new();
    let mut houses = Vec::new();

    for widget in array(&response["list_widgets"]) {
        if widget["widget_type"].as_str() != Some("POST_ROW") {
            continue;
        }
        let data = &widget["data"];
        let Some((token, size, total_price)) = parse_row(data) else {
            debug!("Skipping row without size, price or token");
            continue;
        };
        if known.contains(token) || !seen.insert(token) {
            continue;
        }

        houses.push(House {
            token: token.to_string(),
            location: Location {
                lat: rng.gen_range(bbox.min_lat..=bbox.max_lat),
                lng: rng.gen_range(bbox.min_lng..=bbox.max_lng),
                exact: Some(false),
            },
            size,
            price: total_price / size,
        });
    }

    houses
}

fn parse_row(data: &Value) -> Option<(&str, f64, f64)> {
    let title = data["title"].as_str()?;
    let description = data["middle_description_text"].as_str()?;
    if !AREA_UNIT_MARKERS.iter().any(|m| title.contains(m))
        || !CURRENCY_MARKERS.iter().any(|m| description.contains(m))
    {
        return None;
    }

    let size = parse_size(title)?;
    let total_price = parse_localized_number(description)?;
    let token = data["token"].as_str().filter(|t| !t.is_empty())?;
    Some((token, size, total_price))
}

/// Size from a row title such as "آپارتمان ۸۰ متری"
pub fn parse_size(title: &str) -> Option<f64> {
    let normalized = to_english_digits(title);
    let numeral: String = SIZE_PATTERN
        .captures(&normalized)?
        .get(1)?
        .as_str()
        .chars()
        .filter(|c| !matches!(c, ',' | '٬'))
        .map(|c| if c == '٫' { '.' } else { c })
        .collect();
    numeral.parse().ok().filter(|size: &f64| *size > 0.0)
}

fn array(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or_default()
}
