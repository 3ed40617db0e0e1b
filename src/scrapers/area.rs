use crate::error::CrawlError;
use crate::models::{BoundingBox, House, Location};
use crate::scrapers::fields::parse_localized_number;
use crate::scrapers::traits::DivarApi;
use crate::scrapers::types::{boolean_value, SearchFilters};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::debug;

pub const VIEWPORT_PATH: &str = "/v8/mapview/viewport";

/// Marker of the size chip ("meter")
const AREA_UNIT_MARKER: &str = "متر";

/// Queries the map viewport for one cell and returns listings not yet in `known`.
/// Fails with [`CrawlError::RegionTooDense`] when the upstream clusters the cell.
pub async fn fetch_area(
    api: &dyn DivarApi,
    bbox: &BoundingBox,
    filters: &SearchFilters,
    known: &HashSet<String>,
) -> Result<Vec<House>> {
    let mut data = filters.form_data();
    data.insert("map_free_roaming".into(), boolean_value(true));

    let body = json!({
        "search_data": { "form_data": { "data": data } },
        "camera_info": {
            "bbox": {
                "min_latitude": bbox.min_lat,
                "min_longitude": bbox.min_lng,
                "max_latitude": bbox.max_lat,
                "max_longitude": bbox.max_lng,
            },
            "zoom": 99,
        },
    });

    let viewport = api
        .post(VIEWPORT_PATH, &body)
        .await
        .with_context(|| format!("Failed to query viewport {}", bbox))?;

    parse_viewport(&viewport, bbox, known)
}

/// Turns a viewport response into new Houses
pub fn parse_viewport(viewport: &Value, bbox: &BoundingBox, known: &HashSet<String>) -> Result<Vec<House>> {
    let clusters = viewport["clusters"].as_array().map_or(0, Vec::len);
    if clusters > 1 {
        return Err(CrawlError::RegionTooDense { bbox: *bbox, clusters }.into());
    }

    let mut seen = HashSet::new();
    let mut houses = Vec::new();

    for post in viewport["posts"].as_array().map(Vec::as_slice).unwrap_or_default() {
        let Some(house) = parse_post(post) else {
            debug!("Skipping viewport post with missing or malformed fields");
            continue;
        };
        if known.contains(&house.token) || !seen.insert(house.token.clone()) {
            debug!(token = %house.token, "Skipping duplicate listing");
            continue;
        }
        houses.push(house);
    }

    Ok(houses)
}

fn parse_post(post: &Value) -> Option<House> {
    let pin = &post["map_pin_feature"];
    let lat = pin["lat"].as_f64()?;
    let lng = pin["lon"].as_f64()?;
    let props = &pin["properties"]["properties"];

    let size_chip = props["chips"]
        .as_array()?
        .iter()
        .filter_map(|chip| chip["title"].as_str())
        .find(|title| title.contains(AREA_UNIT_MARKER))?;
    let size = parse_localized_number(size_chip)?;
    let price = parse_localized_number(props["subtitle2"].as_str()?)?;
    let token = props["token"].as_str()?;

    Some(House {
        token: token.to_string(),
        location: Location { lat, lng, exact: None },
        size,
        price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::traits::testing::MockApi;

    fn post(token: &str, lat: f64, lng: f64) -> Value {
        json!({
            "map_pin_feature": {
                "lat": lat,
                "lon": lng,
                "properties": { "properties": {
                    "token": token,
                    "chips": [{ "title": "۲ اتاق" }, { "title": "۸۵ متر" }],
                    "subtitle2": "۶۰٬۰۰۰٬۰۰۰ تومان"
                }}
            }
        })
    }

    fn bbox() -> BoundingBox {
        BoundingBox::new(35.0, 35.1, 51.0, 51.1).unwrap()
    }

    #[test]
    fn parses_pins_into_houses() {
        let viewport = json!({ "posts": [post("a", 35.05, 51.05)] });
        let houses = parse_viewport(&viewport, &bbox(), &HashSet::new()).unwrap();

        assert_eq!(houses.len(), 1);
        assert_eq!(houses[0].token, "a");
        assert_eq!(houses[0].size, 85.0);
        assert_eq!(houses[0].price, 60_000_000.0);
        assert_eq!(houses[0].location, Location { lat: 35.05, lng: 51.05, exact: None });
    }

    #[test]
    fn more_than_one_cluster_is_too_dense() {
        let viewport = json!({ "clusters": [{}, {}], "posts": [post("a", 35.05, 51.05)] });
        let err = parse_viewport(&viewport, &bbox(), &HashSet::new()).unwrap_err();
        assert!(CrawlError::is_too_dense(&err));

        let single = json!({ "clusters": [{}], "posts": [] });
        assert!(parse_viewport(&single, &bbox(), &HashSet::new()).is_ok());
    }

    #[test]
    fn incomplete_posts_are_skipped() {
        let mut no_size = post("b", 35.0, 51.0);
        no_size["map_pin_feature"]["properties"]["properties"]["chips"] = json!([{ "title": "۲ اتاق" }]);
        let mut no_token = post("c", 35.0, 51.0);
        no_token["map_pin_feature"]["properties"]["properties"]["token"] = Value::Null;
        let mut bad_price = post("d", 35.0, 51.0);
        bad_price["map_pin_feature"]["properties"]["properties"]["subtitle2"] = json!("توافقی");
        let mut no_lat = post("e", 35.0, 51.0);
        no_lat["map_pin_feature"]["lat"] = json!("35.0");

        let viewport = json!({ "posts": [no_size, no_token, bad_price, no_lat, post("ok", 35.0, 51.0)] });
        let houses = parse_viewport(&viewport, &bbox(), &HashSet::new()).unwrap();
        let tokens: Vec<_> = houses.iter().map(|h| h.token.as_str()).collect();
        assert_eq!(tokens, ["ok"]);
    }

    #[test]
    fn known_and_repeated_tokens_are_skipped() {
        let viewport = json!({ "posts": [post("a", 35.0, 51.0), post("b", 35.0, 51.0), post("b", 35.0, 51.0)] });
        let known = HashSet::from(["a".to_string()]);
        let houses = parse_viewport(&viewport, &bbox(), &known).unwrap();
        assert_eq!(houses.len(), 1);
        assert_eq!(houses[0].token, "b");
    }

    #[tokio::test]
    async fn sends_camera_bounds_and_filters() {
        let api = MockApi::new(|_, _| Ok(json!({ "posts": [] })));
        let filters = SearchFilters {
            elevator: Some(true),
            ..Default::default()
        };
        fetch_area(&api, &bbox(), &filters, &HashSet::new()).await.unwrap();

        let calls = api.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].path, VIEWPORT_PATH);
        let body = calls[0].body.as_ref().unwrap();
        assert_eq!(body["camera_info"]["bbox"]["min_latitude"], json!(35.0));
        assert_eq!(body["camera_info"]["bbox"]["max_longitude"], json!(51.1));
        assert_eq!(body["camera_info"]["zoom"], json!(99));
        let data = &body["search_data"]["form_data"]["data"];
        assert_eq!(data["map_free_roaming"]["boolean"]["value"], json!(true));
        assert_eq!(data["elevator"]["boolean"]["value"], json!(true));
    }
}
