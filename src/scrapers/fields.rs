use crate::models::ListingDetails;
use serde_json::Value;
use std::collections::HashMap;

/// Widget kinds that carry label/value attribute rows
const ATTRIBUTE_WIDGETS: [&str; 3] = ["GROUP_INFO_ROW", "GROUP_FEATURE_ROW", "UNEXPANDABLE_ROW"];
const MAP_WIDGET: &str = "MAP_ROW";

/// Canonical fields recognised on a detail page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKey {
    Size,
    Rooms,
    TotalPrice,
    UnitPrice,
    Elevator,
    Storage,
    Parking,
    Balcony,
    YearBuilt,
}

/// Upstream label for each field
const LABELS: [(&str, FieldKey); 9] = [
    ("متراژ", FieldKey::Size),
    ("اتاق", FieldKey::Rooms),
    ("قیمت کل", FieldKey::TotalPrice),
    ("قیمت هر متر", FieldKey::UnitPrice),
    ("آسانسور", FieldKey::Elevator),
    ("انباری", FieldKey::Storage),
    ("پارکینگ", FieldKey::Parking),
    ("بالکن", FieldKey::Balcony),
    ("ساخت", FieldKey::YearBuilt),
];

/// Labels whose mere presence means the amenity is missing
const ABSENCE_LABELS: [(&str, FieldKey); 4] = [
    ("آسانسور ندارد", FieldKey::Elevator),
    ("انباری ندارد", FieldKey::Storage),
    ("پارکینگ ندارد", FieldKey::Parking),
    ("بالکن ندارد", FieldKey::Balcony),
];

/// Raw value of an attribute row
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Flag(bool),
    Text(String),
}

/// Label-keyed attributes of one detail page, before typing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFields {
    pub values: HashMap<String, FieldValue>,
    pub location: Option<(f64, f64)>,
}

impl RawFields {
    fn lookup(&self, key: FieldKey) -> Option<&FieldValue> {
        LABELS
            .iter()
            .filter(|(_, k)| *k == key)
            .find_map(|(label, _)| self.values.get(*label))
    }

    fn lacks(&self, key: FieldKey) -> bool {
        ABSENCE_LABELS
            .iter()
            .any(|(label, k)| *k == key && self.values.contains_key(*label))
    }

    /// `None` for a missing or blank value, NaN for a present value that is not a number
    pub fn number(&self, key: FieldKey) -> Option<f64> {
        match self.lookup(key)? {
            FieldValue::Text(text) if !text.trim().is_empty() => {
                Some(text.trim().parse::<f64>().unwrap_or(f64::NAN))
            }
            _ => None,
        }
    }

    /// Tri-state amenity: an absence label or `false` wins, then `true`, else unknown
    pub fn amenity(&self, key: FieldKey) -> Option<bool> {
        match (self.lacks(key), self.lookup(key)) {
            (true, _) | (_, Some(FieldValue::Flag(false))) => Some(false),
            (_, Some(FieldValue::Flag(true))) => Some(true),
            _ => None,
        }
    }

    pub fn details(&self) -> ListingDetails {
        ListingDetails {
            location: self.location,
            size: self.number(FieldKey::Size),
            rooms: self.number(FieldKey::Rooms),
            total_price: self.number(FieldKey::TotalPrice),
            unit_price: self.number(FieldKey::UnitPrice),
            elevator: self.amenity(FieldKey::Elevator),
            storage: self.amenity(FieldKey::Storage),
            parking: self.amenity(FieldKey::Parking),
            balcony: self.amenity(FieldKey::Balcony),
            year_built: self.number(FieldKey::YearBuilt),
        }
    }
}

/// Replaces Persian and Arabic-Indic digits with ASCII ones
pub fn to_english_digits(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '۰'..='۹' => char::from(b'0' + (c as u32 - '۰' as u32) as u8),
            '٠'..='٩' => char::from(b'0' + (c as u32 - '٠' as u32) as u8),
            other => other,
        })
        .collect()
}

/// Normalises digits, then keeps only ASCII digits and whitespace
pub fn digits_only(text: &str) -> String {
    to_english_digits(text)
        .chars()
        .filter(|c| c.is_ascii_digit() || c.is_whitespace())
        .collect()
}

/// Localised number such as "۸۰۰٬۰۰۰٬۰۰۰ تومان"; `None` when nothing numeric is left
pub fn parse_localized_number(text: &str) -> Option<f64> {
    let cleaned = digits_only(text);
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

/// Walks the section/widget tree of a detail response
pub fn extract_fields(response: &Value) -> RawFields {
    let mut fields = RawFields::default();

    let sections = response["sections"].as_array().map(Vec::as_slice).unwrap_or_default();
    for widget in sections
        .iter()
        .flat_map(|section| section["widgets"].as_array().map(Vec::as_slice).unwrap_or_default())
    {
        let widget_type = widget["widget_type"].as_str().unwrap_or_default();
        let data = &widget["data"];

        if ATTRIBUTE_WIDGETS.contains(&widget_type) {
            let items = match data["items"].as_array() {
                Some(items) => items.iter().collect::<Vec<_>>(),
                None => vec![data],
            };
            for item in items {
                let Some(title) = item["title"].as_str().filter(|t| !t.is_empty()) else {
                    continue;
                };
                let value = match item["available"].as_bool() {
                    Some(flag) => FieldValue::Flag(flag),
                    None => FieldValue::Text(digits_only(item["value"].as_str().unwrap_or_default())),
                };
                fields.values.insert(title.to_string(), value);
            }
        }

        if widget_type == MAP_WIDGET {
            let location = &data["location"];
            let point = point(&location["exact_data"]["point"]).or_else(|| point(&location["fuzzy_data"]["point"]));
            if let Some(point) = point {
                fields.location = Some(point);
            }
        }
    }

    fields
}

fn point(value: &Value) -> Option<(f64, f64)> {
    Some((value["latitude"].as_f64()?, value["longitude"].as_f64()?))
}
