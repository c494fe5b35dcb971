//! FuelEconomy.gov REST web service.
//!
//! Menus (`menu/make`, `menu/model`, `menu/options`) return
//! `{"menuItem": ...}` where `menuItem` is an array, a single object when
//! there is exactly one entry, or absent when there are none.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::http::HttpTransport;
use super::provider::{FuelEconomySource, MenuItem, ProviderError};
use crate::domain::FieldMap;

pub const DEFAULT_BASE_URL: &str = "https://www.fueleconomy.gov/ws/rest";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<RawMenuItem>),
    One(RawMenuItem),
}

#[derive(Debug, Deserialize)]
struct RawMenuItem {
    text: Value,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct MenuResponse {
    #[serde(rename = "menuItem")]
    menu_item: Option<OneOrMany>,
}

fn scalar_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub struct FuelEconomyGovSource {
    base_url: String,
    http: Arc<HttpTransport>,
}

impl FuelEconomyGovSource {
    pub fn new(base_url: impl Into<String>, http: Arc<HttpTransport>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    fn menu(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Vec<MenuItem>, ProviderError> {
        let url = format!("{}/vehicle/menu/{endpoint}", self.base_url);
        let body = self.http.get_json(&url, query)?;
        parse_menu(body)
    }
}

impl FuelEconomySource for FuelEconomyGovSource {
    fn name(&self) -> &str {
        "fueleconomy_gov"
    }

    fn makes(&self, year: u16) -> Result<Vec<MenuItem>, ProviderError> {
        let year = year.to_string();
        self.menu("make", &[("year", &year)])
    }

    fn models(&self, year: u16, make: &str) -> Result<Vec<MenuItem>, ProviderError> {
        let year = year.to_string();
        self.menu("model", &[("year", &year), ("make", make)])
    }

    fn options(&self, year: u16, make: &str, model: &str) -> Result<Vec<MenuItem>, ProviderError> {
        let year = year.to_string();
        self.menu("options", &[("year", &year), ("make", make), ("model", model)])
    }

    fn vehicle(&self, id: &str) -> Result<FieldMap, ProviderError> {
        if id.trim().is_empty() {
            return Err(ProviderError::InvalidInput("vehicle id cannot be empty".into()));
        }
        let url = format!("{}/vehicle/{}", self.base_url, id.trim());
        match self.http.get_json(&url, &[])? {
            Value::Object(fields) => Ok(fields),
            Value::Null => Err(ProviderError::NotFound(format!("no vehicle with id {id}"))),
            other => Err(ProviderError::Network(format!(
                "unexpected vehicle payload for {id}: {}",
                json_kind(&other)
            ))),
        }
    }
}

/// Parse a menu body into items. A `null` body or a missing `menuItem`
/// means an empty menu.
pub fn parse_menu(body: Value) -> Result<Vec<MenuItem>, ProviderError> {
    if body.is_null() {
        return Ok(Vec::new());
    }
    let resp: MenuResponse = serde_json::from_value(body)
        .map_err(|e| ProviderError::Network(format!("unexpected menu response: {e}")))?;

    let raw = match resp.menu_item {
        None => Vec::new(),
        Some(OneOrMany::One(item)) => vec![item],
        Some(OneOrMany::Many(items)) => items,
    };

    Ok(raw
        .iter()
        .map(|item| MenuItem::new(scalar_text(&item.value), scalar_text(&item.text)))
        .collect())
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_menu_array() {
        let body = json!({"menuItem": [
            {"text": "F150 Pickup 2WD", "value": "F150 Pickup 2WD"},
            {"text": "F150 Pickup 4WD", "value": "F150 Pickup 4WD"}
        ]});
        let items = parse_menu(body).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].text, "F150 Pickup 4WD");
    }

    #[test]
    fn parses_single_menu_item() {
        let body = json!({"menuItem": {"text": "Auto 6-spd, 8 cyl, 5.0 L", "value": 34567}});
        let items = parse_menu(body).unwrap();
        assert_eq!(items, vec![MenuItem::new("34567", "Auto 6-spd, 8 cyl, 5.0 L")]);
    }

    #[test]
    fn empty_menu_variants() {
        assert!(parse_menu(Value::Null).unwrap().is_empty());
        assert!(parse_menu(json!({})).unwrap().is_empty());
    }

    #[test]
    fn malformed_menu_is_network_error() {
        let err = parse_menu(json!({"menuItem": "nope"})).unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
    }
}
