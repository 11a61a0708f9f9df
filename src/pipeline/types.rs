//! Core data types for the refresh pipeline
//!
//! - `AttributeValue` / `Feature` / `ExternalPage` - wire shapes of one ArcGIS query page
//! - `StatePopulationSnapshot` - one persisted row of a snapshot generation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// A single attribute value as returned by the feature service.
///
/// The service is untyped: the same field may arrive as a number on one
/// layer and a string on another. Only these three shapes are recognised;
/// booleans, arrays and objects decode to `Null`.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Number(serde_json::Number),
    String(String),
}

impl From<serde_json::Value> for AttributeValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => AttributeValue::Number(n),
            serde_json::Value::String(s) => AttributeValue::String(s),
            _ => AttributeValue::Null,
        }
    }
}

impl<'de> Deserialize<'de> for AttributeValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(AttributeValue::from(value))
    }
}

impl AttributeValue {
    /// Text form of the value, trimmed. `None` when null or blank.
    ///
    /// Numbers are rendered in their decimal form so that a layer storing
    /// names as codes still aggregates.
    pub fn as_trimmed_text(&self) -> Option<String> {
        let text = match self {
            AttributeValue::Null => return None,
            AttributeValue::Number(n) => n.to_string(),
            AttributeValue::String(s) => s.trim().to_string(),
        };

        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Coerce to a non-negative population count.
    ///
    /// Coercion rules:
    /// - integer -> itself
    /// - float -> rounded half away from zero (12345.6 -> 12346)
    /// - numeric string -> parsed integer, else parsed decimal then rounded
    /// - null, negative, non-finite or unparseable -> 0
    pub fn as_population(&self) -> i64 {
        let raw = match self {
            AttributeValue::Null => return 0,
            AttributeValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    i
                } else if n.as_u64().is_some() {
                    i64::MAX
                } else {
                    n.as_f64().map(round_to_i64).unwrap_or(0)
                }
            }
            AttributeValue::String(s) => {
                let trimmed = s.trim();
                match trimmed.parse::<i64>() {
                    Ok(i) => i,
                    Err(_) => trimmed.parse::<f64>().map(round_to_i64).unwrap_or(0),
                }
            }
        };

        raw.max(0)
    }
}

fn round_to_i64(value: f64) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    // `as` saturates at the i64 bounds
    value.round() as i64
}

/// One feature record of a query page
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub attributes: HashMap<String, AttributeValue>,
}

impl Feature {
    /// Look up an attribute; a missing key reads as `Null`.
    pub fn attribute(&self, key: &str) -> &AttributeValue {
        self.attributes.get(key).unwrap_or(&AttributeValue::Null)
    }
}

/// Error object the service embeds in an HTTP 200 body
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Vec<String>,
}

/// One decoded query page
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalPage {
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(rename = "exceededTransferLimit", default)]
    pub exceeded_transfer_limit: Option<bool>,
    #[serde(default)]
    pub error: Option<ServiceError>,
}

impl ExternalPage {
    /// True when the service flagged that more records exist
    pub fn exceeded_transfer_limit(&self) -> bool {
        self.exceeded_transfer_limit == Some(true)
    }
}

/// Persisted snapshot row
///
/// Every row of one generation carries the same `retrieved_at_utc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePopulationSnapshot {
    pub state_name: String,
    pub population: i64,
    pub retrieved_at_utc: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn value(v: serde_json::Value) -> AttributeValue {
        AttributeValue::from(v)
    }

    #[test]
    fn test_population_coercion() {
        assert_eq!(value(json!(12345)).as_population(), 12345);
        assert_eq!(value(json!("12345")).as_population(), 12345);
        assert_eq!(value(json!(" 42 ")).as_population(), 42);
        assert_eq!(value(json!(12345.6)).as_population(), 12346);
        assert_eq!(value(json!(12345.4)).as_population(), 12345);
        assert_eq!(value(json!(2.5)).as_population(), 3);
        assert_eq!(value(json!("99.5")).as_population(), 100);
    }

    #[test]
    fn test_population_defaults_to_zero() {
        assert_eq!(AttributeValue::Null.as_population(), 0);
        assert_eq!(value(json!("n/a")).as_population(), 0);
        assert_eq!(value(json!("")).as_population(), 0);
        assert_eq!(value(json!("NaN")).as_population(), 0);
        assert_eq!(value(json!(true)).as_population(), 0);
        assert_eq!(value(json!({"nested": 1})).as_population(), 0);
        assert_eq!(value(json!(-500)).as_population(), 0);
        assert_eq!(value(json!("-12")).as_population(), 0);
    }

    #[test]
    fn test_population_saturates_on_huge_values() {
        assert_eq!(value(json!(u64::MAX)).as_population(), i64::MAX);
        assert_eq!(value(json!(1e300)).as_population(), i64::MAX);
    }

    #[test]
    fn test_state_name_text() {
        assert_eq!(value(json!("  Texas ")).as_trimmed_text(), Some("Texas".to_string()));
        assert_eq!(value(json!("   ")).as_trimmed_text(), None);
        assert_eq!(value(json!(null)).as_trimmed_text(), None);
        assert_eq!(value(json!(6)).as_trimmed_text(), Some("6".to_string()));
    }

    #[test]
    fn test_page_decoding() {
        let page: ExternalPage = serde_json::from_value(json!({
            "features": [
                { "attributes": { "STATE_NAME": "Ohio", "POPULATION": 10 } },
                { "attributes": { "STATE_NAME": null } },
                {}
            ],
            "exceededTransferLimit": true
        }))
        .unwrap();

        assert_eq!(page.features.len(), 3);
        assert!(page.exceeded_transfer_limit());
        assert_eq!(page.features[1].attribute("STATE_NAME"), &AttributeValue::Null);
        assert_eq!(page.features[2].attribute("POPULATION"), &AttributeValue::Null);
        assert!(page.error.is_none());
    }

    #[test]
    fn test_page_without_flag() {
        let page: ExternalPage = serde_json::from_value(json!({ "features": [] })).unwrap();
        assert!(!page.exceeded_transfer_limit());

        let page: ExternalPage =
            serde_json::from_value(json!({ "features": [], "exceededTransferLimit": null })).unwrap();
        assert!(!page.exceeded_transfer_limit());
    }

    #[test]
    fn test_embedded_service_error() {
        let page: ExternalPage = serde_json::from_value(json!({
            "error": { "code": 499, "message": "Token Required", "details": [] }
        }))
        .unwrap();

        let error = page.error.unwrap();
        assert_eq!(error.code, Some(499));
        assert_eq!(error.message.as_deref(), Some("Token Required"));
    }
}
