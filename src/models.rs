// Data structures shared by the listing controller, the Firestore store and the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// Comparison operators understood by the remote filtered-fetch operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "in")]
    In,
}

// Right-hand side of a clause: a scalar or a list for membership tests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Number(i64),
    Text(String),
    List(Vec<String>),
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Number(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        FilterValue::Number(value.into())
    }
}

/// One field/condition/value predicate sent to the backend.
///
/// Clauses are kept in an ordered list and the same field may appear more
/// than once (a `>=` and a `<=` clause on `exceptedPrice` express a range).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    pub field: String,
    pub condition: Condition,
    pub value: FilterValue,
}

impl FilterClause {
    pub fn new(field: &str, condition: Condition, value: impl Into<FilterValue>) -> Self {
        Self {
            field: field.to_string(),
            condition,
            value: value.into(),
        }
    }

    /// The clause every listing starts from: only approved cars are shown.
    pub fn approved_only() -> Self {
        Self::new("carStatus", Condition::Eq, "approved")
    }
}

// The filter set a fresh listing (or a refresh) queries with
pub fn default_filters() -> Vec<FilterClause> {
    vec![FilterClause::approved_only()]
}

// A car document as stored in the `cars` collection.
// Keys match the stored camelCase names so the record can be handed to a detail view as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Car {
    pub id: String,
    #[serde(default)]
    pub car_brand: Option<String>,
    #[serde(default)]
    pub car_model: Option<String>,
    #[serde(default)]
    pub car_status: Option<String>,
    #[serde(default, deserialize_with = "lenient_integer")]
    pub excepted_price: Option<i64>,
    #[serde(default)]
    pub fuel_type: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, deserialize_with = "lenient_integer")]
    pub km: Option<i64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub model_year: Option<String>, // Stored as a string by the app, as a number by older admin uploads
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub posted_by: Option<String>,
    #[serde(default)]
    pub posted_date: Option<String>,
    #[serde(default)]
    pub registration_number: Option<String>,
    #[serde(default)]
    pub transmission_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Car {
    // Case-insensitive match of free search text against the fields shown on a card
    pub fn matches_search(&self, text: &str) -> bool {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        [&self.car_brand, &self.car_model, &self.location]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&needle))
            || match (&self.car_brand, &self.car_model) {
                (Some(brand), Some(model)) => format!("{} {}", brand, model).to_lowercase().contains(&needle),
                _ => false,
            }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// Prices and mileage typed in by hand land as integers, doubles or digit strings
fn lenient_integer<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Some(serde_json::Value::String(s)) => {
            let digits: String = s.chars().filter(|c| !matches!(c, ',' | ' ')).collect();
            digits
                .parse::<i64>()
                .ok()
                .or_else(|| digits.parse::<f64>().ok().map(|f| f.round() as i64))
        }
        _ => None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub has_more: bool,
}

// One page returned by the filtered fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarPage {
    #[serde(alias = "records")]
    pub cars: Vec<Car>,
    pub pagination: Pagination,
}

// Handle passed to the conversation view after "I'm interested"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub car_id: String,
    pub buyer_id: String,
    pub seller_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
