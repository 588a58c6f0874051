use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntermediateQuery {
    pub query: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanWeights {
    pub text: f64,
    pub image: f64,
}

/// Planner metadata describing how the backend decomposed and weighted a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub intermediate_queries: Vec<IntermediateQuery>,
    pub weights: PlanWeights,
    pub top_k: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    #[serde(deserialize_with = "product_id_from_json")]
    pub product_id: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
}

impl ResultItem {
    /// Image path with blank values treated as absent.
    pub fn image_path(&self) -> Option<&str> {
        self.image_path
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Validated `/api/chat` envelope.
///
/// `results` order is the display order. The JSON object the backend actually
/// sent is kept so debug views can show the full payload, extra keys included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub plan: Plan,
    pub query_used: String,
    pub results: Vec<ResultItem>,
    #[serde(skip)]
    raw: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub query_used: String,
    pub result_count: usize,
    pub top_score: Option<f64>,
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("response body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("response body is not a JSON object")]
    NotAnObject,
    #[error("response does not match the search envelope: {0}")]
    Shape(#[source] serde_json::Error),
    #[error("result {index} has an empty product_id")]
    EmptyProductId { index: usize },
    #[error("duplicate product_id in results: {0}")]
    DuplicateProductId(String),
}

impl SearchResponse {
    pub fn new(plan: Plan, query_used: impl Into<String>, results: Vec<ResultItem>) -> Self {
        Self {
            plan,
            query_used: query_used.into(),
            results,
            raw: None,
        }
    }

    pub fn from_json_str(body: &str) -> Result<Self, SchemaError> {
        let raw: Value = serde_json::from_str(body).map_err(SchemaError::InvalidJson)?;
        Self::from_json_value(raw)
    }

    pub fn from_json_value(raw: Value) -> Result<Self, SchemaError> {
        if !raw.is_object() {
            return Err(SchemaError::NotAnObject);
        }
        let mut parsed: SearchResponse =
            serde_json::from_value(raw.clone()).map_err(SchemaError::Shape)?;
        parsed.validate()?;
        parsed.raw = Some(raw);
        Ok(parsed)
    }

    fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for (index, item) in self.results.iter().enumerate() {
            if item.product_id.trim().is_empty() {
                return Err(SchemaError::EmptyProductId { index });
            }
            if !seen.insert(item.product_id.as_str()) {
                return Err(SchemaError::DuplicateProductId(item.product_id.clone()));
            }
        }
        Ok(())
    }

    /// The full payload as received, or the typed view when built in-process.
    pub fn raw_payload(&self) -> Value {
        match &self.raw {
            Some(raw) => raw.clone(),
            None => serde_json::to_value(self).unwrap_or(Value::Null),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            query_used: self.query_used.clone(),
            result_count: self.results.len(),
            top_score: self.results.first().map(|item| item.score),
        }
    }
}

fn product_id_from_json<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "product_id must be a string or number, got {other}"
        ))),
    }
}
